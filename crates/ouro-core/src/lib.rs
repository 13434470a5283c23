//! Expression model of the ouro compiler.
//!
//! Expressions live in an [`ExprArena`] and are referenced by [`ExprId`].
//! The arena owns every node for the lifetime of a compiler session; nodes
//! may be shared by several parents. Each node has a compiled-address slot
//! that the lazy compiler in `ouro-backend` fills once.

mod address;
mod expr;
mod primitive;
mod print;
mod quote;

pub use address::RawAddress;
pub use expr::{Callee, Expr, ExprArena, ExprId, FnType, intern};
pub use ouro_typing::{MachineType, Scalar, TargetWidths, Type};
pub use primitive::Primitive;
pub use print::ExprDisplay;
