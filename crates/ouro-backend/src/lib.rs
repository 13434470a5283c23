//! Native code generation for ouro expressions.
//!
//! [`Compiler`] owns an expression arena and a [`NativeBackend`]. Nodes are
//! compiled lazily to Cranelift IR, linked into the running process and
//! memoized in their compiled-address slot. Generated code may call back into
//! the compiler through the runtime primitives, which lets a program build new
//! expressions and compile them while it runs.

mod abi;
mod backend;
mod compile;
mod config;
mod error;
mod jit_module;
mod lower;
mod runtime_helpers;

pub use backend::{NativeBackend, TranslationUnit};
pub use compile::{Compiler, CompilerBuilder};
pub use config::{CompilerConfig, OptLevel};
pub use error::{BackendError, CompileError, ConfigError};
pub use jit_module::CraneliftBackend;
