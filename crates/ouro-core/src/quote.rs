//! Quoting: turn a node into an expression that rebuilds it.
//!
//! The fragment produced for a node calls the node's `ouro_create_*`
//! primitive. Children are quoted first and passed as handles; types, names
//! and raw addresses are passed as constants.

use ouro_typing::Type;

use crate::address::RawAddress;
use crate::expr::{Callee, Expr, ExprArena, ExprId, FnType};
use crate::primitive::Primitive;

impl ExprArena {
    /// Build a new fragment that, compiled as `() -> Pointer` and executed,
    /// returns a handle to a node equivalent to `id`.
    ///
    /// # Panics
    /// If `id` does not belong to this arena.
    pub fn to_constructor(&mut self, id: ExprId) -> ExprId {
        let expr = self[id].clone();
        match expr {
            Expr::Parameter { index } => {
                let index = self.integer(index as i32);
                self.call_runtime(Primitive::CreateParameter, [index])
            }
            Expr::Boolean(value) => {
                let value = self.boolean(value);
                self.call_runtime(Primitive::CreateBoolean, [value])
            }
            Expr::Integer(value) => {
                let value = self.integer(value);
                self.call_runtime(Primitive::CreateInteger, [value])
            }
            Expr::Size(value) => {
                let value = self.size(value);
                self.call_runtime(Primitive::CreateSize, [value])
            }
            Expr::Pointer(address) => {
                let address = self.pointer(address);
                self.call_runtime(Primitive::CreatePointer, [address])
            }
            Expr::String { bytes } => {
                let string = self.bytes(bytes);
                self.call_runtime(Primitive::CreateString, [string])
            }
            Expr::AddInteger { left, right } => {
                let left = self.to_constructor(left);
                let right = self.to_constructor(right);
                self.call_runtime(Primitive::CreateAddInteger, [left, right])
            }
            Expr::Print { string } => {
                let string = self.to_constructor(string);
                self.call_runtime(Primitive::CreatePrint, [string])
            }
            Expr::Array { element, elements } => {
                let element = self.type_constant(element);
                let count = self.size(elements.len());
                let elements = self.quote_all(&elements);
                self.call_runtime(Primitive::CreateArray, [element, elements, count])
            }
            Expr::Function { name, ty } => {
                let name = self.string(name);
                let returns = self.type_constant(ty.returns);
                let params = self.type_array(&ty.params);
                let count = self.size(ty.params.len());
                let variadic = self.boolean(ty.variadic);
                self.call_runtime(
                    Primitive::CreateFunction,
                    [name, returns, params, count, variadic],
                )
            }
            Expr::ReadyMade { address } => {
                let address = self.pointer(address);
                self.call_runtime(Primitive::CreateReadyMade, [address])
            }
            Expr::Call {
                callee,
                ty,
                arguments,
            } => {
                let (primitive, head) = match callee {
                    Callee::Named(name) => (Primitive::CreateNamedCall, self.string(name)),
                    Callee::Dynamic(target) => {
                        (Primitive::CreateDynamicCall, self.to_constructor(target))
                    }
                    Callee::Runtime(runtime) => {
                        (Primitive::CreateRuntimeCall, self.size(runtime.tag()))
                    }
                };
                let tail = self.call_tail(&ty, &arguments);
                let mut quoted = vec![head];
                quoted.extend(tail);
                self.call_runtime(primitive, quoted)
            }
        }
    }

    /// Return type, parameter types, count, variadic flag, quoted arguments
    /// and argument count, in the order the call constructors take them.
    fn call_tail(&mut self, ty: &FnType, arguments: &[ExprId]) -> [ExprId; 6] {
        let returns = self.type_constant(ty.returns);
        let params = self.type_array(&ty.params);
        let count = self.size(ty.params.len());
        let variadic = self.boolean(ty.variadic);
        let quoted = self.quote_all(arguments);
        let argument_count = self.size(arguments.len());
        [returns, params, count, variadic, quoted, argument_count]
    }

    fn quote_all(&mut self, ids: &[ExprId]) -> ExprId {
        let quoted: Vec<ExprId> = ids.iter().map(|id| self.to_constructor(*id)).collect();
        self.array(Type::Pointer, quoted)
    }

    fn type_constant(&mut self, ty: Type) -> ExprId {
        self.pointer(RawAddress::new(ty.address()))
    }

    fn type_array(&mut self, types: &[Type]) -> ExprId {
        let constants: Vec<ExprId> = types.iter().map(|ty| self.type_constant(*ty)).collect();
        self.array(Type::Pointer, constants)
    }
}
