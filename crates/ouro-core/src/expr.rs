use std::cell::Cell;

use serde::Serialize;

use ouro_typing::Type;

use crate::address::RawAddress;
use crate::primitive::Primitive;

/// Arena-stable handle to an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ExprId(u32);

impl ExprId {
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// The id as the pointer-width handle runtime constructors return.
    pub const fn to_handle(self) -> usize {
        self.0 as usize
    }

    pub fn from_handle(handle: usize) -> Option<Self> {
        u32::try_from(handle).ok().map(Self)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Return type, parameter types and variadic flag of a callable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FnType {
    pub returns: Type,
    pub params: Vec<Type>,
    pub variadic: bool,
}

impl FnType {
    pub fn new(returns: Type, params: impl Into<Vec<Type>>) -> Self {
        Self {
            returns,
            params: params.into(),
            variadic: false,
        }
    }

    pub fn variadic(returns: Type, params: impl Into<Vec<Type>>) -> Self {
        Self {
            variadic: true,
            ..Self::new(returns, params)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Callee {
    /// External symbol, resolved by the backend when the caller is compiled.
    Named(&'static str),
    /// An expression compiled on first execution of the call site.
    Dynamic(ExprId),
    /// Runtime primitive; receives the compiler session as a hidden first
    /// argument.
    Runtime(Primitive),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expr {
    Parameter {
        index: u32,
    },
    Boolean(bool),
    Integer(i32),
    Size(usize),
    Pointer(RawAddress),
    String {
        #[serde(serialize_with = "serialize_lossy")]
        bytes: &'static [u8],
    },
    AddInteger {
        left: ExprId,
        right: ExprId,
    },
    Array {
        element: Type,
        elements: Vec<ExprId>,
    },
    Print {
        string: ExprId,
    },
    Function {
        name: &'static str,
        ty: FnType,
    },
    ReadyMade {
        address: RawAddress,
    },
    Call {
        callee: Callee,
        ty: FnType,
        arguments: Vec<ExprId>,
    },
}

fn serialize_lossy<S: serde::Serializer>(bytes: &&'static [u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}

#[derive(Debug, Serialize)]
struct Node {
    expr: Expr,
    #[serde(skip)]
    compiled: Cell<Option<RawAddress>>,
}

/// Owner of every expression node of a session.
#[derive(Debug, Default, Serialize)]
pub struct ExprArena {
    nodes: Vec<Node>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(Node {
            expr,
            compiled: Cell::new(None),
        });
        id
    }

    pub fn get(&self, id: ExprId) -> Option<&Expr> {
        self.nodes.get(id.index()).map(|node| &node.expr)
    }

    pub fn contains(&self, id: ExprId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Address stored by the lazy compiler, if the node has been compiled.
    pub fn compiled(&self, id: ExprId) -> Option<RawAddress> {
        self.nodes.get(id.index()).and_then(|node| node.compiled.get())
    }

    /// Fill the compiled-address slot and return the address it now holds.
    /// A filled slot is never overwritten.
    ///
    /// # Panics
    /// If `id` does not belong to this arena.
    pub fn set_compiled(&self, id: ExprId, address: RawAddress) -> RawAddress {
        let node = &self.nodes[id.index()];
        match node.compiled.get() {
            Some(existing) => existing,
            None => {
                node.compiled.set(Some(address));
                address
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = ExprId> + '_ {
        (0..self.nodes.len() as u32).map(ExprId)
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    pub fn parameter(&mut self, index: u32) -> ExprId {
        self.alloc(Expr::Parameter { index })
    }

    pub fn boolean(&mut self, value: bool) -> ExprId {
        self.alloc(Expr::Boolean(value))
    }

    pub fn integer(&mut self, value: i32) -> ExprId {
        self.alloc(Expr::Integer(value))
    }

    pub fn size(&mut self, value: usize) -> ExprId {
        self.alloc(Expr::Size(value))
    }

    pub fn pointer(&mut self, address: RawAddress) -> ExprId {
        self.alloc(Expr::Pointer(address))
    }

    pub fn string(&mut self, text: &'static str) -> ExprId {
        self.bytes(text.as_bytes())
    }

    pub fn bytes(&mut self, bytes: &'static [u8]) -> ExprId {
        self.alloc(Expr::String { bytes })
    }

    pub fn add_integer(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.alloc(Expr::AddInteger { left, right })
    }

    pub fn array(&mut self, element: Type, elements: impl Into<Vec<ExprId>>) -> ExprId {
        self.alloc(Expr::Array {
            element,
            elements: elements.into(),
        })
    }

    pub fn print(&mut self, string: ExprId) -> ExprId {
        self.alloc(Expr::Print { string })
    }

    pub fn function(&mut self, name: &'static str, ty: FnType) -> ExprId {
        self.alloc(Expr::Function { name, ty })
    }

    /// A node for an already-resolved native function; it is born compiled.
    pub fn ready_made(&mut self, address: RawAddress) -> ExprId {
        let id = self.alloc(Expr::ReadyMade { address });
        self.set_compiled(id, address);
        id
    }

    pub fn call(
        &mut self,
        callee: Callee,
        ty: FnType,
        arguments: impl Into<Vec<ExprId>>,
    ) -> ExprId {
        self.alloc(Expr::Call {
            callee,
            ty,
            arguments: arguments.into(),
        })
    }

    pub fn call_named(
        &mut self,
        name: &'static str,
        ty: FnType,
        arguments: impl Into<Vec<ExprId>>,
    ) -> ExprId {
        self.call(Callee::Named(name), ty, arguments)
    }

    pub fn call_dynamic(
        &mut self,
        callee: ExprId,
        ty: FnType,
        arguments: impl Into<Vec<ExprId>>,
    ) -> ExprId {
        self.call(Callee::Dynamic(callee), ty, arguments)
    }

    /// Call a runtime primitive with its canonical signature.
    pub fn call_runtime(
        &mut self,
        primitive: Primitive,
        arguments: impl Into<Vec<ExprId>>,
    ) -> ExprId {
        self.call(Callee::Runtime(primitive), primitive.fn_type(), arguments)
    }
}

impl std::ops::Index<ExprId> for ExprArena {
    type Output = Expr;

    fn index(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()].expr
    }
}

/// Leak `name` so it can be referenced from nodes and from generated code for
/// the rest of the process.
pub fn intern(name: String) -> &'static str {
    Box::leak(name.into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let mut arena = ExprArena::new();
        let a = arena.integer(1);
        let b = arena.integer(2);
        let sum = arena.add_integer(a, b);
        assert_eq!((a.as_raw(), b.as_raw(), sum.as_raw()), (0, 1, 2));
        assert_eq!(arena[sum], Expr::AddInteger { left: a, right: b });
        assert_eq!(arena.ids().count(), 3);
    }

    #[test]
    fn shared_children_form_a_dag() {
        let mut arena = ExprArena::new();
        let shared = arena.integer(21);
        let doubled = arena.add_integer(shared, shared);
        let Expr::AddInteger { left, right } = arena[doubled] else {
            panic!("expected AddInteger");
        };
        assert_eq!(left, right);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn compiled_slot_is_written_once() {
        let mut arena = ExprArena::new();
        let id = arena.integer(7);
        assert_eq!(arena.compiled(id), None);
        let first = arena.set_compiled(id, RawAddress::new(0x1000));
        let second = arena.set_compiled(id, RawAddress::new(0x2000));
        assert_eq!(first, RawAddress::new(0x1000));
        assert_eq!(second, RawAddress::new(0x1000));
        assert_eq!(arena.compiled(id), Some(RawAddress::new(0x1000)));
    }

    #[test]
    fn ready_made_is_born_compiled() {
        let mut arena = ExprArena::new();
        let id = arena.ready_made(RawAddress::new(0xdead0));
        assert_eq!(arena.compiled(id), Some(RawAddress::new(0xdead0)));
    }

    #[test]
    fn handles_round_trip() {
        let mut arena = ExprArena::new();
        arena.boolean(true);
        let id = arena.size(3);
        assert_eq!(ExprId::from_handle(id.to_handle()), Some(id));
        assert_eq!(ExprId::from_handle(usize::MAX), None);
    }

    #[test]
    fn unknown_ids_are_not_contained() {
        let arena = ExprArena::new();
        let foreign = ExprId::from_handle(4).expect("small handle");
        assert!(!arena.contains(foreign));
        assert_eq!(arena.get(foreign), None);
    }

    #[test]
    #[should_panic]
    fn filling_a_foreign_slot_panics() {
        let mut other = ExprArena::new();
        other.integer(1);
        let foreign = other.integer(2);
        let arena = ExprArena::new();
        arena.set_compiled(foreign, RawAddress::new(0x1000));
    }
}
