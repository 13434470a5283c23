use std::fmt;

use crate::expr::{Callee, Expr, ExprArena, ExprId, FnType};

/// Diagnostic rendering of an expression tree.
pub struct ExprDisplay<'a> {
    arena: &'a ExprArena,
    id: ExprId,
}

impl ExprArena {
    pub fn display(&self, id: ExprId) -> ExprDisplay<'_> {
        ExprDisplay { arena: self, id }
    }

    pub fn debug_print(&self, id: ExprId) -> String {
        self.display(id).to_string()
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(expr) = self.arena.get(self.id) else {
            return write!(f, "<unknown #{}>", self.id.as_raw());
        };
        match expr {
            Expr::Parameter { index } => write!(f, "Parameter {index}"),
            Expr::Boolean(value) => write!(f, "Boolean {value}"),
            Expr::Integer(value) => write!(f, "Integer {value}"),
            Expr::Size(value) => write!(f, "Size {value}"),
            Expr::Pointer(address) => write!(f, "Pointer {address}"),
            Expr::String { bytes } => write!(f, "String {:?}", String::from_utf8_lossy(bytes)),
            Expr::AddInteger { left, right } => {
                write!(f, "AddInteger({}, {})", self.child(*left), self.child(*right))
            }
            Expr::Array { element, elements } => {
                write!(f, "Array<{element}>(")?;
                self.list(f, elements)?;
                f.write_str(")")
            }
            Expr::Print { string } => write!(f, "Print({})", self.child(*string)),
            Expr::Function { name, ty } => {
                write!(f, "Function {name}")?;
                write_fn_type(f, ty)
            }
            Expr::ReadyMade { address } => write!(f, "ReadyMade {address}"),
            Expr::Call {
                callee, arguments, ..
            } => {
                match callee {
                    Callee::Named(name) => write!(f, "Call {name}(")?,
                    Callee::Runtime(primitive) => write!(f, "Call {}(", primitive.symbol())?,
                    Callee::Dynamic(target) => write!(f, "Call <{}>(", self.child(*target))?,
                }
                self.list(f, arguments)?;
                f.write_str(")")
            }
        }
    }
}

impl ExprDisplay<'_> {
    fn child(&self, id: ExprId) -> ExprDisplay<'_> {
        ExprDisplay {
            arena: self.arena,
            id,
        }
    }

    fn list(&self, f: &mut fmt::Formatter<'_>, ids: &[ExprId]) -> fmt::Result {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", self.child(*id))?;
        }
        Ok(())
    }
}

fn write_fn_type(f: &mut fmt::Formatter<'_>, ty: &FnType) -> fmt::Result {
    f.write_str("(")?;
    for (i, param) in ty.params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{param}")?;
    }
    if ty.variadic {
        f.write_str(if ty.params.is_empty() { "..." } else { ", ..." })?;
    }
    write!(f, ") -> {}", ty.returns)
}
