use cranelift_module::ModuleError;
use ouro_core::{ExprId, Type};

/// Failures of the native backend. Always fatal to the compile request that
/// hit them.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("target selection failed: {0}")]
    Target(String),
    #[error("module error: {0}")]
    Module(#[from] ModuleError),
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),
    #[error("unknown entry point `{0}`")]
    UnknownEntryPoint(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("expression #{} is not part of this session", .0.as_raw())]
    UnknownExpression(ExprId),
    #[error("handle {0:#x} does not denote an expression")]
    InvalidHandle(usize),
    #[error("{0:#x} is not the address of a registered type")]
    UnknownType(usize),
    #[error("{0} is not a runtime primitive tag")]
    UnknownPrimitive(usize),
    #[error("parameter {index} is out of range for a function of {arity} parameters")]
    ParameterOutOfRange { index: u32, arity: usize },
    #[error("type mismatch in {context}: expected a {expected} value")]
    TypeMismatch { context: &'static str, expected: Type },
    #[error("`{callee}` takes {expected} arguments but {found} were supplied")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid compiler config: {0}")]
    Parse(#[from] toml::de::Error),
}
