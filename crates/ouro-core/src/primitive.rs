//! Runtime primitives generated code can call.
//!
//! Every primitive is an `extern "C"` function exported by `ouro-backend` under
//! [`Primitive::symbol`]. Besides the parameters listed in
//! [`Primitive::fn_type`] each one receives the compiler session as its first
//! argument.

use serde::Serialize;

use ouro_typing::Type;

use crate::expr::FnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    /// Lazy-compile an expression: `(handle, return type, count, types) -> address`.
    Compile,
    /// `printf` through a fixed template: `(template, string) -> written`.
    Print,
    /// Print a node's tree to stdout: `(handle) -> written`.
    DebugPrint,
    CreateParameter,
    CreateBoolean,
    CreateInteger,
    CreateSize,
    CreatePointer,
    CreateString,
    CreateAddInteger,
    CreatePrint,
    CreateArray,
    CreateFunction,
    CreateReadyMade,
    CreateNamedCall,
    CreateDynamicCall,
    CreateRuntimeCall,
}

const CALL_TAIL: [Type; 6] = [
    Type::Pointer,
    Type::Pointer,
    Type::Size,
    Type::Boolean,
    Type::Pointer,
    Type::Size,
];

impl Primitive {
    pub const ALL: [Primitive; 17] = [
        Primitive::Compile,
        Primitive::Print,
        Primitive::DebugPrint,
        Primitive::CreateParameter,
        Primitive::CreateBoolean,
        Primitive::CreateInteger,
        Primitive::CreateSize,
        Primitive::CreatePointer,
        Primitive::CreateString,
        Primitive::CreateAddInteger,
        Primitive::CreatePrint,
        Primitive::CreateArray,
        Primitive::CreateFunction,
        Primitive::CreateReadyMade,
        Primitive::CreateNamedCall,
        Primitive::CreateDynamicCall,
        Primitive::CreateRuntimeCall,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Primitive::Compile => "ouro_compile",
            Primitive::Print => "ouro_print",
            Primitive::DebugPrint => "ouro_debug_print",
            Primitive::CreateParameter => "ouro_create_parameter",
            Primitive::CreateBoolean => "ouro_create_boolean",
            Primitive::CreateInteger => "ouro_create_integer",
            Primitive::CreateSize => "ouro_create_size",
            Primitive::CreatePointer => "ouro_create_pointer",
            Primitive::CreateString => "ouro_create_string",
            Primitive::CreateAddInteger => "ouro_create_add_integer",
            Primitive::CreatePrint => "ouro_create_print",
            Primitive::CreateArray => "ouro_create_array",
            Primitive::CreateFunction => "ouro_create_function",
            Primitive::CreateReadyMade => "ouro_create_ready_made",
            Primitive::CreateNamedCall => "ouro_create_named_call",
            Primitive::CreateDynamicCall => "ouro_create_dynamic_call",
            Primitive::CreateRuntimeCall => "ouro_create_runtime_call",
        }
    }

    /// Stable numeric tag, used when a runtime call is itself quoted.
    pub fn tag(self) -> usize {
        Primitive::ALL
            .iter()
            .position(|primitive| *primitive == self)
            .unwrap_or_default()
    }

    pub fn from_tag(tag: usize) -> Option<Primitive> {
        Primitive::ALL.get(tag).copied()
    }

    /// Signature without the leading session argument.
    pub fn fn_type(self) -> FnType {
        use Type::{Boolean, Integer, Pointer, Size, String};
        match self {
            Primitive::Compile => FnType::new(Pointer, [Pointer, Pointer, Size, Pointer]),
            Primitive::Print => FnType::new(Integer, [Pointer, String]),
            Primitive::DebugPrint => FnType::new(Size, [Pointer]),
            Primitive::CreateParameter => FnType::new(Pointer, [Integer]),
            Primitive::CreateBoolean => FnType::new(Pointer, [Boolean]),
            Primitive::CreateInteger => FnType::new(Pointer, [Integer]),
            Primitive::CreateSize => FnType::new(Pointer, [Size]),
            Primitive::CreatePointer => FnType::new(Pointer, [Pointer]),
            Primitive::CreateString => FnType::new(Pointer, [String]),
            Primitive::CreateAddInteger => FnType::new(Pointer, [Pointer, Pointer]),
            Primitive::CreatePrint => FnType::new(Pointer, [Pointer]),
            Primitive::CreateArray => FnType::new(Pointer, [Pointer, Pointer, Size]),
            Primitive::CreateFunction => {
                FnType::new(Pointer, [String, Pointer, Pointer, Size, Boolean])
            }
            Primitive::CreateReadyMade => FnType::new(Pointer, [Pointer]),
            Primitive::CreateNamedCall => {
                let mut params = vec![String];
                params.extend(CALL_TAIL);
                FnType::new(Pointer, params)
            }
            Primitive::CreateDynamicCall => {
                let mut params = vec![Pointer];
                params.extend(CALL_TAIL);
                FnType::new(Pointer, params)
            }
            Primitive::CreateRuntimeCall => {
                let mut params = vec![Size];
                params.extend(CALL_TAIL);
                FnType::new(Pointer, params)
            }
        }
    }
}
