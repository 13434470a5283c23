//! Value types of the ouro expression IR.
//!
//! Types are stateless singletons held in a process-wide registry of
//! `static` items. The address of a registry entry is the type's identity when
//! it has to travel through generated code as a plain integer (quoting passes
//! types as pointer constants and the runtime constructors map them back).

use std::ffi::c_int;
use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Boolean,
    /// The host C `int`.
    Integer,
    /// Pointer-width unsigned integer.
    Size,
    /// A `{ length: Size, data: Size }` pair.
    String,
    /// Opaque address, pointer width.
    Pointer,
}

static BOOLEAN: Type = Type::Boolean;
static INTEGER: Type = Type::Integer;
static SIZE: Type = Type::Size;
static STRING: Type = Type::String;
static POINTER: Type = Type::Pointer;

impl Type {
    pub const ALL: [Type; 5] = [
        Type::Boolean,
        Type::Integer,
        Type::Size,
        Type::String,
        Type::Pointer,
    ];

    /// The registry entry for this type.
    pub fn registered(self) -> &'static Type {
        match self {
            Type::Boolean => &BOOLEAN,
            Type::Integer => &INTEGER,
            Type::Size => &SIZE,
            Type::String => &STRING,
            Type::Pointer => &POINTER,
        }
    }

    /// Address of the registry entry. Only meaningful inside this process.
    pub fn address(self) -> usize {
        self.registered() as *const Type as usize
    }

    /// Inverse of [`Type::address`]. Returns `None` for anything that is not a
    /// registry address.
    pub fn from_address(address: usize) -> Option<Type> {
        Type::ALL
            .into_iter()
            .find(|ty| ty.address() == address)
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::Boolean => "Boolean",
            Type::Integer => "Integer",
            Type::Size => "Size",
            Type::String => "String",
            Type::Pointer => "Pointer",
        }
    }

    /// Render this type as a machine type for the given target.
    pub fn render(self, widths: &TargetWidths) -> MachineType {
        match self {
            Type::Boolean => MachineType::Scalar(Scalar::new(widths.boolean_bits)),
            Type::Integer => MachineType::Scalar(Scalar::new(widths.int_bits)),
            Type::Size => MachineType::Scalar(Scalar::new(widths.size_bits)),
            Type::Pointer => MachineType::Scalar(Scalar::new(widths.pointer_bits)),
            Type::String => {
                let field = Scalar::new(widths.size_bits);
                MachineType::Record([field, field])
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Native integer widths of a code-generation target, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetWidths {
    pub pointer_bits: u16,
    pub int_bits: u16,
    pub size_bits: u16,
    pub boolean_bits: u16,
}

impl TargetWidths {
    /// Widths of the machine this crate was compiled for.
    pub fn host() -> Self {
        Self {
            pointer_bits: bits_of::<*const u8>(),
            int_bits: bits_of::<c_int>(),
            size_bits: bits_of::<usize>(),
            boolean_bits: bits_of::<bool>(),
        }
    }

    /// Same as [`TargetWidths::host`] but with the pointer and size widths of
    /// another target.
    pub fn with_pointer_bits(self, bits: u16) -> Self {
        Self {
            pointer_bits: bits,
            size_bits: bits,
            ..self
        }
    }
}

fn bits_of<T>() -> u16 {
    (size_of::<T>() * 8) as u16
}

/// A fixed-width machine integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scalar {
    pub bits: u16,
}

impl Scalar {
    pub const fn new(bits: u16) -> Self {
        Self { bits }
    }

    pub const fn bytes(self) -> u32 {
        (self.bits as u32).div_ceil(8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineType {
    Scalar(Scalar),
    /// Two-field record, laid out field after field.
    Record([Scalar; 2]),
}

impl MachineType {
    /// Flattened fields in ABI order.
    pub fn parts(&self) -> &[Scalar] {
        match self {
            MachineType::Scalar(scalar) => std::slice::from_ref(scalar),
            MachineType::Record(fields) => fields,
        }
    }

    pub fn byte_size(&self) -> u32 {
        self.parts().iter().map(|part| part.bytes()).sum()
    }

    /// Largest field alignment, assuming naturally aligned fields.
    pub fn align(&self) -> u32 {
        self.parts()
            .iter()
            .map(|part| part.bytes())
            .max()
            .unwrap_or(1)
    }
}
