use std::fmt;

use serde::Serialize;

/// A raw machine address carried as plain bits.
///
/// Quoting moves type identities, string data and native entry points
/// through generated code as integers; this wrapper marks every place where
/// that happens. The bit pattern only denotes the same object inside the
/// process that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RawAddress(usize);

impl RawAddress {
    pub const NULL: RawAddress = RawAddress(0);

    pub const fn new(bits: usize) -> Self {
        Self(bits)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub const fn bits(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *const u8 {
        self.0 as *const u8
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
