#![allow(dead_code)]

//! Shared helpers for integration tests.

use std::cell::Cell;
use std::rc::Rc;

use cranelift_codegen::ir::{FuncRef, Function, Signature};
use cranelift_module::FuncId;
use ouro_backend::{
    BackendError, Compiler, CompilerConfig, CraneliftBackend, NativeBackend, TranslationUnit,
};
use ouro_core::{RawAddress, TargetWidths};

/// A Cranelift backend that counts the translation units it receives.
pub struct CountingBackend {
    inner: CraneliftBackend,
    units: Rc<Cell<usize>>,
}

impl NativeBackend for CountingBackend {
    fn target_widths(&self) -> TargetWidths {
        self.inner.target_widths()
    }

    fn make_signature(&self) -> Signature {
        self.inner.make_signature()
    }

    fn declare_import(
        &mut self,
        name: &str,
        signature: &Signature,
    ) -> Result<FuncId, BackendError> {
        self.inner.declare_import(name, signature)
    }

    fn import_into(&mut self, id: FuncId, function: &mut Function) -> FuncRef {
        self.inner.import_into(id, function)
    }

    fn add_translation_unit(&mut self, unit: TranslationUnit) -> Result<(), BackendError> {
        self.units.set(self.units.get() + 1);
        self.inner.add_translation_unit(unit)
    }

    fn resolve(&self, entry: &str) -> Result<RawAddress, BackendError> {
        self.inner.resolve(entry)
    }
}

/// A compiler over a [`CountingBackend`], with the counter it updates.
pub fn counting_compiler() -> (Compiler, Rc<Cell<usize>>) {
    let config = CompilerConfig::default();
    let inner = CraneliftBackend::new(&config).expect("cranelift backend");
    let units = Rc::new(Cell::new(0));
    let backend = CountingBackend {
        inner,
        units: Rc::clone(&units),
    };
    (Compiler::with_backend(config, Box::new(backend)), units)
}

pub fn compiler() -> Compiler {
    Compiler::new(CompilerConfig::default()).expect("compiler")
}

/// Reinterpret a compiled address as a function pointer of type `F`.
///
/// # Safety
/// `F` must be an `extern "C" fn` type matching the signature the address
/// was compiled with.
pub unsafe fn as_fn<F: Copy>(address: RawAddress) -> F {
    assert_eq!(size_of::<F>(), size_of::<*const u8>());
    let ptr = address.as_ptr();
    unsafe { std::mem::transmute_copy(&ptr) }
}
