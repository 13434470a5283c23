//! Cranelift JIT backend with the ouro runtime primitives pre-registered.

use std::mem::ManuallyDrop;

use cranelift_codegen::ir::{FuncRef, Function, Signature};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module, default_libcall_names};
use ouro_core::{RawAddress, TargetWidths};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{NativeBackend, TranslationUnit};
use crate::config::CompilerConfig;
use crate::error::BackendError;
use crate::runtime_helpers::runtime_helper_symbols;

pub struct CraneliftBackend {
    module: ManuallyDrop<JITModule>,
    widths: TargetWidths,
    /// Names registered with the `JITBuilder`.
    registered: FxHashSet<String>,
    imports: FxHashMap<String, FuncId>,
    entries: FxHashMap<String, FuncId>,
}

impl CraneliftBackend {
    pub fn new(config: &CompilerConfig) -> Result<Self, BackendError> {
        Self::with_symbols(config, Vec::new())
    }

    /// Like [`CraneliftBackend::new`], additionally exposing `symbols` to
    /// generated code by name.
    pub fn with_symbols(
        config: &CompilerConfig,
        symbols: Vec<(String, *const u8)>,
    ) -> Result<Self, BackendError> {
        let mut builder = create_jit_builder(config)?;
        let mut registered = FxHashSet::default();
        let helpers = runtime_helper_symbols()
            .into_iter()
            .map(|(name, ptr)| (name.to_owned(), ptr));
        for (name, ptr) in helpers.chain(symbols) {
            builder.symbol(name.clone(), ptr);
            registered.insert(name);
        }
        let module = JITModule::new(builder);
        let widths = TargetWidths::host().with_pointer_bits(u16::from(module.isa().pointer_bits()));
        tracing::debug!(
            triple = %module.isa().triple(),
            pointer_bits = widths.pointer_bits,
            "created cranelift jit module"
        );
        Ok(Self {
            module: ManuallyDrop::new(module),
            widths,
            registered,
            imports: FxHashMap::default(),
            entries: FxHashMap::default(),
        })
    }

    fn symbol_known(&self, name: &str) -> bool {
        self.registered.contains(name)
            || self.entries.contains_key(name)
            || host_symbol(name).is_some()
    }
}

fn create_jit_builder(config: &CompilerConfig) -> Result<JITBuilder, BackendError> {
    let mut flag_builder = settings::builder();
    let flags = [
        ("use_colocated_libcalls", "false"),
        ("is_pic", "false"),
        ("opt_level", config.opt_level.as_str()),
        ("enable_verifier", if config.verify { "true" } else { "false" }),
    ];
    for (name, value) in flags {
        flag_builder
            .set(name, value)
            .map_err(|err| BackendError::Target(format!("set {name}: {err}")))?;
    }
    let isa_builder = cranelift_native::builder()
        .map_err(|msg| BackendError::Target(format!("host isa: {msg}")))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|err| BackendError::Target(format!("isa finish: {err}")))?;
    Ok(JITBuilder::with_isa(isa, default_libcall_names()))
}

/// Look `name` up among the symbols already loaded into the process.
#[cfg(unix)]
fn host_symbol(name: &str) -> Option<*const u8> {
    let name = std::ffi::CString::new(name).ok()?;
    let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    (!ptr.is_null()).then_some(ptr as *const u8)
}

/// Without `dlsym` the JIT linker is the only judge.
#[cfg(not(unix))]
fn host_symbol(_name: &str) -> Option<*const u8> {
    Some(std::ptr::null())
}

impl NativeBackend for CraneliftBackend {
    fn target_widths(&self) -> TargetWidths {
        self.widths
    }

    fn make_signature(&self) -> Signature {
        self.module.make_signature()
    }

    fn declare_import(
        &mut self,
        name: &str,
        signature: &Signature,
    ) -> Result<FuncId, BackendError> {
        if !self.imports.contains_key(name) && !self.symbol_known(name) {
            return Err(BackendError::UnresolvedSymbol(name.to_owned()));
        }
        let id = self.module.declare_function(name, Linkage::Import, signature)?;
        self.imports.insert(name.to_owned(), id);
        Ok(id)
    }

    fn import_into(&mut self, id: FuncId, function: &mut Function) -> FuncRef {
        self.module.declare_func_in_func(id, function)
    }

    fn add_translation_unit(&mut self, unit: TranslationUnit) -> Result<(), BackendError> {
        let TranslationUnit {
            entry,
            signature,
            function,
        } = unit;
        let id = self.module.declare_function(&entry, Linkage::Export, &signature)?;
        let mut ctx = self.module.make_context();
        ctx.func = function;
        self.module.define_function(id, &mut ctx)?;
        self.module.clear_context(&mut ctx);
        self.module.finalize_definitions()?;
        self.entries.insert(entry, id);
        Ok(())
    }

    fn resolve(&self, entry: &str) -> Result<RawAddress, BackendError> {
        let id = self
            .entries
            .get(entry)
            .ok_or_else(|| BackendError::UnknownEntryPoint(entry.to_owned()))?;
        Ok(RawAddress::from_ptr(self.module.get_finalized_function(*id)))
    }
}

impl Drop for CraneliftBackend {
    fn drop(&mut self) {
        // Code emitted by this module becomes unreachable with the backend.
        let module = unsafe { ManuallyDrop::take(&mut self.module) };
        unsafe { module.free_memory() };
    }
}
