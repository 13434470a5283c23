//! The seam between the lazy compiler and the machine-code backend.

use cranelift_codegen::ir::{FuncRef, Function, Signature};
use cranelift_module::FuncId;
use ouro_core::{MachineType, RawAddress, TargetWidths, Type};

use crate::error::BackendError;

/// One function ready to be linked into the running process.
///
/// Imports referenced by `function` must have been declared through
/// [`NativeBackend::declare_import`] on the backend that receives the unit.
pub struct TranslationUnit {
    pub entry: String,
    pub signature: Signature,
    pub function: Function,
}

pub trait NativeBackend {
    /// Integer widths of the code-generation target.
    fn target_widths(&self) -> TargetWidths;

    fn render_type(&self, ty: Type) -> MachineType {
        ty.render(&self.target_widths())
    }

    /// An empty signature with the target's default calling convention.
    fn make_signature(&self) -> Signature;

    /// Declare an external function. Declaring a name again returns the
    /// existing declaration.
    fn declare_import(&mut self, name: &str, signature: &Signature)
    -> Result<FuncId, BackendError>;

    /// Make a declared function callable from `function`.
    fn import_into(&mut self, id: FuncId, function: &mut Function) -> FuncRef;

    /// Compile `unit` and link it into the process.
    fn add_translation_unit(&mut self, unit: TranslationUnit) -> Result<(), BackendError>;

    /// Address of an entry point added earlier.
    fn resolve(&self, entry: &str) -> Result<RawAddress, BackendError>;
}
