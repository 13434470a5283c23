//! The lazy compiler and its session.
//!
//! A node is compiled the first time its address is requested. The result is
//! stored in the node's compiled-address slot and reused by every later
//! request, including requests coming from generated code through
//! `ouro_compile`.

use std::cell::RefCell;

use cranelift_codegen::ir::{Function, InstBuilder, UserFuncName};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use ouro_core::{Callee, Expr, ExprArena, ExprId, FnType, Primitive, RawAddress, Type};

use crate::abi;
use crate::backend::{NativeBackend, TranslationUnit};
use crate::config::CompilerConfig;
use crate::error::{BackendError, CompileError};
use crate::jit_module::CraneliftBackend;
use crate::lower::Lowerer;

/// State shared between a [`Compiler`] and the code it generates. Boxed so
/// its address stays fixed; that address is embedded in generated code.
pub(crate) struct Session {
    backend: RefCell<Box<dyn NativeBackend>>,
    exprs: RefCell<ExprArena>,
    config: CompilerConfig,
}

impl Session {
    fn address(&self) -> RawAddress {
        RawAddress::from_ptr(self as *const Session)
    }

    pub(crate) fn expr_id(&self, handle: usize) -> Result<ExprId, CompileError> {
        ExprId::from_handle(handle)
            .filter(|id| self.exprs.borrow().contains(*id))
            .ok_or(CompileError::InvalidHandle(handle))
    }

    pub(crate) fn alloc(&self, expr: Expr) -> usize {
        self.exprs.borrow_mut().alloc(expr).to_handle()
    }

    pub(crate) fn ready_made(&self, address: RawAddress) -> usize {
        self.exprs.borrow_mut().ready_made(address).to_handle()
    }

    pub(crate) fn debug_print(&self, id: ExprId) -> String {
        self.exprs.borrow().debug_print(id)
    }

    pub(crate) fn compile(&self, id: ExprId, ty: &FnType) -> Result<RawAddress, CompileError> {
        let exprs = self.exprs.borrow();
        if !exprs.contains(id) {
            return Err(CompileError::UnknownExpression(id));
        }
        if let Some(address) = exprs.compiled(id) {
            tracing::trace!(expr = id.as_raw(), %address, "compile cache hit");
            return Ok(address);
        }

        let entry = format!("__ouro_expr_{}", id.as_raw());
        let mut backend = self.backend.borrow_mut();
        let signature = abi::signature(&**backend, ty, false);
        let mut function =
            Function::with_name_signature(UserFuncName::user(0, id.as_raw()), signature.clone());

        let mut fb_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut function, &mut fb_ctx);
            let block = builder.create_block();
            builder.append_block_params_for_function_params(block);
            builder.switch_to_block(block);
            builder.seal_block(block);

            let block_params = builder.block_params(block).to_vec();
            let params = abi::group_params(&**backend, &ty.params, &block_params);
            let mut lowerer = Lowerer::new(&exprs, &mut **backend, self.address(), params);
            let result = match &exprs[id] {
                Expr::Function { name, ty: target } => {
                    lowerer.lower_forward(&mut builder, name, target)?
                }
                _ => lowerer.lower(&mut builder, id)?,
            };
            let result = lowerer.expect_type(&builder, result, ty.returns, "function result")?;
            builder.ins().return_(&result.values());
            builder.finalize();
        }

        if self.config.dump_ir {
            tracing::trace!(entry = %entry, ir = %function.display(), "synthesized function");
        }
        backend.add_translation_unit(TranslationUnit {
            entry: entry.clone(),
            signature,
            function,
        })?;
        let address = backend.resolve(&entry)?;
        drop(backend);

        let address = exprs.set_compiled(id, address);
        tracing::debug!(expr = id.as_raw(), entry = %entry, %address, "compiled expression");
        Ok(address)
    }
}

/// An expression arena paired with a native backend.
///
/// Compiled code stays valid as long as the compiler that produced it.
/// Compiled code must not be invoked from inside [`Compiler::with_exprs`].
pub struct Compiler {
    session: Box<Session>,
}

pub struct CompilerBuilder {
    config: CompilerConfig,
    symbols: Vec<(String, *const u8)>,
}

impl CompilerBuilder {
    pub fn config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Make `address` callable from generated code under `name`.
    pub fn symbol(mut self, name: impl Into<String>, address: *const u8) -> Self {
        self.symbols.push((name.into(), address));
        self
    }

    pub fn build(self) -> Result<Compiler, BackendError> {
        let backend = CraneliftBackend::with_symbols(&self.config, self.symbols)?;
        Ok(Compiler::with_backend(self.config, Box::new(backend)))
    }
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Result<Self, BackendError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> CompilerBuilder {
        CompilerBuilder {
            config: CompilerConfig::default(),
            symbols: Vec::new(),
        }
    }

    /// A compiler over any backend. The backend must export the runtime
    /// primitives under their symbol names.
    pub fn with_backend(config: CompilerConfig, backend: Box<dyn NativeBackend>) -> Self {
        Self {
            session: Box::new(Session {
                backend: RefCell::new(backend),
                exprs: RefCell::new(ExprArena::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.session.config
    }

    /// Run `f` with the session's arena.
    ///
    /// # Panics
    /// If called from inside a compile or another `with_exprs`.
    pub fn with_exprs<R>(&self, f: impl FnOnce(&mut ExprArena) -> R) -> R {
        f(&mut self.session.exprs.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.session.exprs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ExprId) -> Option<Expr> {
        self.session.exprs.borrow().get(id).cloned()
    }

    pub fn parameter(&self, index: u32) -> ExprId {
        self.with_exprs(|exprs| exprs.parameter(index))
    }

    pub fn boolean(&self, value: bool) -> ExprId {
        self.with_exprs(|exprs| exprs.boolean(value))
    }

    pub fn integer(&self, value: i32) -> ExprId {
        self.with_exprs(|exprs| exprs.integer(value))
    }

    pub fn size(&self, value: usize) -> ExprId {
        self.with_exprs(|exprs| exprs.size(value))
    }

    pub fn pointer(&self, address: RawAddress) -> ExprId {
        self.with_exprs(|exprs| exprs.pointer(address))
    }

    pub fn string(&self, text: &'static str) -> ExprId {
        self.with_exprs(|exprs| exprs.string(text))
    }

    pub fn add_integer(&self, left: ExprId, right: ExprId) -> ExprId {
        self.with_exprs(|exprs| exprs.add_integer(left, right))
    }

    pub fn array(&self, element: Type, elements: impl Into<Vec<ExprId>>) -> ExprId {
        self.with_exprs(|exprs| exprs.array(element, elements))
    }

    pub fn print(&self, string: ExprId) -> ExprId {
        self.with_exprs(|exprs| exprs.print(string))
    }

    pub fn function(&self, name: &'static str, ty: FnType) -> ExprId {
        self.with_exprs(|exprs| exprs.function(name, ty))
    }

    pub fn ready_made(&self, address: RawAddress) -> ExprId {
        self.with_exprs(|exprs| exprs.ready_made(address))
    }

    pub fn call(&self, callee: Callee, ty: FnType, arguments: impl Into<Vec<ExprId>>) -> ExprId {
        self.with_exprs(|exprs| exprs.call(callee, ty, arguments))
    }

    pub fn call_named(
        &self,
        name: &'static str,
        ty: FnType,
        arguments: impl Into<Vec<ExprId>>,
    ) -> ExprId {
        self.with_exprs(|exprs| exprs.call_named(name, ty, arguments))
    }

    pub fn call_dynamic(
        &self,
        callee: ExprId,
        ty: FnType,
        arguments: impl Into<Vec<ExprId>>,
    ) -> ExprId {
        self.with_exprs(|exprs| exprs.call_dynamic(callee, ty, arguments))
    }

    pub fn call_runtime(&self, primitive: Primitive, arguments: impl Into<Vec<ExprId>>) -> ExprId {
        self.with_exprs(|exprs| exprs.call_runtime(primitive, arguments))
    }

    pub fn debug_print(&self, id: ExprId) -> String {
        self.session.debug_print(id)
    }

    /// See [`ExprArena::to_constructor`].
    pub fn to_constructor(&self, id: ExprId) -> ExprId {
        self.with_exprs(|exprs| exprs.to_constructor(id))
    }

    /// Address of `id` compiled as a function of type `ty`. Compiles on the
    /// first request; later requests return the cached address whatever `ty`
    /// they pass.
    pub fn compile(&self, id: ExprId, ty: &FnType) -> Result<RawAddress, CompileError> {
        self.session.compile(id, ty)
    }

    pub fn compiled_address(&self, id: ExprId) -> Option<RawAddress> {
        self.session.exprs.borrow().compiled(id)
    }

    /// Narrow a handle returned by generated code back to an expression.
    pub fn expr_from_handle(&self, handle: usize) -> Result<ExprId, CompileError> {
        self.session.expr_id(handle)
    }

    /// Compile and run a fragment built by [`Compiler::to_constructor`],
    /// returning the node it rebuilds.
    pub fn reconstruct(&self, quoted: ExprId) -> Result<ExprId, CompileError> {
        let address = self.compile(quoted, &FnType::new(Type::Pointer, Vec::new()))?;
        let constructor: extern "C" fn() -> usize = unsafe { std::mem::transmute(address.as_ptr()) };
        self.expr_from_handle(constructor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> Compiler {
        Compiler::new(CompilerConfig::default()).expect("compiler")
    }

    fn int_fn(params: usize) -> FnType {
        FnType::new(Type::Integer, vec![Type::Integer; params])
    }

    #[test]
    fn constant_functions_run() {
        let compiler = compiler();
        let two = compiler.integer(2);
        let three = compiler.integer(3);
        let sum = compiler.add_integer(two, three);
        let address = compiler.compile(sum, &int_fn(0)).expect("compile");
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(address.as_ptr()) };
        assert_eq!(f(), 5);
    }

    #[test]
    fn parameters_read_the_arguments() {
        let compiler = compiler();
        let a = compiler.parameter(0);
        let b = compiler.parameter(1);
        let sum = compiler.add_integer(a, b);
        let address = compiler.compile(sum, &int_fn(2)).expect("compile");
        let f: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(address.as_ptr()) };
        assert_eq!(f(40, 2), 42);
        assert_eq!(f(i32::MAX, 1), i32::MIN);
    }

    #[test]
    fn compilation_is_memoized() {
        let compiler = compiler();
        let value = compiler.integer(7);
        assert_eq!(compiler.compiled_address(value), None);
        let first = compiler.compile(value, &int_fn(0)).expect("compile");
        let second = compiler.compile(value, &int_fn(0)).expect("compile again");
        assert_eq!(first, second);
        assert_eq!(compiler.compiled_address(value), Some(first));
    }

    #[test]
    fn out_of_range_parameters_are_errors() {
        let compiler = compiler();
        let param = compiler.parameter(3);
        let err = compiler.compile(param, &int_fn(1)).expect_err("arity");
        assert!(matches!(
            err,
            CompileError::ParameterOutOfRange { index: 3, arity: 1 }
        ));
        assert_eq!(compiler.compiled_address(param), None);
    }

    #[test]
    fn result_shape_is_checked() {
        let compiler = compiler();
        let text = compiler.string("pair");
        let err = compiler.compile(text, &int_fn(0)).expect_err("shape");
        assert!(matches!(
            err,
            CompileError::TypeMismatch {
                expected: Type::Integer,
                ..
            }
        ));
    }

    #[test]
    fn array_elements_must_have_the_element_width() {
        let compiler = compiler();
        let elements = [compiler.size(1), compiler.size(2)];
        let array = compiler.array(Type::Integer, elements);
        let err = compiler
            .compile(array, &FnType::new(Type::Pointer, Vec::new()))
            .expect_err("Size elements in an Integer array");
        assert!(matches!(
            err,
            CompileError::TypeMismatch {
                context: "Array element",
                expected: Type::Integer,
            }
        ));
        assert_eq!(compiler.compiled_address(array), None);
    }

    #[test]
    fn operand_widths_are_checked_without_the_verifier() {
        for verify in [false, true] {
            let compiler = Compiler::new(CompilerConfig {
                verify,
                ..CompilerConfig::default()
            })
            .expect("compiler");
            let wide = compiler.size(1);
            let narrow = compiler.integer(2);
            let sum = compiler.add_integer(wide, narrow);
            let err = compiler.compile(sum, &int_fn(0)).expect_err("Size operand");
            assert!(matches!(
                err,
                CompileError::TypeMismatch {
                    context: "AddInteger",
                    expected: Type::Integer,
                }
            ));
        }
    }

    #[test]
    fn handles_outside_the_arena_are_rejected() {
        let compiler = compiler();
        compiler.integer(1);
        assert_eq!(compiler.expr_from_handle(0).expect("handle").as_raw(), 0);
        assert!(matches!(
            compiler.expr_from_handle(1),
            Err(CompileError::InvalidHandle(1))
        ));
    }

    #[test]
    fn ready_made_nodes_are_born_compiled() {
        let compiler = compiler();
        let address = RawAddress::new(0x1000);
        let node = compiler.ready_made(address);
        assert_eq!(compiler.compile(node, &int_fn(0)).expect("ready"), address);
    }
}
