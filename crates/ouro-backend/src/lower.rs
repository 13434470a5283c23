//! Lower ouro expressions to Cranelift IR.
//!
//! A `Lowerer` emits the instructions for one expression tree into the
//! function under construction. External functions the tree refers to are
//! declared in the backend on the way; runtime primitives get the session
//! pointer as an extra leading argument.

use cranelift_codegen::ir::{FuncRef, InstBuilder, StackSlotData, StackSlotKind, Value};
use cranelift_frontend::FunctionBuilder;
use ouro_core::{Callee, Expr, ExprArena, ExprId, FnType, Primitive, RawAddress, Type};

use crate::abi::{self, Lowered};
use crate::backend::NativeBackend;
use crate::error::CompileError;
use crate::runtime_helpers::print_template;

pub(crate) struct Lowerer<'a> {
    exprs: &'a ExprArena,
    backend: &'a mut dyn NativeBackend,
    session: RawAddress,
    /// Parameters of the enclosing function, one entry per declared type.
    params: Vec<Lowered>,
}

impl<'a> Lowerer<'a> {
    pub(crate) fn new(
        exprs: &'a ExprArena,
        backend: &'a mut dyn NativeBackend,
        session: RawAddress,
        params: Vec<Lowered>,
    ) -> Self {
        Self {
            exprs,
            backend,
            session,
            params,
        }
    }

    pub(crate) fn backend(&self) -> &dyn NativeBackend {
        &*self.backend
    }

    pub(crate) fn lower(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        id: ExprId,
    ) -> Result<Lowered, CompileError> {
        let exprs = self.exprs;
        let expr = exprs.get(id).ok_or(CompileError::UnknownExpression(id))?;
        match expr {
            Expr::Parameter { index } => self
                .params
                .get(*index as usize)
                .copied()
                .ok_or(CompileError::ParameterOutOfRange {
                    index: *index,
                    arity: self.params.len(),
                }),
            Expr::Boolean(value) => Ok(self.constant(builder, Type::Boolean, u64::from(*value))),
            Expr::Integer(value) => {
                Ok(self.constant(builder, Type::Integer, u64::from(*value as u32)))
            }
            Expr::Size(value) => Ok(self.constant(builder, Type::Size, *value as u64)),
            Expr::Pointer(address) => {
                Ok(self.constant(builder, Type::Pointer, address.bits() as u64))
            }
            Expr::String { bytes } => {
                let length = self.scalar_constant(builder, Type::Size, bytes.len() as u64);
                let data = self.scalar_constant(builder, Type::Pointer, bytes.as_ptr() as u64);
                Ok(Lowered::Pair(length, data))
            }
            Expr::AddInteger { left, right } => {
                let left = self.lower_as(builder, *left, Type::Integer, "AddInteger")?;
                let right = self.lower_as(builder, *right, Type::Integer, "AddInteger")?;
                Ok(Lowered::Scalar(builder.ins().iadd(left, right)))
            }
            Expr::Array { element, elements } => self.lower_array(builder, *element, elements),
            Expr::Print { string } => self.lower_print(builder, *string),
            Expr::Function { name, ty } => self.lower_function(builder, name, ty),
            Expr::ReadyMade { .. } => {
                Ok(self.constant(builder, Type::Pointer, id.to_handle() as u64))
            }
            Expr::Call {
                callee,
                ty,
                arguments,
            } => match callee {
                Callee::Named(name) => self.lower_named_call(builder, name, ty, arguments),
                Callee::Runtime(primitive) => {
                    let args = self.lower_arguments(builder, primitive.symbol(), ty, arguments)?;
                    self.call_runtime(builder, *primitive, ty, &args)
                }
                Callee::Dynamic(target) => self.lower_dynamic_call(builder, *target, ty, arguments),
            },
        }
    }

    /// Body of the wrapper synthesized when a `Function` node itself is
    /// compiled: forward every parameter to the named symbol.
    pub(crate) fn lower_forward(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        name: &str,
        ty: &FnType,
    ) -> Result<Lowered, CompileError> {
        if self.params.len() != ty.params.len() {
            return Err(CompileError::ArityMismatch {
                callee: name.to_owned(),
                expected: ty.params.len(),
                found: self.params.len(),
            });
        }
        let args: Vec<Value> = self.params.iter().flat_map(|param| param.values()).collect();
        let callee = self.import(builder, name, ty, false)?;
        let call = builder.ins().call(callee, &args);
        let results = builder.inst_results(call).to_vec();
        self.results(ty.returns, &results, name)
    }

    /// Check that `value` is a `ty`: same number of parts, each of the
    /// integer width `ty` renders to.
    pub(crate) fn expect_type(
        &self,
        builder: &FunctionBuilder<'_>,
        value: Lowered,
        ty: Type,
        context: &'static str,
    ) -> Result<Lowered, CompileError> {
        let expected = abi::abi_types(self.backend(), ty);
        if value.fits(&expected, &builder.func.dfg) {
            Ok(value)
        } else {
            Err(CompileError::TypeMismatch {
                context,
                expected: ty,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Constants
    // -----------------------------------------------------------------------

    fn scalar_constant(&self, builder: &mut FunctionBuilder<'_>, ty: Type, bits: u64) -> Value {
        let ir_ty = abi::scalar_of(self.backend(), ty);
        let mask = if ir_ty.bits() >= 64 {
            u64::MAX
        } else {
            (1u64 << ir_ty.bits()) - 1
        };
        builder.ins().iconst(ir_ty, (bits & mask) as i64)
    }

    fn constant(&self, builder: &mut FunctionBuilder<'_>, ty: Type, bits: u64) -> Lowered {
        Lowered::Scalar(self.scalar_constant(builder, ty, bits))
    }

    fn lower_as(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        id: ExprId,
        ty: Type,
        context: &'static str,
    ) -> Result<Value, CompileError> {
        let lowered = self.lower(builder, id)?;
        match self.expect_type(builder, lowered, ty, context)? {
            Lowered::Scalar(value) => Ok(value),
            Lowered::Pair(..) => Err(CompileError::TypeMismatch {
                context,
                expected: ty,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Store `elements` into a fresh stack buffer, in index order, and yield
    /// its address.
    fn lower_array(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        element: Type,
        elements: &[ExprId],
    ) -> Result<Lowered, CompileError> {
        let machine = self.backend.render_type(element);
        let stride = machine.byte_size();
        let slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            (stride * elements.len() as u32).max(1),
            machine.align().trailing_zeros() as u8,
        ));
        for (index, id) in elements.iter().enumerate() {
            let lowered = self.lower(builder, *id)?;
            let lowered = self.expect_type(builder, lowered, element, "Array element")?;
            let mut offset = stride * index as u32;
            for (value, part) in lowered.values().into_iter().zip(machine.parts()) {
                builder.ins().stack_store(value, slot, offset as i32);
                offset += part.bytes();
            }
        }
        let pointer = abi::pointer_type(self.backend());
        Ok(Lowered::Scalar(builder.ins().stack_addr(pointer, slot, 0)))
    }

    /// A stack array of pointer-width constants.
    fn address_array(&mut self, builder: &mut FunctionBuilder<'_>, addresses: &[usize]) -> Value {
        let pointer = abi::pointer_type(self.backend());
        let stride = pointer.bytes();
        let slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            (stride * addresses.len() as u32).max(1),
            stride.trailing_zeros() as u8,
        ));
        for (index, address) in addresses.iter().enumerate() {
            let value = self.scalar_constant(builder, Type::Pointer, *address as u64);
            builder
                .ins()
                .stack_store(value, slot, (stride * index as u32) as i32);
        }
        builder.ins().stack_addr(pointer, slot, 0)
    }

    // -----------------------------------------------------------------------
    // Effects and callables
    // -----------------------------------------------------------------------

    fn lower_print(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        string: ExprId,
    ) -> Result<Lowered, CompileError> {
        let lowered = self.lower(builder, string)?;
        let Lowered::Pair(length, data) = self.expect_type(builder, lowered, Type::String, "Print")? else {
            return Err(CompileError::TypeMismatch {
                context: "Print",
                expected: Type::String,
            });
        };
        let template = self.scalar_constant(builder, Type::Pointer, print_template() as u64);
        self.call_runtime(
            builder,
            Primitive::Print,
            &Primitive::Print.fn_type(),
            &[template, length, data],
        )
    }

    /// A `Function` evaluates to a ready-made handle around the address of the
    /// named symbol.
    fn lower_function(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        name: &str,
        ty: &FnType,
    ) -> Result<Lowered, CompileError> {
        let callee = self.import(builder, name, ty, false)?;
        let pointer = abi::pointer_type(self.backend());
        let address = builder.ins().func_addr(pointer, callee);
        self.call_runtime(
            builder,
            Primitive::CreateReadyMade,
            &Primitive::CreateReadyMade.fn_type(),
            &[address],
        )
    }

    fn lower_named_call(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        name: &str,
        ty: &FnType,
        arguments: &[ExprId],
    ) -> Result<Lowered, CompileError> {
        let args = self.lower_arguments(builder, name, ty, arguments)?;
        let callee = self.import(builder, name, ty, false)?;
        let call = if ty.variadic {
            // One declaration per name; each call site supplies the shape of
            // its own trailing arguments.
            let mut site = abi::signature(self.backend(), ty, false);
            let fixed = site.params.len();
            for value in &args[fixed.min(args.len())..] {
                let value_type = builder.func.dfg.value_type(*value);
                site.params.push(abi::abi_param(value_type));
            }
            let site = builder.import_signature(site);
            let pointer = abi::pointer_type(self.backend());
            let address = builder.ins().func_addr(pointer, callee);
            builder.ins().call_indirect(site, address, &args)
        } else {
            builder.ins().call(callee, &args)
        };
        let results = builder.inst_results(call).to_vec();
        self.results(ty.returns, &results, name)
    }

    /// Emit a call into the lazy compiler for `target`, then call through the
    /// address it returns. The compile happens when the generated code runs.
    fn lower_dynamic_call(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        target: ExprId,
        ty: &FnType,
        arguments: &[ExprId],
    ) -> Result<Lowered, CompileError> {
        if !self.exprs.contains(target) {
            return Err(CompileError::UnknownExpression(target));
        }
        let handle = self.scalar_constant(builder, Type::Pointer, target.to_handle() as u64);
        let returns = self.scalar_constant(builder, Type::Pointer, ty.returns.address() as u64);
        let count = self.scalar_constant(builder, Type::Size, ty.params.len() as u64);
        let type_addresses: Vec<usize> = ty.params.iter().map(|param| param.address()).collect();
        let types = self.address_array(builder, &type_addresses);
        let address = match self.call_runtime(
            builder,
            Primitive::Compile,
            &Primitive::Compile.fn_type(),
            &[handle, returns, count, types],
        )? {
            Lowered::Scalar(address) => address,
            Lowered::Pair(..) => {
                return Err(CompileError::TypeMismatch {
                    context: "dynamic call",
                    expected: Type::Pointer,
                });
            }
        };

        let label = format!("<#{}>", target.as_raw());
        let fixed = FnType::new(ty.returns, ty.params.clone());
        let args = self.lower_arguments(builder, &label, &fixed, arguments)?;
        let site = abi::signature(self.backend(), &fixed, false);
        let site = builder.import_signature(site);
        let call = builder.ins().call_indirect(site, address, &args);
        let results = builder.inst_results(call).to_vec();
        self.results(ty.returns, &results, &label)
    }

    /// Lower call arguments and flatten them in ABI order.
    fn lower_arguments(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        callee: &str,
        ty: &FnType,
        arguments: &[ExprId],
    ) -> Result<Vec<Value>, CompileError> {
        let arity_ok = if ty.variadic {
            arguments.len() >= ty.params.len()
        } else {
            arguments.len() == ty.params.len()
        };
        if !arity_ok {
            return Err(CompileError::ArityMismatch {
                callee: callee.to_owned(),
                expected: ty.params.len(),
                found: arguments.len(),
            });
        }
        let mut values = Vec::with_capacity(arguments.len());
        for (index, id) in arguments.iter().enumerate() {
            let lowered = self.lower(builder, *id)?;
            if let Some(param) = ty.params.get(index) {
                self.expect_type(builder, lowered, *param, "call argument")?;
            }
            values.extend(lowered.values());
        }
        Ok(values)
    }

    fn call_runtime(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        primitive: Primitive,
        ty: &FnType,
        args: &[Value],
    ) -> Result<Lowered, CompileError> {
        let callee = self.import(builder, primitive.symbol(), ty, true)?;
        let session = self.scalar_constant(builder, Type::Pointer, self.session.bits() as u64);
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(session);
        all.extend_from_slice(args);
        let call = builder.ins().call(callee, &all);
        let results = builder.inst_results(call).to_vec();
        self.results(ty.returns, &results, primitive.symbol())
    }

    fn import(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        name: &str,
        ty: &FnType,
        session: bool,
    ) -> Result<FuncRef, CompileError> {
        let signature = abi::signature(self.backend(), ty, session);
        let id = self.backend.declare_import(name, &signature)?;
        Ok(self.backend.import_into(id, builder.func))
    }

    fn results(
        &self,
        returns: Type,
        values: &[Value],
        callee: &str,
    ) -> Result<Lowered, CompileError> {
        Lowered::from_parts(self.backend.render_type(returns), values).ok_or_else(|| {
            tracing::debug!(callee, returned = values.len(), "unexpected result shape");
            CompileError::TypeMismatch {
                context: "call result",
                expected: returns,
            }
        })
    }
}
