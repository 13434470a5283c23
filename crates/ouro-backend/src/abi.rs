//! Mapping of ouro types onto Cranelift signatures and values.
//!
//! Scalars travel as one machine integer. A `String` travels as its two
//! fields, length first, both in parameter lists and in return values.

use cranelift_codegen::ir::{self, AbiParam, DataFlowGraph, Signature, Value, types};
use ouro_core::{FnType, MachineType, Scalar, Type};

use crate::backend::NativeBackend;

/// A lowered expression value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lowered {
    Scalar(Value),
    Pair(Value, Value),
}

impl Lowered {
    pub(crate) fn values(self) -> Vec<Value> {
        match self {
            Lowered::Scalar(value) => vec![value],
            Lowered::Pair(first, second) => vec![first, second],
        }
    }

    /// Regroup flattened values according to a machine type.
    pub(crate) fn from_parts(machine: MachineType, values: &[Value]) -> Option<Lowered> {
        match (machine, values) {
            (MachineType::Scalar(_), [value]) => Some(Lowered::Scalar(*value)),
            (MachineType::Record(_), [first, second]) => Some(Lowered::Pair(*first, *second)),
            _ => None,
        }
    }

    /// Whether the values have exactly the Cranelift types `expected`, part
    /// for part.
    pub(crate) fn fits(self, expected: &[ir::Type], dfg: &DataFlowGraph) -> bool {
        let values = self.values();
        values.len() == expected.len()
            && values
                .iter()
                .zip(expected)
                .all(|(value, ty)| dfg.value_type(*value) == *ty)
    }
}

/// Cranelift integer type of `scalar`. Widths Cranelift has no integer type
/// for are lowered as `I64`.
pub(crate) fn scalar_type(scalar: Scalar) -> ir::Type {
    ir::Type::int(scalar.bits).unwrap_or(types::I64)
}

pub(crate) fn pointer_type(backend: &dyn NativeBackend) -> ir::Type {
    scalar_type(Scalar::new(backend.target_widths().pointer_bits))
}

pub(crate) fn scalar_of(backend: &dyn NativeBackend, ty: Type) -> ir::Type {
    let machine = backend.render_type(ty);
    scalar_type(machine.parts()[0])
}

pub(crate) fn abi_types(backend: &dyn NativeBackend, ty: Type) -> Vec<ir::Type> {
    backend
        .render_type(ty)
        .parts()
        .iter()
        .map(|part| scalar_type(*part))
        .collect()
}

/// Sub-word integers are zero-extended at call boundaries, as C callers do
/// for `bool`.
pub(crate) fn abi_param(ty: ir::Type) -> AbiParam {
    let param = AbiParam::new(ty);
    if ty.bits() < 32 { param.uext() } else { param }
}

/// Signature of a callable of type `ty`, fixed parameters only. With
/// `session` the runtime-primitive convention is used: the session pointer
/// comes first.
pub(crate) fn signature(backend: &dyn NativeBackend, ty: &FnType, session: bool) -> Signature {
    let mut sig = backend.make_signature();
    if session {
        sig.params.push(AbiParam::new(pointer_type(backend)));
    }
    for param in &ty.params {
        for part in abi_types(backend, *param) {
            sig.params.push(abi_param(part));
        }
    }
    for part in abi_types(backend, ty.returns) {
        sig.returns.push(abi_param(part));
    }
    sig
}

/// Split the entry block parameters of a function into one value per
/// declared parameter.
pub(crate) fn group_params(
    backend: &dyn NativeBackend,
    params: &[Type],
    values: &[Value],
) -> Vec<Lowered> {
    let mut grouped = Vec::with_capacity(params.len());
    let mut rest = values;
    for param in params {
        let machine = backend.render_type(*param);
        let width = machine.parts().len();
        let (head, tail) = rest.split_at(width.min(rest.len()));
        if let Some(lowered) = Lowered::from_parts(machine, head) {
            grouped.push(lowered);
        }
        rest = tail;
    }
    grouped
}
