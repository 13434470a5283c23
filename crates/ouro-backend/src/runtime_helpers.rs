//! `extern "C"` runtime primitives callable from JIT-compiled code.
//!
//! Every primitive receives `*const Session` as its first argument. Node
//! handles travel as pointer-width integers, types as registry addresses,
//! booleans as `u8` and strings as a `(length, data)` pair.
//!
//! Generated code has no way to observe a failure, so errors here are fatal:
//! they are logged and the process aborts.
//!
//! The primitives are `unsafe`: they trust the session pointer and every
//! `(pointer, count)` pair they receive. Only code this crate generates
//! calls them, and it passes the boxed session and buffers that live for the
//! duration of the call.

use std::ffi::{CStr, c_char, c_int};
use std::fmt::Display;
use std::io::Write;

use ouro_core::{Callee, Expr, ExprId, FnType, Primitive, RawAddress, Type, intern};

use crate::compile::Session;
use crate::error::CompileError;

static PRINT_TEMPLATE: &CStr = c"%.*s";

/// Address of the `printf` template `Print` nodes pass to [`ouro_print`].
pub(crate) fn print_template() -> usize {
    PRINT_TEMPLATE.as_ptr() as usize
}

fn fatal(primitive: Primitive, err: impl Display) -> ! {
    tracing::error!(primitive = primitive.symbol(), %err, "runtime primitive failed");
    eprintln!("ouro: {}: {err}", primitive.symbol());
    std::process::abort()
}

/// # Safety
/// `ptr` must point to a session that outlives `'a`.
unsafe fn session<'a>(ptr: *const Session) -> &'a Session {
    unsafe { &*ptr }
}

fn unwrap_or_abort<T>(primitive: Primitive, result: Result<T, CompileError>) -> T {
    result.unwrap_or_else(|err| fatal(primitive, err))
}

/// Bytes of a string constant.
///
/// # Safety
/// Unless `len` is zero or `data` is null, `data` must point to `len`
/// readable bytes that live for the rest of the process. String data
/// reachable from generated code does.
unsafe fn static_bytes(len: usize, data: *const u8) -> &'static [u8] {
    if len == 0 || data.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

/// # Safety
/// As for [`static_bytes`].
unsafe fn static_name(len: usize, data: *const u8) -> &'static str {
    let bytes = unsafe { static_bytes(len, data) };
    match std::str::from_utf8(bytes) {
        Ok(name) => name,
        Err(_) => intern(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// # Safety
/// Unless `count` is zero or `ptr` is null, `ptr` must point to `count`
/// readable words that outlive `'a`.
unsafe fn words<'a>(ptr: *const usize, count: usize) -> &'a [usize] {
    if count == 0 || ptr.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count) }
    }
}

fn read_type(address: usize) -> Result<Type, CompileError> {
    Type::from_address(address).ok_or(CompileError::UnknownType(address))
}

/// # Safety
/// As for [`words`].
unsafe fn read_types(ptr: *const usize, count: usize) -> Result<Vec<Type>, CompileError> {
    unsafe { words(ptr, count) }
        .iter()
        .map(|address| read_type(*address))
        .collect()
}

/// # Safety
/// As for [`words`].
unsafe fn read_ids(
    session: &Session,
    ptr: *const usize,
    count: usize,
) -> Result<Vec<ExprId>, CompileError> {
    unsafe { words(ptr, count) }
        .iter()
        .map(|handle| session.expr_id(*handle))
        .collect()
}

/// # Safety
/// As for [`words`], with `params` and `count`.
unsafe fn read_fn_type(
    returns: usize,
    params: *const usize,
    count: usize,
    variadic: u8,
) -> Result<FnType, CompileError> {
    Ok(FnType {
        returns: read_type(returns)?,
        params: unsafe { read_types(params, count) }?,
        variadic: variadic != 0,
    })
}

// ---------------------------------------------------------------------------
// Compiler entry points
// ---------------------------------------------------------------------------

/// Compile the node behind `handle` as `returns(types[..count])` and return
/// its address. Memoized per node.
pub(crate) unsafe extern "C" fn ouro_compile(
    session_ptr: *const Session,
    handle: usize,
    returns: usize,
    count: usize,
    types: *const usize,
) -> *const u8 {
    let session = unsafe { session(session_ptr) };
    let result = session.expr_id(handle).and_then(|id| {
        let ty = FnType::new(read_type(returns)?, unsafe { read_types(types, count) }?);
        session.compile(id, &ty)
    });
    unwrap_or_abort(Primitive::Compile, result).as_ptr()
}

pub(crate) unsafe extern "C" fn ouro_print(
    _session: *const Session,
    template: *const c_char,
    len: usize,
    data: *const u8,
) -> c_int {
    let precision = c_int::try_from(len).unwrap_or(c_int::MAX);
    let written = unsafe { libc::printf(template, precision, data as *const c_char) };
    unsafe { libc::fflush(std::ptr::null_mut()) };
    written
}

/// Write the tree of the node behind `handle` to stdout, followed by a
/// newline. Returns the number of bytes written.
pub(crate) unsafe extern "C" fn ouro_debug_print(session_ptr: *const Session, handle: usize) -> usize {
    let session = unsafe { session(session_ptr) };
    let id = unwrap_or_abort(Primitive::DebugPrint, session.expr_id(handle));
    let line = format!("{}\n", session.debug_print(id));
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = stdout.write_all(line.as_bytes()).and_then(|()| stdout.flush()) {
        fatal(Primitive::DebugPrint, err);
    }
    line.len()
}

// ---------------------------------------------------------------------------
// Node constructors
// ---------------------------------------------------------------------------

pub(crate) unsafe extern "C" fn ouro_create_parameter(session_ptr: *const Session, index: c_int) -> usize {
    unsafe { session(session_ptr) }.alloc(Expr::Parameter {
        index: index as u32,
    })
}

pub(crate) unsafe extern "C" fn ouro_create_boolean(session_ptr: *const Session, value: u8) -> usize {
    unsafe { session(session_ptr) }.alloc(Expr::Boolean(value != 0))
}

pub(crate) unsafe extern "C" fn ouro_create_integer(session_ptr: *const Session, value: c_int) -> usize {
    unsafe { session(session_ptr) }.alloc(Expr::Integer(value))
}

pub(crate) unsafe extern "C" fn ouro_create_size(session_ptr: *const Session, value: usize) -> usize {
    unsafe { session(session_ptr) }.alloc(Expr::Size(value))
}

pub(crate) unsafe extern "C" fn ouro_create_pointer(session_ptr: *const Session, address: usize) -> usize {
    unsafe { session(session_ptr) }.alloc(Expr::Pointer(RawAddress::new(address)))
}

pub(crate) unsafe extern "C" fn ouro_create_string(
    session_ptr: *const Session,
    len: usize,
    data: *const u8,
) -> usize {
    unsafe { session(session_ptr) }.alloc(Expr::String {
        bytes: unsafe { static_bytes(len, data) },
    })
}

pub(crate) unsafe extern "C" fn ouro_create_add_integer(
    session_ptr: *const Session,
    left: usize,
    right: usize,
) -> usize {
    let session = unsafe { session(session_ptr) };
    let operands = session
        .expr_id(left)
        .and_then(|left| Ok((left, session.expr_id(right)?)));
    let (left, right) = unwrap_or_abort(Primitive::CreateAddInteger, operands);
    session.alloc(Expr::AddInteger { left, right })
}

pub(crate) unsafe extern "C" fn ouro_create_print(session_ptr: *const Session, string: usize) -> usize {
    let session = unsafe { session(session_ptr) };
    let string = unwrap_or_abort(Primitive::CreatePrint, session.expr_id(string));
    session.alloc(Expr::Print { string })
}

pub(crate) unsafe extern "C" fn ouro_create_array(
    session_ptr: *const Session,
    element: usize,
    elements: *const usize,
    count: usize,
) -> usize {
    let session = unsafe { session(session_ptr) };
    let parts = read_type(element).and_then(|element| Ok((element, unsafe { read_ids(session, elements, count) }?)));
    let (element, elements) = unwrap_or_abort(Primitive::CreateArray, parts);
    session.alloc(Expr::Array { element, elements })
}

pub(crate) unsafe extern "C" fn ouro_create_function(
    session_ptr: *const Session,
    name_len: usize,
    name: *const u8,
    returns: usize,
    params: *const usize,
    count: usize,
    variadic: u8,
) -> usize {
    let session = unsafe { session(session_ptr) };
    let ty = unwrap_or_abort(
        Primitive::CreateFunction,
        unsafe { read_fn_type(returns, params, count, variadic) },
    );
    session.alloc(Expr::Function {
        name: unsafe { static_name(name_len, name) },
        ty,
    })
}

pub(crate) unsafe extern "C" fn ouro_create_ready_made(session_ptr: *const Session, address: usize) -> usize {
    unsafe { session(session_ptr) }.ready_made(RawAddress::new(address))
}

/// # Safety
/// As for [`words`], with each `(pointer, count)` pair.
#[allow(clippy::too_many_arguments)]
unsafe fn create_call(
    session: &Session,
    primitive: Primitive,
    callee: Result<Callee, CompileError>,
    returns: usize,
    params: *const usize,
    count: usize,
    variadic: u8,
    arguments: *const usize,
    argument_count: usize,
) -> usize {
    let parts = callee.and_then(|callee| {
        let ty = unsafe { read_fn_type(returns, params, count, variadic) }?;
        let arguments = unsafe { read_ids(session, arguments, argument_count) }?;
        Ok(Expr::Call {
            callee,
            ty,
            arguments,
        })
    });
    session.alloc(unwrap_or_abort(primitive, parts))
}

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn ouro_create_named_call(
    session_ptr: *const Session,
    name_len: usize,
    name: *const u8,
    returns: usize,
    params: *const usize,
    count: usize,
    variadic: u8,
    arguments: *const usize,
    argument_count: usize,
) -> usize {
    let callee = Ok(Callee::Named(unsafe { static_name(name_len, name) }));
    unsafe {
        create_call(
            session(session_ptr),
            Primitive::CreateNamedCall,
            callee,
            returns,
            params,
            count,
            variadic,
            arguments,
            argument_count,
        )
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn ouro_create_dynamic_call(
    session_ptr: *const Session,
    target: usize,
    returns: usize,
    params: *const usize,
    count: usize,
    variadic: u8,
    arguments: *const usize,
    argument_count: usize,
) -> usize {
    let session = unsafe { session(session_ptr) };
    let callee = session.expr_id(target).map(Callee::Dynamic);
    unsafe {
        create_call(
            session,
            Primitive::CreateDynamicCall,
            callee,
            returns,
            params,
            count,
            variadic,
            arguments,
            argument_count,
        )
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn ouro_create_runtime_call(
    session_ptr: *const Session,
    tag: usize,
    returns: usize,
    params: *const usize,
    count: usize,
    variadic: u8,
    arguments: *const usize,
    argument_count: usize,
) -> usize {
    let callee = Primitive::from_tag(tag)
        .map(Callee::Runtime)
        .ok_or(CompileError::UnknownPrimitive(tag));
    unsafe {
        create_call(
            session(session_ptr),
            Primitive::CreateRuntimeCall,
            callee,
            returns,
            params,
            count,
            variadic,
            arguments,
            argument_count,
        )
    }
}

fn helper_address(primitive: Primitive) -> *const u8 {
    match primitive {
        Primitive::Compile => ouro_compile as *const u8,
        Primitive::Print => ouro_print as *const u8,
        Primitive::DebugPrint => ouro_debug_print as *const u8,
        Primitive::CreateParameter => ouro_create_parameter as *const u8,
        Primitive::CreateBoolean => ouro_create_boolean as *const u8,
        Primitive::CreateInteger => ouro_create_integer as *const u8,
        Primitive::CreateSize => ouro_create_size as *const u8,
        Primitive::CreatePointer => ouro_create_pointer as *const u8,
        Primitive::CreateString => ouro_create_string as *const u8,
        Primitive::CreateAddInteger => ouro_create_add_integer as *const u8,
        Primitive::CreatePrint => ouro_create_print as *const u8,
        Primitive::CreateArray => ouro_create_array as *const u8,
        Primitive::CreateFunction => ouro_create_function as *const u8,
        Primitive::CreateReadyMade => ouro_create_ready_made as *const u8,
        Primitive::CreateNamedCall => ouro_create_named_call as *const u8,
        Primitive::CreateDynamicCall => ouro_create_dynamic_call as *const u8,
        Primitive::CreateRuntimeCall => ouro_create_runtime_call as *const u8,
    }
}

/// Symbol table the JIT builder is seeded with.
pub(crate) fn runtime_helper_symbols() -> Vec<(&'static str, *const u8)> {
    Primitive::ALL
        .into_iter()
        .map(|primitive| (primitive.symbol(), helper_address(primitive)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_primitive_has_a_distinct_helper() {
        let symbols = runtime_helper_symbols();
        assert_eq!(symbols.len(), Primitive::ALL.len());
        let mut addresses: Vec<usize> = symbols.iter().map(|(_, ptr)| *ptr as usize).collect();
        addresses.sort_unstable();
        addresses.dedup();
        assert_eq!(addresses.len(), Primitive::ALL.len());
    }

    #[test]
    fn type_arrays_are_read_through_the_registry() {
        let addresses = [Type::Integer.address(), Type::String.address()];
        let types = unsafe { read_types(addresses.as_ptr(), addresses.len()) }.expect("types");
        assert_eq!(types, vec![Type::Integer, Type::String]);
        assert!(matches!(
            unsafe { read_types(addresses.as_ptr(), 0) },
            Ok(types) if types.is_empty()
        ));
        assert!(matches!(read_type(0x10), Err(CompileError::UnknownType(0x10))));
    }

    #[test]
    fn empty_buffers_tolerate_null_pointers() {
        assert_eq!(unsafe { static_bytes(0, std::ptr::null()) }, b"");
        assert_eq!(unsafe { static_bytes(4, std::ptr::null()) }, b"");
        assert!(unsafe { words(std::ptr::null(), 3) }.is_empty());
        assert!(matches!(
            unsafe { read_types(std::ptr::null(), 2) },
            Ok(types) if types.is_empty()
        ));
    }

    #[test]
    fn names_are_read_from_static_bytes() {
        assert_eq!(unsafe { static_name(3, b"abs".as_ptr()) }, "abs");
        static INVALID: [u8; 3] = [b'a', 0xff, b'b'];
        assert_eq!(unsafe { static_name(3, INVALID.as_ptr()) }, "a\u{fffd}b");
    }
}
