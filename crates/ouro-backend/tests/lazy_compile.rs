//! Lazy compilation, native calls and dynamic calls through the JIT.

mod backend_fixture;

use std::cell::RefCell;

use backend_fixture::{as_fn, compiler, counting_compiler};
use ouro_backend::{BackendError, CompileError, Compiler};
use ouro_core::{Expr, FnType, Primitive, RawAddress, Type};

thread_local! {
    static COLLECTED: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
}

/// Copies an `Integer` array out of the caller's frame while it is alive.
extern "C" fn collect_integers(data: *const i32, count: usize) -> i32 {
    let values = unsafe { std::slice::from_raw_parts(data, count) };
    COLLECTED.with(|collected| collected.borrow_mut().extend_from_slice(values));
    count as i32
}

extern "C" fn keep_handle(handle: usize) -> usize {
    handle
}

fn int_fn(params: usize) -> FnType {
    FnType::new(Type::Integer, vec![Type::Integer; params])
}

#[test]
fn compiling_twice_emits_one_unit() {
    let (compiler, units) = counting_compiler();
    let two = compiler.integer(2);
    let three = compiler.integer(3);
    let sum = compiler.add_integer(two, three);

    let first = compiler.compile(sum, &int_fn(0)).expect("compile");
    let second = compiler.compile(sum, &int_fn(0)).expect("compile again");
    assert_eq!(first, second);
    assert_eq!(units.get(), 1);

    let f: extern "C" fn() -> i32 = unsafe { as_fn(first) };
    assert_eq!(f(), 5);
}

#[test]
fn print_returns_the_byte_count() {
    let compiler = compiler();
    let hello = compiler.string("hello");
    let print = compiler.print(hello);
    let address = compiler.compile(print, &int_fn(0)).expect("compile");
    let f: extern "C" fn() -> i32 = unsafe { as_fn(address) };
    assert_eq!(f(), 5);
}

#[test]
fn arrays_are_stored_in_index_order() {
    let compiler = Compiler::builder()
        .symbol("ouro_test_collect", collect_integers as *const u8)
        .build()
        .expect("compiler");
    let elements = [compiler.integer(10), compiler.integer(20), compiler.integer(30)];
    let array = compiler.array(Type::Integer, elements);
    let count = compiler.size(3);
    let call = compiler.call_named(
        "ouro_test_collect",
        FnType::new(Type::Integer, [Type::Pointer, Type::Size]),
        [array, count],
    );
    let address = compiler.compile(call, &int_fn(0)).expect("compile");
    let f: extern "C" fn() -> i32 = unsafe { as_fn(address) };

    COLLECTED.with(|collected| collected.borrow_mut().clear());
    assert_eq!(f(), 3);
    COLLECTED.with(|collected| assert_eq!(*collected.borrow(), [10, 20, 30]));
}

#[test]
fn named_calls_reach_libc() {
    let compiler = compiler();
    let value = compiler.integer(-7);
    let call = compiler.call_named("abs", int_fn(1), [value]);
    let address = compiler.compile(call, &int_fn(0)).expect("compile");
    let f: extern "C" fn() -> i32 = unsafe { as_fn(address) };
    assert_eq!(f(), 7);
}

#[test]
fn variadic_calls_take_extra_arguments() {
    static FORMAT: &std::ffi::CStr = c"%d-%d\n";
    let compiler = compiler();
    let format = compiler.pointer(RawAddress::from_ptr(FORMAT.as_ptr()));
    let one = compiler.integer(1);
    let two = compiler.integer(2);
    let call = compiler.call_named(
        "printf",
        FnType::variadic(Type::Integer, [Type::Pointer]),
        [format, one, two],
    );
    let address = compiler.compile(call, &int_fn(0)).expect("compile");
    let f: extern "C" fn() -> i32 = unsafe { as_fn(address) };
    assert_eq!(f(), 4);
}

#[test]
fn unresolved_symbols_fail_at_compile_time() {
    let compiler = compiler();
    let call = compiler.call_named("ouro_no_such_function", int_fn(0), Vec::new());
    let err = compiler.compile(call, &int_fn(0)).expect_err("unresolved");
    assert!(matches!(
        err,
        CompileError::Backend(BackendError::UnresolvedSymbol(ref name)) if name == "ouro_no_such_function"
    ));
    assert_eq!(compiler.compiled_address(call), None);
}

#[test]
fn arity_is_checked_for_fixed_signatures() {
    let compiler = compiler();
    let call = compiler.call_named("abs", int_fn(1), Vec::new());
    let err = compiler.compile(call, &int_fn(0)).expect_err("arity");
    assert!(matches!(
        err,
        CompileError::ArityMismatch {
            expected: 1,
            found: 0,
            ..
        }
    ));
}

#[test]
fn dynamic_calls_compile_their_callee_once() {
    let (compiler, units) = counting_compiler();
    let a = compiler.parameter(0);
    let b = compiler.parameter(1);
    let body = compiler.add_integer(a, b);

    let x = compiler.parameter(0);
    let one = compiler.integer(1);
    let call = compiler.call_dynamic(body, int_fn(2), [x, one]);
    let address = compiler.compile(call, &int_fn(1)).expect("compile caller");
    assert_eq!(units.get(), 1);
    assert_eq!(compiler.compiled_address(body), None);

    let f: extern "C" fn(i32) -> i32 = unsafe { as_fn(address) };
    assert_eq!(f(4), 5);
    assert_eq!(units.get(), 2);
    assert!(compiler.compiled_address(body).is_some());

    assert_eq!(f(10), 11);
    assert_eq!(units.get(), 2);
}

#[test]
fn function_nodes_compile_to_forwarding_wrappers() {
    let compiler = compiler();
    let abs = compiler.function("abs", int_fn(1));
    let address = compiler.compile(abs, &int_fn(1)).expect("compile wrapper");
    let f: extern "C" fn(i32) -> i32 = unsafe { as_fn(address) };
    assert_eq!(f(-3), 3);

    let value = compiler.integer(-9);
    let call = compiler.call_dynamic(abs, int_fn(1), [value]);
    let caller = compiler.compile(call, &int_fn(0)).expect("compile caller");
    let g: extern "C" fn() -> i32 = unsafe { as_fn(caller) };
    assert_eq!(g(), 9);
}

#[test]
fn evaluating_a_function_yields_a_ready_made_handle() {
    let compiler = Compiler::builder()
        .symbol("ouro_test_keep", keep_handle as *const u8)
        .build()
        .expect("compiler");
    let abs = compiler.function("abs", int_fn(1));
    let keep = compiler.call_named(
        "ouro_test_keep",
        FnType::new(Type::Pointer, [Type::Pointer]),
        [abs],
    );
    let address = compiler
        .compile(keep, &FnType::new(Type::Pointer, Vec::new()))
        .expect("compile");
    let f: extern "C" fn() -> usize = unsafe { as_fn(address) };
    let handed_back = compiler.expr_from_handle(f()).expect("handle");

    let Some(Expr::ReadyMade { address: native }) = compiler.get(handed_back) else {
        panic!("expected a ready-made node");
    };
    assert_eq!(compiler.compiled_address(handed_back), Some(native));
    let abs: extern "C" fn(i32) -> i32 = unsafe { as_fn(native) };
    assert_eq!(abs(-12), 12);
}

#[test]
fn debug_print_runs_from_generated_code() {
    let compiler = compiler();
    let left = compiler.parameter(0);
    let right = compiler.integer(100);
    let sum = compiler.add_integer(left, right);
    let handle = compiler.pointer(RawAddress::new(sum.to_handle()));
    let call = compiler.call_runtime(Primitive::DebugPrint, [handle]);
    let address = compiler
        .compile(call, &FnType::new(Type::Size, Vec::new()))
        .expect("compile");
    let f: extern "C" fn() -> usize = unsafe { as_fn(address) };
    let expected = compiler.debug_print(sum);
    assert_eq!(expected, "AddInteger(Parameter 0, Integer 100)");
    assert_eq!(f(), expected.len() + 1);
}
