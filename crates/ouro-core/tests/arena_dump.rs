use ouro_core::{ExprArena, FnType, Type};
use serde_json::json;

#[test]
fn arena_dumps_nodes_in_allocation_order() {
    let mut arena = ExprArena::new();
    let text = arena.string("hello");
    arena.print(text);

    let dump = serde_json::to_value(&arena).expect("serialize arena");
    assert_eq!(
        dump,
        json!({
            "nodes": [
                { "expr": { "String": { "bytes": "hello" } } },
                { "expr": { "Print": { "string": 0 } } },
            ]
        })
    );
}

#[test]
fn calls_dump_callee_and_signature() {
    let mut arena = ExprArena::new();
    let argument = arena.integer(-7);
    arena.call_named("abs", FnType::new(Type::Integer, [Type::Integer]), [argument]);

    let dump = serde_json::to_value(&arena).expect("serialize arena");
    assert_eq!(
        dump["nodes"][1],
        json!({
            "expr": {
                "Call": {
                    "callee": { "Named": "abs" },
                    "ty": { "returns": "integer", "params": ["integer"], "variadic": false },
                    "arguments": [0],
                }
            }
        })
    );
}

#[test]
fn compiled_slots_are_not_dumped() {
    let mut arena = ExprArena::new();
    let id = arena.integer(1);
    arena.set_compiled(id, ouro_core::RawAddress::new(0x1234));
    let dump = serde_json::to_string(&arena).expect("serialize arena");
    insta::assert_snapshot!(dump, @r#"{"nodes":[{"expr":{"Integer":1}}]}"#);
}
