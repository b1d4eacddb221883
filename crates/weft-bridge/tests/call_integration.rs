//! Forward call flow against the recording VM: after a full install and
//! declare, every script-to-native path runs through the hooks the VM
//! actually has registered, driven the way interpreted wrapper code
//! would drive them.

use std::cell::Cell;
use std::rc::Rc;

use weft_bridge::{Bridge, BridgeConfig};
use weft_reflect::{
    copy_of, Callable, ClassBuilder, DbBuilder, EnumBuilder, FromValue, FunctionBuilder,
    IntoValue, ObjectRef, Param, TypeId, TypeKind, Value,
};
use weft_vm::{
    ForeignInstance, ForeignMethod, MockVm, PayloadMode, ScriptVm, SlotValue, VmHandle,
};

#[derive(Clone, Debug, PartialEq)]
struct V2 {
    x: f32,
    y: f32,
}

struct World {
    bridge: Bridge,
    vm: MockVm,
    vec2: TypeId,
    node: TypeId,
    clamp: Rc<Callable>,
    calls: Rc<Cell<usize>>,
    drops: Rc<Cell<usize>>,
}

fn world() -> World {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut builder = DbBuilder::new();
    let b = builder.builtins().clone();
    let math = builder.namespace(&["math"]);

    let node = builder
        .add_class(ClassBuilder::new("Node", TypeKind::Object))
        .unwrap();
    let axis = builder
        .add_enum(EnumBuilder::new("Axis").variant("X", 0).variant("Y", 1))
        .unwrap();
    let floats = builder.add_sequence("Vec<f32>", b.f32).unwrap();

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    builder
        .add_function(
            FunctionBuilder::new("clamp", move |_, args| {
                counter.set(counter.get() + 1);
                let v = f32::from_value(&args[0]).unwrap_or(0.0);
                let hi = f32::from_value(&args[1]).unwrap_or(1.0);
                v.min(hi).into_value()
            })
            .namespace(math)
            .param(Param::new("value", b.f32))
            .param(Param::new("hi", b.f32).with_default(1.0f32.into_value()))
            .result(b.f32),
        )
        .unwrap();
    builder
        .add_function(
            FunctionBuilder::new("flip", |_, args| match &args[0] {
                Value::Enum { ty, index } => Value::Enum {
                    ty: *ty,
                    index: 1 - *index,
                },
                _ => Value::None,
            })
            .namespace(math)
            .param(Param::new("axis", axis))
            .result(axis),
        )
        .unwrap();
    builder
        .add_function(
            FunctionBuilder::new("total", |_, args| match &args[0] {
                Value::Sequence { items, .. } => items
                    .iter()
                    .map(|item| f32::from_value(item).unwrap_or(0.0))
                    .sum::<f32>()
                    .into_value(),
                _ => Value::None,
            })
            .namespace(math)
            .param(Param::new("values", floats))
            .result(b.f32),
        )
        .unwrap();
    let content = b.f32;
    builder
        .add_function(
            FunctionBuilder::new("iota", move |_, args| {
                let n = args[0].as_f64().unwrap_or(0.0) as usize;
                let items = (0..n).map(|i| (i as f32).into_value()).collect();
                Value::sequence(content, items)
            })
            .namespace(math)
            .param(Param::new("n", b.f32))
            .result(floats),
        )
        .unwrap();
    builder
        .add_function(
            FunctionBuilder::new("maybe", move |_, args| {
                if args[0].is_null() {
                    Value::Ref(ObjectRef::null(node))
                } else {
                    args[0].clone()
                }
            })
            .namespace(math)
            .param(Param::new("node", node).nullable())
            .result(node),
        )
        .unwrap();

    let drops = Rc::new(Cell::new(0));
    let dropped = drops.clone();
    let vec2 = builder.reserve_type("Vec2").unwrap();
    builder
        .define_class(
            vec2,
            ClassBuilder::new("Vec2", TypeKind::Struct)
                .copy_with(copy_of::<V2>())
                .constructor(
                    vec![Param::new("x", b.f32), Param::new("y", b.f32)],
                    move |_, args| {
                        let x = f32::from_value(&args[0]).unwrap_or(0.0);
                        let y = f32::from_value(&args[1]).unwrap_or(0.0);
                        Value::Struct(ObjectRef::new(vec2, V2 { x, y }))
                    },
                )
                .member_mut(
                    "x",
                    b.f32,
                    |obj| {
                        obj.object()
                            .and_then(|o| o.with(|v: &V2| v.x.into_value()))
                            .unwrap_or(Value::None)
                    },
                    |obj, value| {
                        if let (Some(o), Ok(x)) = (obj.object(), f32::from_value(value)) {
                            o.with_mut(|v: &mut V2| v.x = x);
                        }
                    },
                )
                .member("y", b.f32, |obj| {
                    obj.object()
                        .and_then(|o| o.with(|v: &V2| v.y.into_value()))
                        .unwrap_or(Value::None)
                })
                .method("length", Vec::new(), Some(b.f32), |recv, _| {
                    recv.and_then(|r| r.object())
                        .and_then(|o| o.with(|v: &V2| v.x.hypot(v.y).into_value()))
                        .unwrap_or(Value::None)
                })
                .operator(
                    "add",
                    "+",
                    vec![Param::new("a", vec2), Param::new("b", vec2)],
                    Some(b.f32),
                    |_, args| match (args[0].object(), args[1].object()) {
                        (Some(a), Some(other)) => a
                            .with(|u: &V2| other.with(|v: &V2| u.x * v.x + u.y * v.y))
                            .flatten()
                            .map(|dot| dot.into_value())
                            .unwrap_or(Value::None),
                        _ => Value::None,
                    },
                )
                .static_value("count", b.i32, 0i32.into_value())
                .destructor(move |_| dropped.set(dropped.get() + 1)),
        )
        .unwrap();

    let db = Rc::new(builder.build().unwrap());
    let clamp = db.find_function("math", "clamp").unwrap().clone();
    let mut bridge = Bridge::new(db, BridgeConfig::default());
    let mut vm = MockVm::new();
    bridge.install(&mut vm).unwrap();
    bridge.declare_all(&mut vm);
    World {
        bridge,
        vm,
        vec2,
        node,
        clamp,
        calls,
        drops,
    }
}

// ============================================================================
// Script-side driving helpers
// ============================================================================

/// Run a prelude `ref(...)` lookup the way interpreted script would:
/// string arguments in slots 1.., the class allocate hook, then a pin of
/// the meta object it leaves in slot 0.
fn resolve_meta(vm: &mut MockVm, class: &str, args: &[&str]) -> VmHandle {
    let allocate = vm.foreign_class("main", class).unwrap().allocate.clone();
    vm.ensure_slots(1 + args.len());
    for (index, arg) in args.iter().enumerate() {
        vm.set_slot_string(1 + index, arg);
    }
    allocate(&mut *vm);
    assert!(!vm.slot(0).is_null(), "{class}.ref resolved nothing");
    vm.slot_handle(0)
}

/// `Constructor.ref(class_name, index)` takes its index as a number.
fn resolve_constructor(vm: &mut MockVm, class: &str, index: f64) -> VmHandle {
    let allocate = vm
        .foreign_class("main", "Constructor")
        .unwrap()
        .allocate
        .clone();
    vm.ensure_slots(3);
    vm.set_slot_string(1, class);
    vm.set_slot_number(2, index);
    allocate(&mut *vm);
    assert!(!vm.slot(0).is_null(), "constructor {index} of {class} missing");
    vm.slot_handle(0)
}

fn trampoline(vm: &MockVm, class: &str, signature: &str) -> ForeignMethod {
    vm.foreign_method("main", class, false, signature)
        .unwrap_or_else(|| panic!("{class}.{signature} not registered"))
}

/// Emulate `Vec2.new(x, y)`: the generated wrapper runs the class
/// allocate hook with the class in slot 0, the constructor descriptor in
/// slot 1 and the declared arguments after it.
fn construct_v2(vm: &mut MockVm, ctor: &VmHandle, x: f64, y: f64) -> VmHandle {
    let allocate = vm.foreign_class("main", "Vec2").unwrap().allocate.clone();
    vm.ensure_slots(4);
    vm.get_variable("main", "Vec2", 0);
    vm.set_slot_handle(1, ctor);
    vm.set_slot_number(2, x);
    vm.set_slot_number(3, y);
    allocate(&mut *vm);
    vm.slot_handle(0)
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn test_function_call_round_trip() {
    let mut w = world();
    let clamp = resolve_meta(&mut w.vm, "Function", &["math", "clamp"]);
    let call = trampoline(&w.vm, "Function", "call(_,_)");

    w.vm.ensure_slots(3);
    w.vm.set_slot_handle(0, &clamp);
    w.vm.set_slot_number(1, 5.0);
    w.vm.set_slot_number(2, 2.5);
    call(&mut w.vm);

    assert_eq!(w.vm.slot(0).as_number(), Some(2.5));
    assert_eq!(w.calls.get(), 1);
}

#[test]
fn test_omitted_argument_takes_declared_default() {
    let mut w = world();
    let clamp = resolve_meta(&mut w.vm, "Function", &["math", "clamp"]);

    let call2 = trampoline(&w.vm, "Function", "call(_,_)");
    w.vm.ensure_slots(3);
    w.vm.set_slot_handle(0, &clamp);
    w.vm.set_slot_number(1, 9.0);
    w.vm.set_slot_number(2, 0.5);
    call2(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(0.5));

    // One argument: hi falls back to 1.0, not the 0.5 of the previous
    // call.
    let call1 = trampoline(&w.vm, "Function", "call(_)");
    w.vm.set_slot_handle(0, &clamp);
    w.vm.set_slot_number(1, 9.0);
    call1(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(1.0));
    assert_eq!(w.calls.get(), 2);
}

#[test]
fn test_rejected_calls_leave_null_and_skip_entry() {
    let mut w = world();
    let clamp = resolve_meta(&mut w.vm, "Function", &["math", "clamp"]);

    // Under arity: clamp needs at least its one non-defaulted argument.
    let call0 = trampoline(&w.vm, "Function", "call()");
    w.vm.set_slot_handle(0, &clamp);
    call0(&mut w.vm);
    assert!(w.vm.slot(0).is_null());

    // Wrong argument type.
    let call1 = trampoline(&w.vm, "Function", "call(_)");
    w.vm.ensure_slots(2);
    w.vm.set_slot_handle(0, &clamp);
    w.vm.set_slot_string(1, "not a number");
    call1(&mut w.vm);
    assert!(w.vm.slot(0).is_null());

    assert_eq!(w.calls.get(), 0);
}

#[test]
fn test_binding_identity_stable_across_calls() {
    let mut w = world();
    let first = w.bridge.binding(&w.clamp);

    let clamp = resolve_meta(&mut w.vm, "Function", &["math", "clamp"]);
    let call = trampoline(&w.vm, "Function", "call(_,_)");
    for n in [1.0, 2.0] {
        w.vm.ensure_slots(3);
        w.vm.set_slot_handle(0, &clamp);
        w.vm.set_slot_number(1, n);
        w.vm.set_slot_number(2, 10.0);
        call(&mut w.vm);
    }

    let again = w.bridge.binding(&w.clamp);
    assert!(Rc::ptr_eq(&first, &again));
    assert!(Rc::ptr_eq(again.callable(), &w.clamp));
}

// ============================================================================
// Constructed objects
// ============================================================================

#[test]
fn test_constructor_allocates_owned_payload() {
    let mut w = world();
    let ctor = resolve_constructor(&mut w.vm, "Vec2", 0.0);
    construct_v2(&mut w.vm, &ctor, 3.0, 4.0);

    let instance = w.vm.slot_foreign(0).unwrap().clone();
    assert_eq!(instance.mode, PayloadMode::OwnedCopy);
    assert_eq!(instance.type_id, w.vec2);
    let made = instance.value.object().unwrap().with(|v: &V2| v.clone());
    assert_eq!(made, Some(V2 { x: 3.0, y: 4.0 }));
}

#[test]
fn test_member_get_and_set() {
    let mut w = world();
    let ctor = resolve_constructor(&mut w.vm, "Vec2", 0.0);
    let v2 = construct_v2(&mut w.vm, &ctor, 3.0, 4.0);
    let x = resolve_meta(&mut w.vm, "Member", &["Vec2", "x"]);

    let get = trampoline(&w.vm, "Member", "get(_)");
    w.vm.set_slot_handle(0, &x);
    w.vm.set_slot_handle(1, &v2);
    get(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(3.0));

    let set = trampoline(&w.vm, "Member", "set(_,_)");
    w.vm.ensure_slots(3);
    w.vm.set_slot_handle(0, &x);
    w.vm.set_slot_handle(1, &v2);
    w.vm.set_slot_number(2, 9.5);
    set(&mut w.vm);

    w.vm.set_slot_handle(0, &x);
    w.vm.set_slot_handle(1, &v2);
    get(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(9.5));
}

#[test]
fn test_immutable_member_rejects_set() {
    let mut w = world();
    let ctor = resolve_constructor(&mut w.vm, "Vec2", 0.0);
    let v2 = construct_v2(&mut w.vm, &ctor, 3.0, 4.0);
    let y = resolve_meta(&mut w.vm, "Member", &["Vec2", "y"]);

    let set = trampoline(&w.vm, "Member", "set(_,_)");
    w.vm.ensure_slots(3);
    w.vm.set_slot_handle(0, &y);
    w.vm.set_slot_handle(1, &v2);
    w.vm.set_slot_number(2, 99.0);
    set(&mut w.vm);
    assert!(w.vm.slot(0).is_null());

    let get = trampoline(&w.vm, "Member", "get(_)");
    w.vm.set_slot_handle(0, &y);
    w.vm.set_slot_handle(1, &v2);
    get(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(4.0));
}

#[test]
fn test_method_call_converts_receiver() {
    let mut w = world();
    let ctor = resolve_constructor(&mut w.vm, "Vec2", 0.0);
    let v2 = construct_v2(&mut w.vm, &ctor, 3.0, 4.0);
    let length = resolve_meta(&mut w.vm, "Method", &["Vec2", "length"]);

    let call = trampoline(&w.vm, "Method", "call(_)");
    w.vm.set_slot_handle(0, &length);
    w.vm.set_slot_handle(1, &v2);
    call(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(5.0));
}

#[test]
fn test_operator_dispatches_through_function_path() {
    let mut w = world();
    let ctor = resolve_constructor(&mut w.vm, "Vec2", 0.0);
    let a = construct_v2(&mut w.vm, &ctor, 1.0, 2.0);
    let b = construct_v2(&mut w.vm, &ctor, 3.0, 4.0);
    let add = resolve_meta(&mut w.vm, "Operator", &["add", "Vec2"]);

    let call = trampoline(&w.vm, "Operator", "call(_,_)");
    w.vm.ensure_slots(3);
    w.vm.set_slot_handle(0, &add);
    w.vm.set_slot_handle(1, &a);
    w.vm.set_slot_handle(2, &b);
    call(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(11.0));
}

#[test]
fn test_static_get_set_and_type_check() {
    let mut w = world();
    let count = resolve_meta(&mut w.vm, "Static", &["Vec2", "count"]);
    let get = trampoline(&w.vm, "Static", "get()");
    let set = trampoline(&w.vm, "Static", "set(_)");

    w.vm.set_slot_handle(0, &count);
    get(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(0.0));

    w.vm.ensure_slots(2);
    w.vm.set_slot_handle(0, &count);
    w.vm.set_slot_number(1, 7.0);
    set(&mut w.vm);
    w.vm.set_slot_handle(0, &count);
    get(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(7.0));

    // A mistyped assignment is rejected and the stored value survives.
    w.vm.set_slot_handle(0, &count);
    w.vm.set_slot_string(1, "nope");
    set(&mut w.vm);
    assert!(w.vm.slot(0).is_null());
    w.vm.set_slot_handle(0, &count);
    get(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(7.0));
}

// ============================================================================
// Enums, sequences, nullable objects
// ============================================================================

#[test]
fn test_enum_crosses_as_variant_index() {
    let mut w = world();
    let flip = resolve_meta(&mut w.vm, "Function", &["math", "flip"]);
    let call = trampoline(&w.vm, "Function", "call(_)");

    w.vm.ensure_slots(2);
    w.vm.set_slot_handle(0, &flip);
    w.vm.set_slot_number(1, 0.0);
    call(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(1.0));

    // Out of range is a conversion failure, not a wrapped index.
    w.vm.set_slot_handle(0, &flip);
    w.vm.set_slot_number(1, 5.0);
    call(&mut w.vm);
    assert!(w.vm.slot(0).is_null());
}

#[test]
fn test_sequence_arguments_and_results() {
    let mut w = world();
    let total = resolve_meta(&mut w.vm, "Function", &["math", "total"]);
    let call = trampoline(&w.vm, "Function", "call(_)");

    w.vm.ensure_slots(3);
    w.vm.set_slot_handle(0, &total);
    w.vm.set_slot_new_list(1);
    for (index, n) in [1.0, 2.0, 4.0].iter().enumerate() {
        w.vm.set_slot_number(2, *n);
        w.vm.list_insert(1, index, 2);
    }
    call(&mut w.vm);
    assert_eq!(w.vm.slot(0).as_number(), Some(7.0));

    let iota = resolve_meta(&mut w.vm, "Function", &["math", "iota"]);
    w.vm.set_slot_handle(0, &iota);
    w.vm.set_slot_number(1, 3.0);
    call(&mut w.vm);
    match w.vm.slot(0) {
        SlotValue::List(items) => {
            let numbers: Vec<f64> = items.iter().filter_map(SlotValue::as_number).collect();
            assert_eq!(numbers, vec![0.0, 1.0, 2.0]);
        }
        other => panic!("expected a list result, got {other:?}"),
    }
}

#[test]
fn test_nullable_object_round_trip() {
    let mut w = world();
    let maybe = resolve_meta(&mut w.vm, "Function", &["math", "maybe"]);
    let call = trampoline(&w.vm, "Function", "call(_)");

    w.vm.ensure_slots(2);
    w.vm.set_slot_handle(0, &maybe);
    w.vm.set_slot_null(1);
    call(&mut w.vm);
    assert!(w.vm.slot(0).is_null());

    let payload = ObjectRef::new(w.node, 7i32);
    w.vm.set_slot_handle(0, &maybe);
    w.vm.set_foreign(
        1,
        ForeignInstance::reference(w.node, Value::Ref(payload.clone())),
    );
    call(&mut w.vm);
    let instance = w.vm.slot_foreign(0).unwrap();
    assert_eq!(instance.mode, PayloadMode::Reference);
    assert_eq!(instance.value.object(), Some(&payload));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_finalizer_destructs_owned_only() {
    let mut w = world();
    let ctor = resolve_constructor(&mut w.vm, "Vec2", 0.0);
    construct_v2(&mut w.vm, &ctor, 1.0, 2.0);
    let owned = w.vm.slot_foreign(0).unwrap().clone();

    let finalize = w
        .vm
        .foreign_class("main", "Vec2")
        .unwrap()
        .finalize
        .clone()
        .unwrap();
    assert_eq!(w.drops.get(), 0);
    finalize(&owned);
    assert_eq!(w.drops.get(), 1);

    let shared = ForeignInstance::reference(
        w.vec2,
        Value::Struct(ObjectRef::new(w.vec2, V2 { x: 0.0, y: 0.0 })),
    );
    finalize(&shared);
    assert_eq!(w.drops.get(), 1);
}

#[test]
fn test_type_new_resolves_declared_types_only() {
    let mut w = world();
    let type_new = w
        .vm
        .foreign_method("main", "Type", true, "new(_)")
        .unwrap();

    assert!(w.bridge.type_handle(w.vec2).is_none());
    w.vm.ensure_slots(2);
    w.vm.set_slot_string(1, "Vec2");
    type_new(&mut w.vm);
    assert!(!w.vm.slot(0).is_null());
    assert!(w.bridge.type_handle(w.vec2).is_some());

    w.vm.set_slot_string(1, "Ghost");
    type_new(&mut w.vm);
    assert!(w.vm.slot(0).is_null());
}
