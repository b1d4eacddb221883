//! Slot marshalling — native values to and from VM slots
//!
//! Read dispatch is keyed by the *expected* native type, never by the
//! slot's runtime tag: the parameter type picks the conversion, and a slot
//! that cannot satisfy it yields `Value::None`. A `Null` slot reads as
//! `Value::Null` for every expected type; nullability is judged later by
//! the dispatch layer, which knows the parameter.
//!
//! Write dispatch is a closed match on the value tag. Primitive readers
//! and writers live in open tables registered once at bridge construction;
//! object values go through the foreign allocation paths.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use weft_reflect::{ReflectionDb, Scalar, ScalarKind, TypeDescriptor, TypeId, TypeKind, Value};
use weft_vm::{ScriptVm, SlotKind};

use crate::context::BridgeCore;
use crate::error::BridgeError;
use crate::foreign;

/// Reads one slot as a specific primitive type.
pub type ReadFn = Rc<dyn Fn(&mut dyn ScriptVm, usize) -> Value>;

/// Writes one primitive value into a slot.
pub type WriteFn = Rc<dyn Fn(&mut dyn ScriptVm, usize, &Value)>;

/// Writer table key: one entry per primitive category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Scalar(ScalarKind),
    Bool,
    Str,
}

const ALL_SCALARS: [ScalarKind; 10] = [
    ScalarKind::I8,
    ScalarKind::I16,
    ScalarKind::I32,
    ScalarKind::I64,
    ScalarKind::U8,
    ScalarKind::U16,
    ScalarKind::U32,
    ScalarKind::U64,
    ScalarKind::F32,
    ScalarKind::F64,
];

/// The open codec tables. Populated by [`default_codecs`] when the bridge
/// is constructed, read-only afterwards.
pub struct Codecs {
    readers: FxHashMap<TypeId, ReadFn>,
    writers: FxHashMap<PrimitiveKind, WriteFn>,
}

impl Codecs {
    pub fn new() -> Self {
        Codecs {
            readers: FxHashMap::default(),
            writers: FxHashMap::default(),
        }
    }

    pub fn register_reader(&mut self, ty: TypeId, reader: ReadFn) {
        self.readers.insert(ty, reader);
    }

    pub fn register_writer(&mut self, kind: PrimitiveKind, writer: WriteFn) {
        self.writers.insert(kind, writer);
    }

    pub(crate) fn reader(&self, ty: TypeId) -> Option<&ReadFn> {
        self.readers.get(&ty)
    }

    pub(crate) fn writer(&self, kind: PrimitiveKind) -> Option<&WriteFn> {
        self.writers.get(&kind)
    }
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codecs")
            .field("readers", &self.readers.len())
            .field("writers", &self.writers.len())
            .finish()
    }
}

fn scalar_reader(kind: ScalarKind) -> ReadFn {
    Rc::new(move |vm, slot| {
        if vm.slot_kind(slot) == SlotKind::Number {
            Value::Number(Scalar::from_f64(kind, vm.slot_number(slot)))
        } else {
            Value::None
        }
    })
}

fn bool_reader() -> ReadFn {
    Rc::new(|vm, slot| {
        if vm.slot_kind(slot) == SlotKind::Bool {
            Value::Bool(vm.slot_bool(slot))
        } else {
            Value::None
        }
    })
}

fn string_reader() -> ReadFn {
    Rc::new(|vm, slot| {
        if vm.slot_kind(slot) == SlotKind::String {
            Value::String(vm.slot_string(slot))
        } else {
            Value::None
        }
    })
}

/// Reader registered for the `Type` meta id: any reflected foreign slot
/// reads as whatever it carries, untyped.
fn untyped_ref_reader() -> ReadFn {
    Rc::new(|vm, slot| match vm.slot_foreign(slot) {
        Some(instance) => instance.value.clone(),
        None => Value::None,
    })
}

fn number_writer() -> WriteFn {
    Rc::new(|vm, slot, value| vm.set_slot_number(slot, value.as_f64().unwrap_or(0.0)))
}

fn bool_writer() -> WriteFn {
    Rc::new(|vm, slot, value| vm.set_slot_bool(slot, value.as_bool().unwrap_or(false)))
}

fn string_writer() -> WriteFn {
    Rc::new(|vm, slot, value| vm.set_slot_string(slot, value.as_str().unwrap_or("")))
}

/// Tables covering every builtin primitive plus the polymorphic reflected
/// `Type` reader.
pub fn default_codecs(db: &ReflectionDb) -> Codecs {
    let b = db.builtins();
    let mut codecs = Codecs::new();
    for kind in ALL_SCALARS {
        codecs.register_reader(b.scalar(kind), scalar_reader(kind));
        codecs.register_writer(PrimitiveKind::Scalar(kind), number_writer());
    }
    codecs.register_reader(b.boolean, bool_reader());
    codecs.register_writer(PrimitiveKind::Bool, bool_writer());
    codecs.register_reader(b.string, string_reader());
    codecs.register_writer(PrimitiveKind::Str, string_writer());
    codecs.register_reader(b.type_meta, untyped_ref_reader());
    codecs
}

// ============================================================================
// Reading
// ============================================================================

/// Read `slot` as a value of the expected type. `Value::None` means no
/// applicable conversion; a null slot is `Value::Null` for any type.
pub(crate) fn read_slot(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    expected: TypeId,
) -> Value {
    if vm.slot_kind(slot) == SlotKind::Null {
        return Value::Null;
    }
    if let Some(reader) = core.codecs.reader(expected) {
        return reader(vm, slot);
    }
    let descriptor = core.db.type_info(expected).clone();
    if let Some(content) = descriptor.sequence_of {
        return read_sequence(core, vm, slot, content);
    }
    match descriptor.kind {
        TypeKind::Enum => read_enum(vm, slot, &descriptor),
        TypeKind::Struct | TypeKind::Object => read_object(core, vm, slot, expected),
        TypeKind::Primitive => Value::None,
    }
}

fn read_enum(vm: &mut dyn ScriptVm, slot: usize, descriptor: &TypeDescriptor) -> Value {
    if vm.slot_kind(slot) != SlotKind::Number {
        return Value::None;
    }
    let number = vm.slot_number(slot);
    if number < 0.0 {
        return Value::None;
    }
    let index = number as u32;
    match descriptor.variant(index) {
        Some(_) => Value::Enum {
            ty: descriptor.id,
            index,
        },
        None => Value::None,
    }
}

fn read_sequence(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    content: TypeId,
) -> Value {
    if vm.slot_kind(slot) != SlotKind::List {
        return Value::None;
    }
    let count = vm.list_count(slot);
    // Elements extract into a scratch slot above the current top, so the
    // argument slots stay untouched.
    let scratch = vm.slot_count();
    vm.ensure_slots(scratch + 1);
    let mut items = Vec::with_capacity(count);
    for index in 0..count {
        vm.list_element(slot, index, scratch);
        let element = read_slot(core, vm, scratch, content);
        if element.is_none() {
            return Value::None;
        }
        items.push(element);
    }
    Value::Sequence { content, items }
}

fn read_object(core: &BridgeCore, vm: &mut dyn ScriptVm, slot: usize, expected: TypeId) -> Value {
    if vm.slot_kind(slot) != SlotKind::Foreign {
        return Value::None;
    }
    let Some(instance) = vm.slot_foreign(slot) else {
        return Value::None;
    };
    if !core.db.is_a(instance.type_id, expected) {
        return Value::None;
    }
    instance.value.clone()
}

// ============================================================================
// Writing
// ============================================================================

/// Write a value into `slot`. A value the tables cannot place crosses as
/// null and comes back as a `DispatchMiss`, already reported.
pub(crate) fn write_slot(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    value: &Value,
) -> Result<(), BridgeError> {
    match value {
        Value::None | Value::Null => {
            vm.set_slot_null(slot);
            Ok(())
        }
        Value::Bool(_) => write_primitive(core, vm, slot, PrimitiveKind::Bool, value),
        Value::Number(scalar) => {
            write_primitive(core, vm, slot, PrimitiveKind::Scalar(scalar.kind()), value)
        }
        Value::String(_) => write_primitive(core, vm, slot, PrimitiveKind::Str, value),
        Value::Enum { index, .. } => {
            vm.set_slot_number(slot, f64::from(*index));
            Ok(())
        }
        Value::Sequence { items, .. } => write_sequence(core, vm, slot, items),
        Value::Struct(object) => foreign::push_owned(core, vm, slot, object),
        Value::Ref(object) => {
            if object.is_null() {
                vm.set_slot_null(slot);
                Ok(())
            } else {
                foreign::push_reference(core, vm, slot, object)
            }
        }
    }
}

fn write_primitive(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    kind: PrimitiveKind,
    value: &Value,
) -> Result<(), BridgeError> {
    match core.codecs.writer(kind) {
        Some(writer) => {
            writer(vm, slot, value);
            Ok(())
        }
        None => {
            let err = BridgeError::DispatchMiss {
                type_name: format!("{kind:?}"),
            };
            err.report();
            vm.set_slot_null(slot);
            Err(err)
        }
    }
}

fn write_sequence(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    items: &[Value],
) -> Result<(), BridgeError> {
    vm.set_slot_new_list(slot);
    let scratch = vm.slot_count();
    vm.ensure_slots(scratch + 1);
    for (index, item) in items.iter().enumerate() {
        // A missed element was reported and crossed as null; the list
        // keeps its shape and order.
        let _ = write_slot(core, vm, scratch, item);
        vm.list_insert(slot, index, scratch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BridgeConfig;
    use std::rc::Rc;
    use weft_reflect::{copy_of, ClassBuilder, DbBuilder, ObjectRef, Param};
    use weft_vm::{ForeignInstance, MockVm, SlotValue};

    #[derive(Clone)]
    struct Probe {
        tag: i32,
    }

    struct Fixture {
        core: BridgeCore,
        probe: TypeId,
        node: TypeId,
        leaf: TypeId,
        axis: TypeId,
        floats: TypeId,
    }

    fn fixture() -> Fixture {
        let mut builder = DbBuilder::new();
        let b = builder.builtins().clone();
        let probe = builder
            .add_class(
                ClassBuilder::new("Probe", TypeKind::Struct)
                    .constructor(vec![Param::new("tag", b.i32)], |_, _| Value::None)
                    .copy_with(copy_of::<Probe>()),
            )
            .unwrap();
        let node = builder
            .add_class(ClassBuilder::new("Node", TypeKind::Object))
            .unwrap();
        let leaf = builder
            .add_class(ClassBuilder::new("Leaf", TypeKind::Object).base(node))
            .unwrap();
        let axis = builder
            .add_enum(
                weft_reflect::EnumBuilder::new("Axis")
                    .variant("X", 0)
                    .variant("Y", 1),
            )
            .unwrap();
        let floats = builder.add_sequence("Vec<f32>", b.f32).unwrap();
        let db = Rc::new(builder.build().unwrap());
        Fixture {
            core: BridgeCore::new(db, BridgeConfig::default()),
            probe,
            node,
            leaf,
            axis,
            floats,
        }
    }

    /// Seed a class handle so object pushes have something to stage.
    fn seed_class_handle(core: &BridgeCore, vm: &mut MockVm, ty: TypeId, name: &str) {
        vm.set_variable("main", name, SlotValue::Object(format!("class {name}")));
        vm.ensure_slots(1);
        vm.get_variable("main", name, 0);
        let handle = vm.slot_handle(0);
        core.store_class_handle(vm, ty, handle);
    }

    #[test]
    fn test_scalar_round_trip_every_width() {
        let fx = fixture();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        let b = fx.core.db.builtins().clone();
        for kind in ALL_SCALARS {
            let value = Value::Number(Scalar::from_f64(kind, 42.0));
            write_slot(&fx.core, &mut vm, 0, &value).unwrap();
            let back = read_slot(&fx.core, &mut vm, 0, b.scalar(kind));
            assert_eq!(back, value, "round trip failed for {kind:?}");
        }
    }

    #[test]
    fn test_narrowing_truncates() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        vm.set_slot_number(0, 2.9);
        assert_eq!(
            read_slot(&fx.core, &mut vm, 0, b.i32),
            Value::Number(Scalar::I32(2))
        );
        vm.set_slot_number(0, -3.7);
        assert_eq!(
            read_slot(&fx.core, &mut vm, 0, b.i64),
            Value::Number(Scalar::I64(-3))
        );
    }

    #[test]
    fn test_bool_and_string_round_trip() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);

        write_slot(&fx.core, &mut vm, 0, &Value::Bool(true)).unwrap();
        assert_eq!(read_slot(&fx.core, &mut vm, 0, b.boolean), Value::Bool(true));

        write_slot(&fx.core, &mut vm, 0, &Value::String("hi".to_owned())).unwrap();
        assert_eq!(
            read_slot(&fx.core, &mut vm, 0, b.string),
            Value::String("hi".to_owned())
        );
    }

    #[test]
    fn test_wrong_slot_kind_reads_none() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        vm.set_slot_string(0, "not a number");
        assert!(read_slot(&fx.core, &mut vm, 0, b.f32).is_none());
        assert!(read_slot(&fx.core, &mut vm, 0, b.boolean).is_none());
        assert!(read_slot(&fx.core, &mut vm, 0, fx.axis).is_none());
        assert!(read_slot(&fx.core, &mut vm, 0, fx.node).is_none());
    }

    #[test]
    fn test_null_slot_reads_null_for_any_type() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        vm.set_slot_null(0);
        for expected in [b.f32, b.string, b.boolean, fx.node, fx.axis, fx.floats] {
            assert!(read_slot(&fx.core, &mut vm, 0, expected).is_null());
        }
    }

    #[test]
    fn test_enum_read_and_write() {
        let fx = fixture();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);

        vm.set_slot_number(0, 1.0);
        assert_eq!(
            read_slot(&fx.core, &mut vm, 0, fx.axis),
            Value::Enum {
                ty: fx.axis,
                index: 1
            }
        );

        // Out of range and negative indices fail the conversion.
        vm.set_slot_number(0, 9.0);
        assert!(read_slot(&fx.core, &mut vm, 0, fx.axis).is_none());
        vm.set_slot_number(0, -1.0);
        assert!(read_slot(&fx.core, &mut vm, 0, fx.axis).is_none());

        write_slot(
            &fx.core,
            &mut vm,
            0,
            &Value::Enum {
                ty: fx.axis,
                index: 1,
            },
        )
        .unwrap();
        assert_eq!(vm.slot(0).as_number(), Some(1.0));
    }

    #[test]
    fn test_sequence_read_preserves_order() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(2);
        vm.set_slot_new_list(0);
        for (index, n) in [1.5, 2.5, 3.5].iter().enumerate() {
            vm.set_slot_number(1, *n);
            vm.list_insert(0, index, 1);
        }

        let value = read_slot(&fx.core, &mut vm, 0, fx.floats);
        match value {
            Value::Sequence { content, items } => {
                assert_eq!(content, b.f32);
                assert_eq!(
                    items,
                    vec![
                        Value::Number(Scalar::F32(1.5)),
                        Value::Number(Scalar::F32(2.5)),
                        Value::Number(Scalar::F32(3.5)),
                    ]
                );
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn test_sequence_bad_element_poisons_read() {
        let fx = fixture();
        let mut vm = MockVm::new();
        vm.ensure_slots(2);
        vm.set_slot_new_list(0);
        vm.set_slot_number(1, 1.0);
        vm.list_insert(0, 0, 1);
        vm.set_slot_string(1, "oops");
        vm.list_insert(0, 1, 1);
        assert!(read_slot(&fx.core, &mut vm, 0, fx.floats).is_none());
    }

    #[test]
    fn test_sequence_write_preserves_order() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        let value = Value::sequence(
            b.f32,
            vec![
                Value::Number(Scalar::F32(10.0)),
                Value::Number(Scalar::F32(20.0)),
                Value::Number(Scalar::F32(30.0)),
            ],
        );
        write_slot(&fx.core, &mut vm, 0, &value).unwrap();
        assert_eq!(vm.list_count(0), 3);
        let mut out = Vec::new();
        let scratch = vm.slot_count();
        vm.ensure_slots(scratch + 1);
        for index in 0..3 {
            vm.list_element(0, index, scratch);
            out.push(vm.slot_number(scratch));
        }
        assert_eq!(out, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_struct_write_allocates_owned_copy() {
        let fx = fixture();
        let mut vm = MockVm::new();
        seed_class_handle(&fx.core, &mut vm, fx.probe, "Probe");
        vm.ensure_slots(1);

        let source = ObjectRef::new(fx.probe, Probe { tag: 5 });
        write_slot(&fx.core, &mut vm, 0, &Value::Struct(source.clone())).unwrap();

        let instance = vm.slot_foreign(0).unwrap().clone();
        assert_eq!(instance.mode, weft_vm::PayloadMode::OwnedCopy);
        assert_eq!(instance.type_id, fx.probe);
        let copied = instance.value.object().unwrap().clone();
        // Independent copy: mutating the source must not reach it.
        source.with_mut(|p: &mut Probe| p.tag = 99);
        assert_eq!(copied.with(|p: &Probe| p.tag), Some(5));
    }

    #[test]
    fn test_ref_write_shares_object() {
        let fx = fixture();
        let mut vm = MockVm::new();
        seed_class_handle(&fx.core, &mut vm, fx.node, "Node");
        vm.ensure_slots(1);

        let object = ObjectRef::new(fx.node, String::from("payload"));
        write_slot(&fx.core, &mut vm, 0, &Value::Ref(object.clone())).unwrap();

        let instance = vm.slot_foreign(0).unwrap().clone();
        assert_eq!(instance.mode, weft_vm::PayloadMode::Reference);
        assert_eq!(instance.value.object(), Some(&object));
    }

    #[test]
    fn test_null_ref_round_trips_as_null() {
        let fx = fixture();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        write_slot(&fx.core, &mut vm, 0, &Value::Ref(ObjectRef::null(fx.node))).unwrap();
        assert!(vm.slot(0).is_null());
        assert!(read_slot(&fx.core, &mut vm, 0, fx.node).is_null());
    }

    #[test]
    fn test_push_without_class_handle_is_dispatch_miss() {
        let fx = fixture();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        vm.set_slot_number(0, 7.0);
        let object = ObjectRef::new(fx.node, ());
        let err = write_slot(&fx.core, &mut vm, 0, &Value::Ref(object)).unwrap_err();
        assert!(matches!(err, BridgeError::DispatchMiss { .. }));
        // The miss still leaves a well-defined slot.
        assert!(vm.slot(0).is_null());
    }

    #[test]
    fn test_struct_without_copy_fn_is_dispatch_miss() {
        let fx = fixture();
        let mut vm = MockVm::new();
        seed_class_handle(&fx.core, &mut vm, fx.node, "Node");
        vm.ensure_slots(1);
        // Node has no copy fn; pushing it as a struct value cannot work.
        let object = ObjectRef::new(fx.node, ());
        let err = write_slot(&fx.core, &mut vm, 0, &Value::Struct(object)).unwrap_err();
        assert!(matches!(err, BridgeError::DispatchMiss { .. }));
    }

    #[test]
    fn test_object_read_checks_subtype() {
        let fx = fixture();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        let leaf = ObjectRef::new(fx.leaf, ());
        vm.set_foreign(0, ForeignInstance::reference(fx.leaf, Value::Ref(leaf.clone())));

        // A Leaf satisfies an expected Node, not the other way around.
        assert_eq!(read_slot(&fx.core, &mut vm, 0, fx.node), Value::Ref(leaf));
        assert!(read_slot(&fx.core, &mut vm, 0, fx.probe).is_none());
    }

    #[test]
    fn test_untyped_type_reader_accepts_any_foreign() {
        let fx = fixture();
        let b = fx.core.db.builtins().clone();
        let mut vm = MockVm::new();
        vm.ensure_slots(1);
        let object = ObjectRef::new(fx.node, ());
        vm.set_foreign(
            0,
            ForeignInstance::reference(fx.node, Value::Ref(object.clone())),
        );
        assert_eq!(
            read_slot(&fx.core, &mut vm, 0, b.type_meta),
            Value::Ref(object)
        );
    }
}
