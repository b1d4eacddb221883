//! Foreign allocation paths and the finalizer hook
//!
//! Two ways to allocate a reflected foreign object. The allocate-hook path
//! runs inside script construction, where the class under construction
//! already sits in slot 0. The staged path serves result marshalling and
//! virtual construction, where no class is on the slot array: the class
//! handle recorded at declaration is placed in a scratch slot above the
//! top first.

use std::rc::Rc;

use weft_reflect::{ObjectRef, TypeId, TypeKind, Value};
use weft_vm::{FinalizerFn, ForeignInstance, PayloadMode, ScriptVm};

use crate::context::BridgeCore;
use crate::error::BridgeError;

/// Payload for an object of `ty`: struct-value types carry `Value::Struct`
/// and copy across the boundary, everything else is a shared `Value::Ref`.
pub(crate) fn payload_value(core: &BridgeCore, ty: TypeId, object: ObjectRef) -> Value {
    match core.db.type_info(ty).kind {
        TypeKind::Struct => Value::Struct(object),
        _ => Value::Ref(object),
    }
}

/// Allocate an owned instance into `slot` with the class already present
/// in `class_slot`.
pub(crate) fn alloc_owned_at(
    vm: &mut dyn ScriptVm,
    slot: usize,
    class_slot: usize,
    ty: TypeId,
    value: Value,
) {
    vm.set_slot_new_foreign(slot, class_slot, ForeignInstance::owned(ty, value));
}

/// Allocate with the declared class handle staged in a scratch slot. Fails
/// as a dispatch miss when the type was never declared.
pub(crate) fn alloc_staged(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    instance: ForeignInstance,
) -> Result<(), BridgeError> {
    let Some(class) = core.class_handle(instance.type_id) else {
        let err = BridgeError::DispatchMiss {
            type_name: core.type_name(instance.type_id),
        };
        err.report();
        vm.set_slot_null(slot);
        return Err(err);
    };
    let scratch = vm.slot_count();
    vm.ensure_slots(scratch + 1);
    vm.set_slot_handle(scratch, &class);
    vm.set_slot_new_foreign(slot, scratch, instance);
    Ok(())
}

/// Push an independent copy of a struct-value payload.
pub(crate) fn push_owned(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    object: &ObjectRef,
) -> Result<(), BridgeError> {
    if object.is_null() {
        vm.set_slot_null(slot);
        return Ok(());
    }
    let ty = object.type_id();
    let Some(copy) = core.db.type_info(ty).copy.clone() else {
        let err = BridgeError::DispatchMiss {
            type_name: core.type_name(ty),
        };
        err.report();
        vm.set_slot_null(slot);
        return Err(err);
    };
    let copied = copy(object);
    let value = payload_value(core, ty, copied);
    alloc_staged(core, vm, slot, ForeignInstance::owned(ty, value))
}

/// Push a shared reference to a native object. The script side aliases the
/// referent and its finalizer leaves it alone.
pub(crate) fn push_reference(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    slot: usize,
    object: &ObjectRef,
) -> Result<(), BridgeError> {
    let ty = object.type_id();
    let value = payload_value(core, ty, object.clone());
    alloc_staged(core, vm, slot, ForeignInstance::reference(ty, value))
}

/// Finalizer installed on every declared foreign class. Owned payloads run
/// the type's destructor; references never do.
pub(crate) fn finalizer(core: &Rc<BridgeCore>) -> FinalizerFn {
    let core = core.clone();
    Rc::new(move |instance: &ForeignInstance| {
        if instance.mode != PayloadMode::OwnedCopy {
            return;
        }
        if let Some(destructor) = core.db.type_info(instance.type_id).destructor.clone() {
            destructor(&instance.value);
        }
    })
}
