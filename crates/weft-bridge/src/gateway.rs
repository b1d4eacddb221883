//! Reverse calls — native code invoking script methods
//!
//! A reverse call pushes the receiver into slot 0, marshals the arguments
//! into slots 1.., and fires the call handle recorded for the method at
//! declaration. Virtually constructed objects carry a [`VirtualMethod`]
//! closure built here: invoking it routes the call to the receiver
//! captured at construction, so a native `update()` lands in the script
//! implementation.
//!
//! The VM is threaded in as a parameter on every reverse call. Native
//! entry points never hold it, so whoever drives the VM (the embedder's
//! main loop) supplies it at the moment of the call.

use std::cell::RefCell;
use std::rc::Rc;

use weft_reflect::{Callable, Value};
use weft_vm::{ScriptVm, VmHandle};

use crate::context::BridgeCore;
use crate::error::BridgeError;
use crate::marshal;

/// Receiver of a reverse call.
#[derive(Debug, Clone)]
pub enum ScriptRef {
    /// A script-owned object pinned by handle.
    Object(VmHandle),
    /// A native value pushed through the marshalling layer at call time.
    Native(Value),
}

/// Closure stored on a virtually constructed object for its script-side
/// methods. Invoking it performs the reverse call against the receiver
/// captured at construction.
pub type VirtualMethod = Rc<dyn Fn(&mut dyn ScriptVm, &Rc<Callable>, &[Value]) -> Value>;

/// Extract the injected hook out of a constructor argument.
pub fn hook_from_value(value: &Value) -> Option<VirtualMethod> {
    value.object()?.with(|hook: &VirtualMethod| hook.clone())
}

pub(crate) type ReceiverCell = Rc<RefCell<Option<ScriptRef>>>;

/// Call a declared script method on `receiver`. The result converts per
/// the method's declared type; a void method yields `Value::None`.
pub(crate) fn call_script(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    receiver: &ScriptRef,
    method: &Rc<Callable>,
    args: &[Value],
) -> Result<Value, BridgeError> {
    let Some(handle) = core.method_handle(method.id) else {
        return Err(BridgeError::NotDeclared {
            what: format!("call handle for method `{}`", method.name),
        });
    };
    if args.len() != method.arity() {
        return Err(BridgeError::Arity {
            callable: method.name.clone(),
            provided: args.len(),
            required: method.arity(),
        });
    }
    vm.ensure_slots(1 + args.len());
    match receiver {
        ScriptRef::Object(object) => vm.set_slot_handle(0, object),
        ScriptRef::Native(value) => marshal::write_slot(core, vm, 0, value)?,
    }
    for (index, arg) in args.iter().enumerate() {
        marshal::write_slot(core, vm, 1 + index, arg)?;
    }
    vm.call(&handle)?;
    match method.result {
        Some(ty) => Ok(marshal::read_slot(core, vm, 0, ty)),
        None => Ok(Value::None),
    }
}

/// Build the hook injected into a virtual constructor. The receiver cell
/// fills during construction; a call that somehow arrives before then is
/// reported and yields no value.
pub(crate) fn virtual_hook(core: &Rc<BridgeCore>, receiver: &ReceiverCell) -> VirtualMethod {
    let core = core.clone();
    let receiver = receiver.clone();
    Rc::new(
        move |vm: &mut dyn ScriptVm, method: &Rc<Callable>, args: &[Value]| {
            let target = receiver.borrow().clone();
            let Some(target) = target else {
                log::error!(
                    "virtual call to `{}` before construction completed",
                    method.name
                );
                return Value::None;
            };
            match call_script(&core, vm, &target, method, args) {
                Ok(value) => value,
                Err(err) => {
                    err.report();
                    Value::None
                }
            }
        },
    )
}
