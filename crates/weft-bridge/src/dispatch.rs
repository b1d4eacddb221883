//! Call dispatch — bindings, the per-call state machine, and trampolines
//!
//! Every script-to-native call runs the same sequence: resolve the
//! callable's binding, validate arity, convert arguments into the frame
//! buffer, invoke the native entry, convert the result back into slot 0.
//! Bindings are created lazily, one per callable, and reused for every
//! later call; the frame's `RefCell` turns an overlapping invocation of
//! the same binding into a reported error instead of a corrupted buffer.
//!
//! Trampolines are the foreign-method closures handed to the VM. Each one
//! reads its reflected descriptor out of the receiver slot, runs the state
//! machine, and on failure reports the error and leaves null in slot 0.
//! The script side never traps.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use weft_reflect::{Callable, ObjectRef, Value};
use weft_vm::{ForeignInstance, ForeignMethod, ScriptVm};

use crate::context::BridgeCore;
use crate::error::BridgeError;
use crate::foreign;
use crate::gateway;
use crate::marshal;
use crate::meta::MetaObject;

/// Reusable per-callable argument and result buffer.
#[derive(Debug)]
pub struct CallFrame {
    pub(crate) args: Vec<Value>,
    pub(crate) result: Value,
}

/// One callable's cached call state. Created on first dispatch and reused
/// for every call after, so its identity is stable.
pub struct CallBinding {
    pub(crate) callable: Rc<Callable>,
    pub(crate) frame: RefCell<CallFrame>,
}

impl CallBinding {
    pub(crate) fn new(callable: Rc<Callable>) -> Self {
        let frame = CallFrame {
            args: vec![Value::None; callable.arity()],
            result: Value::None,
        };
        CallBinding {
            callable,
            frame: RefCell::new(frame),
        }
    }

    pub fn callable(&self) -> &Rc<Callable> {
        &self.callable
    }
}

impl fmt::Debug for CallBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallBinding")
            .field("callable", &self.callable.name)
            .field("arity", &self.callable.arity())
            .finish()
    }
}

// ============================================================================
// The call state machine
// ============================================================================

fn reentrant(callable: &Callable) -> BridgeError {
    BridgeError::ReentrantCall {
        callable: callable.name.clone(),
    }
}

fn missing_descriptor() -> BridgeError {
    BridgeError::NotDeclared {
        what: "reflected descriptor in the receiver slot".to_owned(),
    }
}

/// Convert the provided slots into the frame's argument buffer, resetting
/// every unprovided parameter to its declared default. The reset is
/// unconditional: a longer previous call must never leak arguments into
/// this one.
fn convert_args(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    callable: &Callable,
    args: &mut [Value],
    first_slot: usize,
    provided: usize,
) -> Result<(), BridgeError> {
    for (index, param) in callable.params.iter().enumerate() {
        if index < provided {
            let slot = first_slot + index;
            let value = marshal::read_slot(core, vm, slot, param.ty);
            if value.is_none() {
                return Err(BridgeError::Conversion {
                    callable: callable.name.clone(),
                    param: param.name.clone(),
                    expected: core.type_name(param.ty),
                    got: format!("{:?}", vm.slot_kind(slot)),
                });
            }
            if value.is_null() && !param.nullable {
                return Err(BridgeError::Nullability {
                    callable: callable.name.clone(),
                    param: param.name.clone(),
                });
            }
            args[index] = value;
        } else {
            args[index] = param.default.clone().unwrap_or(Value::Null);
        }
    }
    Ok(())
}

/// Run one call: arity, conversion, entry, result. The result lands in
/// slot 0 only when the callable declares one and the entry produced one.
pub(crate) fn invoke_callable(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    callable: &Rc<Callable>,
    first_slot: usize,
    provided: usize,
    receiver: Option<&Value>,
) -> Result<(), BridgeError> {
    let binding = core.binding(callable);
    let required = callable.required_args();
    if provided < required {
        return Err(BridgeError::Arity {
            callable: callable.name.clone(),
            provided,
            required,
        });
    }
    let mut guard = binding
        .frame
        .try_borrow_mut()
        .map_err(|_| reentrant(callable))?;
    let frame = &mut *guard;
    convert_args(core, vm, callable, &mut frame.args, first_slot, provided)?;
    frame.result = (callable.entry)(receiver, &frame.args);
    if callable.result.is_some() && !frame.result.is_none() {
        // A result the writer cannot place crosses as null; the miss is
        // already reported.
        let _ = marshal::write_slot(core, vm, 0, &frame.result);
    }
    Ok(())
}

/// Report and leave a well-defined null behind. Trampolines never trap the
/// script side.
fn fail(vm: &mut dyn ScriptVm, err: BridgeError) {
    err.report();
    vm.ensure_slots(1);
    vm.set_slot_null(0);
}

// ============================================================================
// Trampolines
// ============================================================================

/// `Function.call(...)` at a fixed arity. Also behind `Operator.call`,
/// whose descriptor resolves to the operator's function.
pub(crate) fn function_trampoline(core: &Rc<BridgeCore>, args: usize) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(meta) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        let Some(function) = meta.as_function().cloned() else {
            return fail(vm, missing_descriptor());
        };
        if let Err(err) = invoke_callable(&core, vm, &function, 1, args, None) {
            fail(vm, err);
        }
    })
}

/// `Method.call(object, ...)`: the receiver converts as the method's
/// owning type, then arguments follow from slot 2.
pub(crate) fn method_trampoline(core: &Rc<BridgeCore>, args: usize) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::Method(method)) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        let Some(owner) = method.object_type else {
            return fail(vm, missing_descriptor());
        };
        let receiver = marshal::read_slot(&core, vm, 1, owner);
        if receiver.is_none() {
            let got = format!("{:?}", vm.slot_kind(1));
            return fail(
                vm,
                BridgeError::Conversion {
                    callable: method.name.clone(),
                    param: "this".to_owned(),
                    expected: core.type_name(owner),
                    got,
                },
            );
        }
        if receiver.is_null() {
            return fail(
                vm,
                BridgeError::Nullability {
                    callable: method.name.clone(),
                    param: "this".to_owned(),
                },
            );
        }
        if let Err(err) = invoke_callable(&core, vm, &method, 2, args, Some(&receiver)) {
            fail(vm, err);
        }
    })
}

/// Allocate hook for declared classes. `new_impl` passes the constructor
/// descriptor in slot 1 and every declared argument after it; the class
/// under construction sits in slot 0.
pub(crate) fn construct_trampoline(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::Constructor(ctor)) = MetaObject::from_slot(&*vm, 1) else {
            return fail(vm, missing_descriptor());
        };
        if let Err(err) = construct(&core, vm, &ctor) {
            fail(vm, err);
        }
    })
}

fn construct(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    ctor: &Rc<Callable>,
) -> Result<(), BridgeError> {
    let Some(ty) = ctor.object_type else {
        return Err(missing_descriptor());
    };
    let binding = core.binding(ctor);
    let mut guard = binding
        .frame
        .try_borrow_mut()
        .map_err(|_| reentrant(ctor))?;
    let frame = &mut *guard;
    // The generated wrapper passes every declared argument, so arity is
    // exact. A failed conversion allocates nothing.
    convert_args(core, vm, ctor, &mut frame.args, 2, ctor.arity())?;
    frame.result = (ctor.entry)(None, &frame.args);
    let Some(object) = frame.result.object().cloned() else {
        return Err(BridgeError::Conversion {
            callable: ctor.name.clone(),
            param: "result".to_owned(),
            expected: core.type_name(ty),
            got: frame.result.tag_name().to_owned(),
        });
    };
    let value = foreign::payload_value(core, ty, object);
    foreign::alloc_owned_at(vm, 0, 0, ty, value);
    Ok(())
}

/// `VirtualConstructor.call(...)`: construct a native object whose virtual
/// methods dispatch back into script. The trailing constructor parameter
/// receives the injected gateway hook; a single extra script argument, if
/// present, is captured as the reverse-call receiver.
pub(crate) fn construct_interface_trampoline(core: &Rc<BridgeCore>, args: usize) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::VirtualCtor(ctor)) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        if let Err(err) = construct_interface(&core, vm, &ctor, args) {
            fail(vm, err);
        }
    })
}

fn construct_interface(
    core: &Rc<BridgeCore>,
    vm: &mut dyn ScriptVm,
    ctor: &Rc<Callable>,
    provided: usize,
) -> Result<(), BridgeError> {
    let hook_ty = core.db.builtins().virtual_method;
    let Some(ty) = ctor.object_type else {
        return Err(missing_descriptor());
    };
    match ctor.params.last() {
        Some(param) if param.ty == hook_ty => {}
        _ => {
            return Err(BridgeError::NotDeclared {
                what: format!(
                    "virtual hook parameter on the constructor of `{}`",
                    core.type_name(ty)
                ),
            })
        }
    }
    let fillable = ctor.arity() - 1;
    // When script passes one argument more than the constructor can take,
    // that argument is the implementing object: it becomes the reverse
    // receiver and is never marshalled.
    let first_arg_slot = if provided == fillable {
        1
    } else if provided == fillable + 1 {
        2
    } else {
        return Err(BridgeError::Arity {
            callable: ctor.name.clone(),
            provided,
            required: fillable,
        });
    };

    let binding = core.binding(ctor);
    let mut guard = binding
        .frame
        .try_borrow_mut()
        .map_err(|_| reentrant(ctor))?;
    let frame = &mut *guard;
    convert_args(core, vm, ctor, &mut frame.args, first_arg_slot, fillable)?;

    let receiver: gateway::ReceiverCell = Rc::new(RefCell::new(None));
    if provided == fillable + 1 {
        let handle = vm.slot_handle(1);
        core.retain(handle);
        *receiver.borrow_mut() = Some(gateway::ScriptRef::Object(handle));
    }
    let hook = gateway::virtual_hook(core, &receiver);
    frame.args[fillable] = Value::Ref(ObjectRef::new(hook_ty, hook));

    frame.result = (ctor.entry)(None, &frame.args);
    let Some(object) = frame.result.object().cloned() else {
        return Err(BridgeError::Conversion {
            callable: ctor.name.clone(),
            param: "result".to_owned(),
            expected: core.type_name(ty),
            got: frame.result.tag_name().to_owned(),
        });
    };
    // With no script-side object to call back into, the constructed native
    // object itself receives the reverse calls.
    if receiver.borrow().is_none() {
        *receiver.borrow_mut() = Some(gateway::ScriptRef::Native(Value::Ref(object.clone())));
    }
    let value = foreign::payload_value(core, ty, object);
    foreign::alloc_staged(core, vm, 0, ForeignInstance::owned(ty, value))
}

/// `Member.get(object)`.
pub(crate) fn member_get_trampoline(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::Member { owner, index }) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        let Some(member) = owner.members.get(index) else {
            return fail(vm, missing_descriptor());
        };
        let object = match member_receiver(&core, vm, &owner.name, &member.name, owner.id) {
            Ok(object) => object,
            Err(err) => return fail(vm, err),
        };
        let value = (member.get)(&object);
        let _ = marshal::write_slot(&core, vm, 0, &value);
    })
}

/// `Member.set(object, value)`.
pub(crate) fn member_set_trampoline(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::Member { owner, index }) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        let Some(member) = owner.members.get(index) else {
            return fail(vm, missing_descriptor());
        };
        let qualified = format!("{}.{}", owner.name, member.name);
        let Some(setter) = member.set.clone() else {
            return fail(
                vm,
                BridgeError::NotDeclared {
                    what: format!("setter for `{qualified}`"),
                },
            );
        };
        let object = match member_receiver(&core, vm, &owner.name, &member.name, owner.id) {
            Ok(object) => object,
            Err(err) => return fail(vm, err),
        };
        let value = marshal::read_slot(&core, vm, 2, member.ty);
        if value.is_none() {
            let got = format!("{:?}", vm.slot_kind(2));
            return fail(
                vm,
                BridgeError::Conversion {
                    callable: qualified,
                    param: member.name.clone(),
                    expected: core.type_name(member.ty),
                    got,
                },
            );
        }
        if value.is_null() && !member.nullable {
            return fail(
                vm,
                BridgeError::Nullability {
                    callable: qualified,
                    param: member.name.clone(),
                },
            );
        }
        setter(&object, &value);
    })
}

fn member_receiver(
    core: &BridgeCore,
    vm: &mut dyn ScriptVm,
    owner_name: &str,
    member_name: &str,
    owner: weft_reflect::TypeId,
) -> Result<Value, BridgeError> {
    let object = marshal::read_slot(core, vm, 1, owner);
    if object.is_none() {
        return Err(BridgeError::Conversion {
            callable: format!("{owner_name}.{member_name}"),
            param: "this".to_owned(),
            expected: owner_name.to_owned(),
            got: format!("{:?}", vm.slot_kind(1)),
        });
    }
    if object.is_null() {
        return Err(BridgeError::Nullability {
            callable: format!("{owner_name}.{member_name}"),
            param: "this".to_owned(),
        });
    }
    Ok(object)
}

/// `Static.get()`, through the synthesized getter callable.
pub(crate) fn static_get_trampoline(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::Static { owner, index }) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        let Some(st) = owner.statics.get(index) else {
            return fail(vm, missing_descriptor());
        };
        let getter = st.getter.clone();
        if let Err(err) = invoke_callable(&core, vm, &getter, 1, 0, None) {
            fail(vm, err);
        }
    })
}

/// `Static.set(value)`, through the synthesized setter callable. Type and
/// nullability checks ride the normal conversion path.
pub(crate) fn static_set_trampoline(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let Some(MetaObject::Static { owner, index }) = MetaObject::from_slot(&*vm, 0) else {
            return fail(vm, missing_descriptor());
        };
        let Some(st) = owner.statics.get(index) else {
            return fail(vm, missing_descriptor());
        };
        let setter = st.setter.clone();
        if let Err(err) = invoke_callable(&core, vm, &setter, 1, 1, None) {
            fail(vm, err);
        }
    })
}
