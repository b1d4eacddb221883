//! Foreign-hook registration — wiring allocators and trampolines to the VM
//!
//! The prelude classes resolve reflected descriptors from the string
//! arguments script passes to `ref(...)`; their allocators run the lookup
//! and leave a meta foreign (or null, with the failure logged) in slot 0.
//! Generated classes get the construct trampoline as their allocate hook
//! and the payload finalizer. Signatures registered here must match the
//! prelude and the generated declarations exactly.

use std::rc::Rc;

use weft_reflect::{ObjectRef, TypeId, Value};
use weft_vm::{ForeignClassHooks, ForeignInstance, ForeignMethod, ScriptVm, SlotKind};

use crate::context::BridgeCore;
use crate::declgen;
use crate::dispatch;
use crate::foreign;
use crate::meta::MetaObject;

const MAIN: &str = "main";

fn read_string_arg(vm: &dyn ScriptVm, slot: usize) -> Option<String> {
    if vm.slot_kind(slot) == SlotKind::String {
        Some(vm.slot_string(slot))
    } else {
        None
    }
}

fn read_index_arg(vm: &dyn ScriptVm, slot: usize) -> Option<usize> {
    if vm.slot_kind(slot) != SlotKind::Number {
        return None;
    }
    let n = vm.slot_number(slot);
    if n < 0.0 {
        return None;
    }
    Some(n as usize)
}

/// Allocate a meta instance into slot 0. Allocators run during script
/// construction, so the class is already in slot 0.
fn alloc_meta(vm: &mut dyn ScriptVm, ty: TypeId, meta: MetaObject) {
    let payload = Value::Ref(ObjectRef::new(ty, meta));
    vm.set_slot_new_foreign(0, 0, ForeignInstance::reference(ty, payload));
}

fn resolve_failed(vm: &mut dyn ScriptVm, class: &str, detail: &str) {
    log::error!("{class}.ref: no reflected {detail}");
    vm.set_slot_null(0);
}

/// `Function.ref(namespace, name)`.
fn function_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let namespace = read_string_arg(&*vm, 1);
        let name = read_string_arg(&*vm, 2);
        let resolved = match (&namespace, &name) {
            (Some(ns), Some(n)) => core.db.find_function(ns, n).cloned(),
            _ => None,
        };
        match resolved {
            Some(function) => alloc_meta(
                vm,
                core.db.builtins().function_meta,
                MetaObject::Function(function),
            ),
            None => resolve_failed(
                vm,
                "Function",
                &format!(
                    "function `{}.{}`",
                    namespace.as_deref().unwrap_or("?"),
                    name.as_deref().unwrap_or("?")
                ),
            ),
        }
    })
}

/// Shared by `Type.ref(name)` and `Type.new(name)`: resolve the type,
/// allocate its meta instance, and record the type handle so native code
/// can reach the resolved object later.
fn type_resolver(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let name = read_string_arg(&*vm, 1);
        let resolved = name.as_deref().and_then(|n| core.db.find_type(n).cloned());
        match resolved {
            Some(ty) => {
                alloc_meta(vm, core.db.builtins().type_meta, MetaObject::Type(ty.clone()));
                let handle = vm.slot_handle(0);
                core.store_type_handle(vm, ty.id, handle);
            }
            None => resolve_failed(
                vm,
                "Type",
                &format!("type `{}`", name.as_deref().unwrap_or("?")),
            ),
        }
    })
}

/// `Constructor.ref(class_name, index)`.
fn constructor_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let class_name = read_string_arg(&*vm, 1);
        let index = read_index_arg(&*vm, 2);
        let resolved = match (&class_name, index) {
            (Some(name), Some(index)) => core
                .db
                .find_type(name)
                .and_then(|ty| ty.constructors.get(index).cloned()),
            _ => None,
        };
        match resolved {
            Some(ctor) => alloc_meta(
                vm,
                core.db.builtins().constructor_meta,
                MetaObject::Constructor(ctor),
            ),
            None => resolve_failed(
                vm,
                "Constructor",
                &format!(
                    "constructor {} of `{}`",
                    index.unwrap_or(0),
                    class_name.as_deref().unwrap_or("?")
                ),
            ),
        }
    })
}

/// `Member.ref(class_name, member_name)`.
fn member_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let class_name = read_string_arg(&*vm, 1);
        let member_name = read_string_arg(&*vm, 2);
        let resolved = match (&class_name, &member_name) {
            (Some(class), Some(member)) => core.db.find_type(class).and_then(|ty| {
                ty.member_index(member).map(|index| MetaObject::Member {
                    owner: ty.clone(),
                    index,
                })
            }),
            _ => None,
        };
        match resolved {
            Some(meta) => alloc_meta(vm, core.db.builtins().member_meta, meta),
            None => resolve_failed(
                vm,
                "Member",
                &format!(
                    "member `{}.{}`",
                    class_name.as_deref().unwrap_or("?"),
                    member_name.as_deref().unwrap_or("?")
                ),
            ),
        }
    })
}

/// `Static.ref(class_name, static_name)`.
fn static_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let class_name = read_string_arg(&*vm, 1);
        let static_name = read_string_arg(&*vm, 2);
        let resolved = match (&class_name, &static_name) {
            (Some(class), Some(name)) => core.db.find_type(class).and_then(|ty| {
                ty.static_index(name).map(|index| MetaObject::Static {
                    owner: ty.clone(),
                    index,
                })
            }),
            _ => None,
        };
        match resolved {
            Some(meta) => alloc_meta(vm, core.db.builtins().static_meta, meta),
            None => resolve_failed(
                vm,
                "Static",
                &format!(
                    "static `{}.{}`",
                    class_name.as_deref().unwrap_or("?"),
                    static_name.as_deref().unwrap_or("?")
                ),
            ),
        }
    })
}

/// `Method.ref(class_name, method_name)`.
fn method_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let class_name = read_string_arg(&*vm, 1);
        let method_name = read_string_arg(&*vm, 2);
        let resolved = match (&class_name, &method_name) {
            (Some(class), Some(method)) => core
                .db
                .find_type(class)
                .and_then(|ty| ty.method(method).cloned()),
            _ => None,
        };
        match resolved {
            Some(method) => alloc_meta(vm, core.db.builtins().method_meta, MetaObject::Method(method)),
            None => resolve_failed(
                vm,
                "Method",
                &format!(
                    "method `{}.{}`",
                    class_name.as_deref().unwrap_or("?"),
                    method_name.as_deref().unwrap_or("?")
                ),
            ),
        }
    })
}

/// `Operator.ref(name, class_name)`. Note the argument order: the operator
/// key comes first.
fn operator_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let op_name = read_string_arg(&*vm, 1);
        let class_name = read_string_arg(&*vm, 2);
        let resolved = match (&op_name, &class_name) {
            (Some(op), Some(class)) => core
                .db
                .find_type(class)
                .and_then(|ty| ty.operator(op))
                .map(|op| op.function.clone()),
            _ => None,
        };
        match resolved {
            Some(function) => alloc_meta(
                vm,
                core.db.builtins().operator_meta,
                MetaObject::Operator(function),
            ),
            None => resolve_failed(
                vm,
                "Operator",
                &format!(
                    "operator `{}` on `{}`",
                    op_name.as_deref().unwrap_or("?"),
                    class_name.as_deref().unwrap_or("?")
                ),
            ),
        }
    })
}

/// `VirtualConstructor.ref(class_name)`: the type's first constructor,
/// which must carry the trailing hook parameter.
fn virtual_constructor_allocator(core: &Rc<BridgeCore>) -> ForeignMethod {
    let core = core.clone();
    Rc::new(move |vm: &mut dyn ScriptVm| {
        let class_name = read_string_arg(&*vm, 1);
        let resolved = class_name
            .as_deref()
            .and_then(|name| core.db.find_type(name))
            .and_then(|ty| ty.constructors.first().cloned());
        match resolved {
            Some(ctor) => alloc_meta(
                vm,
                core.db.builtins().virtual_constructor_meta,
                MetaObject::VirtualCtor(ctor),
            ),
            None => resolve_failed(
                vm,
                "VirtualConstructor",
                &format!("constructor for `{}`", class_name.as_deref().unwrap_or("?")),
            ),
        }
    })
}

/// Register the prelude's foreign classes and every trampoline signature.
/// Runs once, before the prelude source is interpreted.
pub(crate) fn install_prelude(core: &Rc<BridgeCore>, vm: &mut dyn ScriptVm) {
    vm.register_foreign_class(MAIN, "Function", ForeignClassHooks::new(function_allocator(core)));
    for args in 0..=9 {
        vm.register_foreign_method(
            MAIN,
            "Function",
            false,
            &declgen::call_signature("call", args),
            dispatch::function_trampoline(core, args),
        );
    }

    vm.register_foreign_class(MAIN, "Type", ForeignClassHooks::new(type_resolver(core)));
    vm.register_foreign_method(MAIN, "Type", true, "new(_)", type_resolver(core));

    vm.register_foreign_class(
        MAIN,
        "Constructor",
        ForeignClassHooks::new(constructor_allocator(core)),
    );

    vm.register_foreign_class(MAIN, "Member", ForeignClassHooks::new(member_allocator(core)));
    vm.register_foreign_method(MAIN, "Member", false, "get(_)", dispatch::member_get_trampoline(core));
    vm.register_foreign_method(MAIN, "Member", false, "set(_,_)", dispatch::member_set_trampoline(core));

    vm.register_foreign_class(MAIN, "Static", ForeignClassHooks::new(static_allocator(core)));
    vm.register_foreign_method(MAIN, "Static", false, "get()", dispatch::static_get_trampoline(core));
    vm.register_foreign_method(MAIN, "Static", false, "set(_)", dispatch::static_set_trampoline(core));

    vm.register_foreign_class(MAIN, "Method", ForeignClassHooks::new(method_allocator(core)));
    for args in 0..=5 {
        // Method.call takes the receiver before the arguments.
        vm.register_foreign_method(
            MAIN,
            "Method",
            false,
            &declgen::call_signature("call", args + 1),
            dispatch::method_trampoline(core, args),
        );
    }

    vm.register_foreign_class(MAIN, "Operator", ForeignClassHooks::new(operator_allocator(core)));
    vm.register_foreign_method(
        MAIN,
        "Operator",
        false,
        "call(_,_)",
        dispatch::function_trampoline(core, 2),
    );

    vm.register_foreign_class(
        MAIN,
        "VirtualConstructor",
        ForeignClassHooks::new(virtual_constructor_allocator(core)),
    );
    vm.register_foreign_method(
        MAIN,
        "VirtualConstructor",
        false,
        "call()",
        dispatch::construct_interface_trampoline(core, 0),
    );
    vm.register_foreign_method(
        MAIN,
        "VirtualConstructor",
        false,
        "call(_)",
        dispatch::construct_interface_trampoline(core, 1),
    );
}

/// Register the allocate/finalize hooks for one generated foreign class.
pub(crate) fn install_class(core: &Rc<BridgeCore>, vm: &mut dyn ScriptVm, module: &str, class: &str) {
    let hooks = ForeignClassHooks::new(dispatch::construct_trampoline(core))
        .with_finalizer(foreign::finalizer(core));
    vm.register_foreign_class(module, class, hooks);
}
