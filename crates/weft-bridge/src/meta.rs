//! Payloads of the prelude reflection classes
//!
//! Script resolves descriptors by name through the prelude classes
//! (`Function.ref("math", "clamp")`, `Type.ref("Vec2")`, ...). Each
//! resolved instance is a foreign object whose payload is a `MetaObject`
//! naming the database entry it stands for; the trampolines read it back
//! out of slot 0 to know what to dispatch.

use std::fmt;
use std::rc::Rc;

use weft_reflect::{Callable, TypeDescriptor};
use weft_vm::ScriptVm;

/// What a prelude foreign instance refers to.
#[derive(Clone)]
pub enum MetaObject {
    /// A free function, also the shape operator calls dispatch through.
    Function(Rc<Callable>),
    /// A reflected type.
    Type(Rc<TypeDescriptor>),
    /// One constructor of a type.
    Constructor(Rc<Callable>),
    /// Instance member `index` of `owner`.
    Member {
        owner: Rc<TypeDescriptor>,
        index: usize,
    },
    /// Static member `index` of `owner`.
    Static {
        owner: Rc<TypeDescriptor>,
        index: usize,
    },
    /// An instance method.
    Method(Rc<Callable>),
    /// An operator's backing function.
    Operator(Rc<Callable>),
    /// The constructor a virtual interface is built through.
    VirtualCtor(Rc<Callable>),
}

impl MetaObject {
    /// The meta payload in `slot`, if the slot holds one.
    pub fn from_slot(vm: &dyn ScriptVm, slot: usize) -> Option<MetaObject> {
        let instance = vm.slot_foreign(slot)?;
        let object = instance.value.object()?;
        object.with(|meta: &MetaObject| meta.clone())
    }

    /// The backing callable of function-shaped variants.
    pub fn as_function(&self) -> Option<&Rc<Callable>> {
        match self {
            MetaObject::Function(f) | MetaObject::Operator(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for MetaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaObject::Function(c) => write!(f, "MetaObject::Function({})", c.name),
            MetaObject::Type(t) => write!(f, "MetaObject::Type({})", t.name),
            MetaObject::Constructor(c) => {
                write!(f, "MetaObject::Constructor({:?})", c.object_type)
            }
            MetaObject::Member { owner, index } => {
                write!(f, "MetaObject::Member({}.{})", owner.name, index)
            }
            MetaObject::Static { owner, index } => {
                write!(f, "MetaObject::Static({}.{})", owner.name, index)
            }
            MetaObject::Method(c) => write!(f, "MetaObject::Method({})", c.name),
            MetaObject::Operator(c) => write!(f, "MetaObject::Operator({})", c.name),
            MetaObject::VirtualCtor(c) => {
                write!(f, "MetaObject::VirtualCtor({:?})", c.object_type)
            }
        }
    }
}
