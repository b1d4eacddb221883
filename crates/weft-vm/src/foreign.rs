//! Foreign object payloads and embedder hooks
//!
//! A foreign object is a script-side object whose payload belongs to the
//! native side. The payload here is a reflected [`Value`] plus the lifecycle
//! mode that decides what the finalizer may destruct.

use std::rc::Rc;

use weft_reflect::{TypeId, Value};

use crate::context::ScriptVm;

/// Who owns the payload behind a foreign object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// The script object holds its own copy; the finalizer destructs it.
    OwnedCopy,
    /// The script object aliases native-owned data; the finalizer must
    /// not touch the referent.
    Reference,
}

/// Payload stored inside a script-side foreign object.
#[derive(Debug, Clone)]
pub struct ForeignInstance {
    /// Reflected type of the payload
    pub type_id: TypeId,
    /// Lifecycle mode, fixed at allocation
    pub mode: PayloadMode,
    /// The payload itself, normally `Value::Struct` or `Value::Ref`
    pub value: Value,
}

impl ForeignInstance {
    pub fn owned(type_id: TypeId, value: Value) -> Self {
        ForeignInstance {
            type_id,
            mode: PayloadMode::OwnedCopy,
            value,
        }
    }

    pub fn reference(type_id: TypeId, value: Value) -> Self {
        ForeignInstance {
            type_id,
            mode: PayloadMode::Reference,
            value,
        }
    }
}

/// Implementation of one foreign method. The VM invokes it with the
/// receiver in slot 0 and arguments in slots 1 onward; the result is left
/// in slot 0.
pub type ForeignMethod = Rc<dyn Fn(&mut dyn ScriptVm)>;

/// Finalizer for a foreign object. Runs during collection with no VM
/// access, so it can only inspect the payload it is given.
pub type FinalizerFn = Rc<dyn Fn(&ForeignInstance)>;

/// Allocate/finalize pair registered for a foreign class.
#[derive(Clone)]
pub struct ForeignClassHooks {
    /// Runs when script constructs an instance; constructor arguments are
    /// in slots 1.., and the hook must leave the new foreign in slot 0.
    pub allocate: ForeignMethod,
    /// Runs when the instance is collected.
    pub finalize: Option<FinalizerFn>,
}

impl ForeignClassHooks {
    pub fn new(allocate: ForeignMethod) -> Self {
        ForeignClassHooks {
            allocate,
            finalize: None,
        }
    }

    pub fn with_finalizer(mut self, finalize: FinalizerFn) -> Self {
        self.finalize = Some(finalize);
        self
    }
}

impl std::fmt::Debug for ForeignClassHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignClassHooks")
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}
