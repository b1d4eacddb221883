//! VM interface — the slot protocol the bridge programs against
//!
//! Everything the bridge does to an embedded VM goes through [`ScriptVm`]:
//! interpreting synthesized source, moving data through numbered slots,
//! list traversal, handle management, and foreign-hook registration. The
//! trait is object safe so the bridge can hold `Box<dyn ScriptVm>` and
//! trampolines can receive `&mut dyn ScriptVm`.

use crate::foreign::{ForeignClassHooks, ForeignInstance, ForeignMethod};

// ============================================================================
// Slot types
// ============================================================================

/// Dynamic type tag of a slot's current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Bool,
    Number,
    Foreign,
    List,
    Map,
    Null,
    String,
    Unknown,
}

/// Opaque handle pinning a VM object (class, method, or variable value)
/// across calls. Obtained from the VM and returned to it via
/// [`ScriptVm::release_handle`] when no longer needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmHandle(u64);

impl VmHandle {
    pub fn new(raw: u64) -> Self {
        VmHandle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by the VM itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// Source text failed to compile.
    #[error("compile error in module '{module}': {message}")]
    Compile {
        /// Module the source was interpreted into
        module: String,
        /// Compiler diagnostic
        message: String,
    },

    /// A fiber aborted while running.
    #[error("runtime error: {message}")]
    Runtime {
        /// Abort message, possibly with a stack trace appended
        message: String,
    },
}

// ============================================================================
// ScriptVm
// ============================================================================

/// Object-safe interface over a slot-based embedded VM.
///
/// Slot indices start at 0. Call protocol: the receiver goes in slot 0 and
/// arguments in slots 1.., the return value comes back in slot 0. Foreign
/// method implementations receive the same layout when the VM invokes them.
pub trait ScriptVm {
    /// Compile and run `source` in `module`.
    fn interpret(&mut self, module: &str, source: &str) -> Result<(), VmError>;

    /// Grow the slot array to hold at least `count` slots.
    fn ensure_slots(&mut self, count: usize);

    /// Number of slots currently available.
    fn slot_count(&self) -> usize;

    /// Type tag of the value in `slot`.
    fn slot_kind(&self, slot: usize) -> SlotKind;

    /// Typed reads require the slot to hold the matching kind; check
    /// [`ScriptVm::slot_kind`] first.
    fn slot_bool(&self, slot: usize) -> bool;
    fn slot_number(&self, slot: usize) -> f64;
    fn slot_string(&self, slot: usize) -> String;

    /// Foreign payload in `slot`, if the slot holds a foreign object.
    fn slot_foreign(&self, slot: usize) -> Option<&ForeignInstance>;

    fn set_slot_bool(&mut self, slot: usize, value: bool);
    fn set_slot_number(&mut self, slot: usize, value: f64);
    fn set_slot_string(&mut self, slot: usize, value: &str);
    fn set_slot_null(&mut self, slot: usize);

    /// Create a foreign object of the class held in `class_slot`, store
    /// `instance` as its payload, and place it in `slot`. Allocate hooks
    /// pass `class_slot` 0 (the class under construction sits there);
    /// result marshalling stages a pinned class handle in a scratch slot.
    fn set_slot_new_foreign(&mut self, slot: usize, class_slot: usize, instance: ForeignInstance);

    fn set_slot_new_list(&mut self, slot: usize);
    fn list_count(&self, slot: usize) -> usize;

    /// Copy `list[index]` into `element_slot`.
    fn list_element(&mut self, list_slot: usize, index: usize, element_slot: usize);

    /// Insert the value in `element_slot` into the list at `index`.
    fn list_insert(&mut self, list_slot: usize, index: usize, element_slot: usize);

    /// Whether `module` defines a variable called `name`.
    fn has_variable(&mut self, module: &str, name: &str) -> bool;

    /// Look up a module-level variable and place it in `slot`. The
    /// variable must exist; check with [`ScriptVm::has_variable`] first.
    fn get_variable(&mut self, module: &str, name: &str, slot: usize);

    /// Assign the value in `slot` to a module-level variable.
    fn assign_variable(&mut self, module: &str, name: &str, slot: usize);

    /// Pin the value in `slot` and return a handle to it.
    fn slot_handle(&mut self, slot: usize) -> VmHandle;

    /// Place the value a handle pins into `slot`.
    fn set_slot_handle(&mut self, slot: usize, handle: &VmHandle);

    /// Compile a call handle for a method signature such as `call(_,_)`.
    fn make_call_handle(&mut self, signature: &str) -> VmHandle;

    /// Invoke a call handle against the receiver and arguments currently
    /// in the slots.
    fn call(&mut self, method: &VmHandle) -> Result<(), VmError>;

    fn release_handle(&mut self, handle: VmHandle);

    /// Register the allocate/finalize pair for a foreign class.
    fn register_foreign_class(&mut self, module: &str, class: &str, hooks: ForeignClassHooks);

    /// Register the implementation of one foreign method signature.
    fn register_foreign_method(
        &mut self,
        module: &str,
        class: &str,
        is_static: bool,
        signature: &str,
        method: ForeignMethod,
    );
}
