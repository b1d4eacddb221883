//! Weft VM Interface
//!
//! This crate defines the slot-protocol surface of an embedded scripting VM
//! (`ScriptVm`), the foreign-object payload model shared with the bridge,
//! and `MockVm`, a recording in-memory double used to test bridge behavior
//! without a real interpreter.

pub mod context;
pub mod foreign;
pub mod mock;

pub use context::{ScriptVm, SlotKind, VmError, VmHandle};
pub use foreign::{FinalizerFn, ForeignClassHooks, ForeignInstance, ForeignMethod, PayloadMode};
pub use mock::{CallHandler, CallRecord, MockVm, SlotValue};
