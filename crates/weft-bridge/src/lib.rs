//! Weft Scripting Bridge
//!
//! Exposes a frozen reflection database to an embedded Weft VM and routes
//! calls in both directions. Every script-visible class, constructor,
//! member accessor, method and function wrapper is synthesized at runtime
//! as source text from the database, interpreted, and wired back to native
//! entry points through foreign trampolines; native code calls script back
//! through call handles made at declaration time.
//!
//! The pieces, leaves first: `marshal` (slot to `Value` conversion),
//! `foreign` (foreign-object allocation and finalization), `dispatch`
//! (per-callable bindings, the call state machine, the trampolines),
//! `declgen` (source text synthesis), `gateway` (reverse calls), `binder`
//! (hook registration), and `context` (the owning [`Bridge`]).

pub mod binder;
pub mod context;
pub mod declgen;
pub mod dispatch;
pub mod error;
pub mod foreign;
pub mod gateway;
pub mod marshal;
pub mod meta;

pub use context::{Bridge, BridgeConfig};
pub use dispatch::CallBinding;
pub use error::BridgeError;
pub use gateway::{hook_from_value, ScriptRef, VirtualMethod};
pub use meta::MetaObject;
