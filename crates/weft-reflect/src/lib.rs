//! Weft Reflection Database
//!
//! This crate implements the frozen type model the scripting bridge works
//! from: type descriptors with their constructors, members, methods, statics
//! and operators, a namespace tree, free functions, and the dynamic `Value`
//! payloads that flow through reflected entry points.

pub mod builder;
pub mod convert;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod value;

pub use builder::{copy_of, ClassBuilder, DbBuilder, EnumBuilder, FunctionBuilder};
pub use convert::{FromValue, IntoValue};
pub use db::{Builtins, ReflectionDb};
pub use error::ReflectError;
pub use value::{ObjectRef, Scalar, ScalarKind, Value};

// Re-export descriptor types for convenience
pub use descriptor::{
    Callable, CallableId, CallableKind, CopyFn, DestructorFn, EntryFn, EnumVariant, GetterFn,
    Member, Namespace, NamespaceId, Operator, Param, SetterFn, Static, TypeDescriptor, TypeId,
    TypeKind,
};
