//! The frozen reflection database
//!
//! Built once through [`DbBuilder`](crate::builder::DbBuilder), then only
//! read. Ids are dense Vec indices, so every hot lookup is an index, not a
//! hash; name lookups exist for the declaration-time string resolution the
//! generated script performs (`Type.ref("Vec3")` and friends).

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::descriptor::{Callable, Namespace, NamespaceId, TypeDescriptor, TypeId};
use crate::value::ScalarKind;

/// Type ids pre-registered by every database: the primitive scalar set, the
/// meta types backing the script-side reflection classes, and the
/// virtual-method hook type.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub boolean: TypeId,
    pub i8: TypeId,
    pub i16: TypeId,
    pub i32: TypeId,
    pub i64: TypeId,
    pub u8: TypeId,
    pub u16: TypeId,
    pub u32: TypeId,
    pub u64: TypeId,
    pub f32: TypeId,
    pub f64: TypeId,
    pub string: TypeId,
    pub type_meta: TypeId,
    pub function_meta: TypeId,
    pub constructor_meta: TypeId,
    pub member_meta: TypeId,
    pub static_meta: TypeId,
    pub method_meta: TypeId,
    pub operator_meta: TypeId,
    pub virtual_constructor_meta: TypeId,
    pub virtual_method: TypeId,
}

impl Builtins {
    /// The type id declared for a scalar shape.
    pub fn scalar(&self, kind: ScalarKind) -> TypeId {
        match kind {
            ScalarKind::I8 => self.i8,
            ScalarKind::I16 => self.i16,
            ScalarKind::I32 => self.i32,
            ScalarKind::I64 => self.i64,
            ScalarKind::U8 => self.u8,
            ScalarKind::U16 => self.u16,
            ScalarKind::U32 => self.u32,
            ScalarKind::U64 => self.u64,
            ScalarKind::F32 => self.f32,
            ScalarKind::F64 => self.f64,
        }
    }

    /// The scalar shape of a type id, if it is one of the numeric builtins.
    pub fn scalar_kind(&self, ty: TypeId) -> Option<ScalarKind> {
        if ty == self.i8 {
            Some(ScalarKind::I8)
        } else if ty == self.i16 {
            Some(ScalarKind::I16)
        } else if ty == self.i32 {
            Some(ScalarKind::I32)
        } else if ty == self.i64 {
            Some(ScalarKind::I64)
        } else if ty == self.u8 {
            Some(ScalarKind::U8)
        } else if ty == self.u16 {
            Some(ScalarKind::U16)
        } else if ty == self.u32 {
            Some(ScalarKind::U32)
        } else if ty == self.u64 {
            Some(ScalarKind::U64)
        } else if ty == self.f32 {
            Some(ScalarKind::F32)
        } else if ty == self.f64 {
            Some(ScalarKind::F64)
        } else {
            None
        }
    }

    /// Whether `ty` is one of the meta types declared by the prelude rather
    /// than by generated declarations.
    pub fn is_meta(&self, ty: TypeId) -> bool {
        ty == self.type_meta
            || ty == self.function_meta
            || ty == self.constructor_meta
            || ty == self.member_meta
            || ty == self.static_meta
            || ty == self.method_meta
            || ty == self.operator_meta
            || ty == self.virtual_constructor_meta
            || ty == self.virtual_method
    }
}

/// The frozen store of namespaces, types and free functions.
pub struct ReflectionDb {
    pub(crate) types: Vec<Rc<TypeDescriptor>>,
    pub(crate) namespaces: Vec<Rc<Namespace>>,
    pub(crate) functions: Vec<Rc<Callable>>,
    pub(crate) type_names: FxHashMap<String, TypeId>,
    pub(crate) builtins: Builtins,
    pub(crate) callable_count: usize,
}

impl ReflectionDb {
    /// Descriptor for a known type id. Ids come from this database, so an
    /// out-of-range id is a caller bug and panics.
    pub fn type_info(&self, id: TypeId) -> &Rc<TypeDescriptor> {
        &self.types[id]
    }

    pub fn find_type(&self, name: &str) -> Option<&Rc<TypeDescriptor>> {
        self.type_names.get(name).map(|id| &self.types[*id])
    }

    pub fn namespace(&self, id: NamespaceId) -> &Rc<Namespace> {
        &self.namespaces[id]
    }

    /// Namespace by last-segment name; the empty string finds the root.
    pub fn find_namespace(&self, name: &str) -> Option<&Rc<Namespace>> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    /// Free function by owning-namespace name and function name. This is
    /// the lookup `Function.ref("<namespace>", "<name>")` performs.
    pub fn find_function(&self, namespace: &str, name: &str) -> Option<&Rc<Callable>> {
        self.functions.iter().find(|f| {
            f.name == name
                && f.namespace
                    .map(|ns| self.namespaces[ns].name == namespace)
                    .unwrap_or(false)
        })
    }

    pub fn types(&self) -> impl Iterator<Item = &Rc<TypeDescriptor>> {
        self.types.iter()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Rc<Namespace>> {
        self.namespaces.iter()
    }

    pub fn functions(&self) -> impl Iterator<Item = &Rc<Callable>> {
        self.functions.iter()
    }

    /// Subtype check along the single-inheritance base chain.
    pub fn is_a(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(ty);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.types[id].base;
        }
        false
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Total number of callables allocated, for sizing id-indexed caches.
    pub fn callable_count(&self) -> usize {
        self.callable_count
    }
}

impl fmt::Debug for ReflectionDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectionDb")
            .field("types", &self.types.len())
            .field("namespaces", &self.namespaces.len())
            .field("functions", &self.functions.len())
            .field("callables", &self.callable_count)
            .finish()
    }
}
