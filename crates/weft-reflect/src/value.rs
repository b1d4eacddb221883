//! Value — the marshalling unit crossing the native/script boundary
//!
//! Every value handed to or received from the scripting VM is carried as a
//! `Value`: a closed tagged representation over the shapes the bridge knows
//! how to marshal. The `None` tag is a sentinel meaning "no applicable
//! conversion was found" and is distinct from `Null`, which is a legitimate
//! absence of value (a nullable parameter may carry it).
//!
//! Native objects travel as [`ObjectRef`]: a possibly-null, shared,
//! dynamically-typed handle tagged with its reflected type id. Struct-value
//! payloads (`Value::Struct`) are copied when they cross the boundary;
//! class-object payloads (`Value::Ref`) are shared.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::descriptor::TypeId;

/// Shape tag for [`Scalar`], used to key per-width codec registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

/// A native numeric value in one of the closed set of supported shapes.
///
/// The VM side only knows `f64`; the shape records what the native side
/// declared so round-trips preserve the native representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    /// Widen to `f64`, the script-side number representation.
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::I8(v) => v as f64,
            Scalar::I16(v) => v as f64,
            Scalar::I32(v) => v as f64,
            Scalar::I64(v) => v as f64,
            Scalar::U8(v) => v as f64,
            Scalar::U16(v) => v as f64,
            Scalar::U32(v) => v as f64,
            Scalar::U64(v) => v as f64,
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
        }
    }

    /// Narrow a script number into the given shape. Float to integer
    /// truncates toward zero; out-of-range values saturate.
    pub fn from_f64(kind: ScalarKind, v: f64) -> Scalar {
        match kind {
            ScalarKind::I8 => Scalar::I8(v as i8),
            ScalarKind::I16 => Scalar::I16(v as i16),
            ScalarKind::I32 => Scalar::I32(v as i32),
            ScalarKind::I64 => Scalar::I64(v as i64),
            ScalarKind::U8 => Scalar::U8(v as u8),
            ScalarKind::U16 => Scalar::U16(v as u16),
            ScalarKind::U32 => Scalar::U32(v as u32),
            ScalarKind::U64 => Scalar::U64(v as u64),
            ScalarKind::F32 => Scalar::F32(v as f32),
            ScalarKind::F64 => Scalar::F64(v),
        }
    }

    /// The shape tag of this scalar.
    pub fn kind(self) -> ScalarKind {
        match self {
            Scalar::I8(_) => ScalarKind::I8,
            Scalar::I16(_) => ScalarKind::I16,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::I64(_) => ScalarKind::I64,
            Scalar::U8(_) => ScalarKind::U8,
            Scalar::U16(_) => ScalarKind::U16,
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::U64(_) => ScalarKind::U64,
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::F64(_) => ScalarKind::F64,
        }
    }
}

/// A possibly-null shared handle to a native object, tagged with the
/// reflected type of the data it points at.
///
/// Cloning an `ObjectRef` aliases the same underlying object; equality is
/// identity (same cell or both null, and same type).
#[derive(Clone)]
pub struct ObjectRef {
    type_id: TypeId,
    cell: Option<Rc<RefCell<dyn Any>>>,
}

impl ObjectRef {
    /// Wrap a native value.
    pub fn new<T: Any>(type_id: TypeId, value: T) -> Self {
        ObjectRef {
            type_id,
            cell: Some(Rc::new(RefCell::new(value))),
        }
    }

    /// The typed empty reference.
    pub fn null(type_id: TypeId) -> Self {
        ObjectRef {
            type_id,
            cell: None,
        }
    }

    /// The reflected type of the referenced object.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_null(&self) -> bool {
        self.cell.is_none()
    }

    /// Typed shared borrow. `None` if the reference is null or the payload
    /// is not a `T`. Panics if the object is mutably borrowed.
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        let cell = self.cell.as_ref()?;
        Ref::filter_map(cell.borrow(), |any| any.downcast_ref::<T>()).ok()
    }

    /// Typed exclusive borrow. `None` if the reference is null or the
    /// payload is not a `T`. Panics if the object is already borrowed.
    pub fn borrow_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        let cell = self.cell.as_ref()?;
        RefMut::filter_map(cell.borrow_mut(), |any| any.downcast_mut::<T>()).ok()
    }

    /// Run `f` against a shared borrow of the payload.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.borrow::<T>().map(|v| f(&v))
    }

    /// Run `f` against an exclusive borrow of the payload.
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.borrow_mut::<T>().map(|mut v| f(&mut v))
    }
}

/// Equality is identity: same type and same shared cell, or both null.
impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        if self.type_id != other.type_id {
            return false;
        }
        match (&self.cell, &other.cell) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectRef(type {}, null)", self.type_id)
        } else {
            write!(f, "ObjectRef(type {})", self.type_id)
        }
    }
}

/// The marshalling unit. See the module docs for the tag semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No applicable conversion was found. Never a legitimate value.
    None,
    /// A legitimate absence of value.
    Null,
    Bool(bool),
    Number(Scalar),
    String(String),
    /// An enum variant of `ty`, by declared index.
    Enum { ty: TypeId, index: u32 },
    /// A homogeneous sequence of `content`-typed elements.
    Sequence { content: TypeId, items: Vec<Value> },
    /// A struct-value payload, copied when crossing the boundary.
    Struct(ObjectRef),
    /// A class-object reference, shared when crossing the boundary.
    Ref(ObjectRef),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Tag name for diagnostics.
    pub fn tag_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Enum { .. } => "enum",
            Value::Sequence { .. } => "sequence",
            Value::Struct(_) => "struct",
            Value::Ref(_) => "ref",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(s) => Some(s.as_f64()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object payload of a `Struct` or `Ref` value.
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Struct(obj) | Value::Ref(obj) => Some(obj),
            _ => None,
        }
    }

    /// Shortcut for building a sequence value.
    pub fn sequence(content: TypeId, items: Vec<Value>) -> Value {
        Value::Sequence { content, items }
    }
}
