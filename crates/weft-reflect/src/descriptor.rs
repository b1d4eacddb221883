//! Type and callable descriptors
//!
//! The descriptor model mirrors what the bridge needs to expose a native
//! surface to script: types (with constructors, members, methods, statics,
//! operators), free functions grouped by namespace, and enum variants.
//! Descriptors are built once through `DbBuilder` and frozen inside
//! `ReflectionDb`; the bridge only ever reads them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::value::{ObjectRef, Value};

/// Dense index of a type in the database. Stable for the database lifetime;
/// used to key the bridge's handle tables.
pub type TypeId = usize;

/// Dense index of a callable (constructor, method, function or synthesized
/// static accessor). Keys the bridge's binding cache and method handles.
pub type CallableId = usize;

/// Dense index of a namespace.
pub type NamespaceId = usize;

/// Category of a reflected type, driving marshalling dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Scalar/string/bool types marshalled by the codec tables.
    Primitive,
    /// Named integer constants; marshalled as a variant index.
    Enum,
    /// Value semantics: copied whenever it crosses the boundary.
    Struct,
    /// Reference semantics: shared across the boundary.
    Object,
}

/// Native invocation entry point of a callable. Receives the receiver (for
/// methods) and the converted argument buffer; returns the result value, or
/// `Value::None` for no result.
pub type EntryFn = Rc<dyn Fn(Option<&Value>, &[Value]) -> Value>;

/// Member read accessor: object in, member value out.
pub type GetterFn = Rc<dyn Fn(&Value) -> Value>;

/// Member write accessor: object and new value in.
pub type SetterFn = Rc<dyn Fn(&Value, &Value)>;

/// Destructor for owned struct-value payloads, run at VM finalization.
pub type DestructorFn = Rc<dyn Fn(&Value)>;

/// Copy constructor for struct-value payloads; produces an independently
/// owned object.
pub type CopyFn = Rc<dyn Fn(&ObjectRef) -> ObjectRef>;

/// One declared parameter of a callable.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Expected type, driving marshalling of the corresponding slot.
    pub ty: TypeId,
    /// Whether script may pass `null` for this parameter.
    pub nullable: bool,
    /// Declared default, present only on defaulted (trailing) parameters.
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: &str, ty: TypeId) -> Self {
        Param {
            name: name.to_owned(),
            ty,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    /// Free function, operator function or synthesized static accessor.
    Function,
    /// Instance method; the receiver is implicit, not in `params`.
    Method,
    /// Constructor; the constructed object is the entry's return value.
    Constructor,
}

/// Shared descriptor shape for everything invokable.
///
/// `params` lists the user-visible arguments only: method receivers and the
/// object a constructor produces are implied by `kind` and `object_type`.
pub struct Callable {
    pub id: CallableId,
    /// Bare name (`length`, `clamp`, `new` for constructors); the lookup
    /// key generated declarations resolve against.
    pub name: String,
    pub kind: CallableKind,
    /// Owning namespace, for free functions.
    pub namespace: Option<NamespaceId>,
    /// Associated type, for methods and constructors.
    pub object_type: Option<TypeId>,
    pub params: Vec<Param>,
    /// How many trailing parameters carry defaults.
    pub num_defaults: usize,
    /// Declared result type; `None` for void.
    pub result: Option<TypeId>,
    pub entry: EntryFn,
}

impl Callable {
    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Minimum arguments a call must provide.
    pub fn required_args(&self) -> usize {
        self.params.len() - self.num_defaults
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("arity", &self.arity())
            .field("num_defaults", &self.num_defaults)
            .field("result", &self.result)
            .finish()
    }
}

/// A reflected instance member (field-like accessor pair).
pub struct Member {
    pub name: String,
    pub ty: TypeId,
    /// Whether `null` may be written to this member.
    pub nullable: bool,
    pub get: GetterFn,
    /// Present only for mutable members; immutable members generate no
    /// script setter.
    pub set: Option<SetterFn>,
}

impl Member {
    pub fn is_mutable(&self) -> bool {
        self.set.is_some()
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("mutable", &self.is_mutable())
            .finish()
    }
}

/// A reflected static member.
///
/// The value lives in `cell`; `getter`/`setter` are synthesized callables
/// closing over it, so static access flows through the same dispatch and
/// binding machinery as every other call.
pub struct Static {
    pub name: String,
    pub ty: TypeId,
    pub cell: Rc<RefCell<Value>>,
    pub getter: Rc<Callable>,
    pub setter: Rc<Callable>,
}

impl fmt::Debug for Static {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Static")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

/// A reflected binary operator.
#[derive(Debug)]
pub struct Operator {
    /// Database lookup key (`add`, `sub`, `eq`, ...).
    pub name: String,
    /// Script-side token the wrapper is declared under (`+`, `-`, `==`, ...).
    pub sign: String,
    /// The backing two-parameter function.
    pub function: Rc<Callable>,
}

/// One named constant of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    pub index: u32,
}

/// Full description of one reflected type.
pub struct TypeDescriptor {
    pub id: TypeId,
    /// Raw database name; the declaration generator may clean it for the
    /// script-visible class name, but lookups always use this.
    pub name: String,
    pub namespace: NamespaceId,
    pub kind: TypeKind,
    /// Base type for single-inheritance subtype checks.
    pub base: Option<TypeId>,
    pub constructors: Vec<Rc<Callable>>,
    pub members: Vec<Member>,
    pub methods: Vec<Rc<Callable>>,
    pub statics: Vec<Static>,
    pub operators: Vec<Operator>,
    /// Enum constants; empty unless `kind` is `Enum`.
    pub variants: Vec<EnumVariant>,
    /// Element type, for sequence types.
    pub sequence_of: Option<TypeId>,
    /// Run when the VM finalizes an owned payload of this type.
    pub destructor: Option<DestructorFn>,
    /// Produces an independent copy of a payload; required to push
    /// struct-value results into the VM.
    pub copy: Option<CopyFn>,
}

impl TypeDescriptor {
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&Rc<Callable>> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn static_member(&self, name: &str) -> Option<&Static> {
        self.statics.iter().find(|s| s.name == name)
    }

    pub fn static_index(&self, name: &str) -> Option<usize> {
        self.statics.iter().position(|s| s.name == name)
    }

    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.iter().find(|o| o.name == name)
    }

    pub fn variant(&self, index: u32) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.index == index)
    }

    pub fn variant_named(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn is_sequence(&self) -> bool {
        self.sequence_of.is_some()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("constructors", &self.constructors.len())
            .field("members", &self.members.len())
            .field("methods", &self.methods.len())
            .field("statics", &self.statics.len())
            .field("operators", &self.operators.len())
            .field("variants", &self.variants.len())
            .finish()
    }
}

/// A reflected namespace. The root namespace has the empty name and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: NamespaceId,
    /// Last path segment; empty for the root.
    pub name: String,
    pub parent: Option<NamespaceId>,
    /// Full path segments from the root; empty for the root.
    pub path: Vec<String>,
}

impl Namespace {
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}
