//! Fluent builders for the reflection database
//!
//! A database starts from `DbBuilder::new()`, which pre-registers the
//! builtin primitive and meta types, then grows through `add_class` /
//! `add_enum` / `add_function`. Self-referential types (a method returning
//! its own type) use `reserve_type` to obtain their id before defining the
//! class body. `build()` freezes everything into a `ReflectionDb`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::db::{Builtins, ReflectionDb};
use crate::descriptor::{
    Callable, CallableId, CallableKind, CopyFn, DestructorFn, EntryFn, EnumVariant, Member,
    Namespace, NamespaceId, Operator, Param, Static, TypeDescriptor, TypeId, TypeKind,
};
use crate::error::ReflectError;
use crate::value::{ObjectRef, Value};

/// Copy function for any `Clone` payload type.
pub fn copy_of<T: Any + Clone>() -> CopyFn {
    Rc::new(|obj| match obj.with(|value: &T| value.clone()) {
        Some(copy) => ObjectRef::new(obj.type_id(), copy),
        None => ObjectRef::null(obj.type_id()),
    })
}

struct CtorDef {
    params: Vec<Param>,
    entry: EntryFn,
}

struct MethodDef {
    name: String,
    params: Vec<Param>,
    result: Option<TypeId>,
    entry: EntryFn,
}

struct StaticDef {
    name: String,
    ty: TypeId,
    initial: Value,
}

struct OperatorDef {
    name: String,
    sign: String,
    params: Vec<Param>,
    result: Option<TypeId>,
    entry: EntryFn,
}

/// Builder for one struct-value or class-object type.
pub struct ClassBuilder {
    name: String,
    kind: TypeKind,
    namespace: Option<NamespaceId>,
    base: Option<TypeId>,
    constructors: Vec<CtorDef>,
    members: Vec<Member>,
    methods: Vec<MethodDef>,
    statics: Vec<StaticDef>,
    operators: Vec<OperatorDef>,
    sequence_of: Option<TypeId>,
    destructor: Option<DestructorFn>,
    copy: Option<CopyFn>,
}

impl ClassBuilder {
    pub fn new(name: &str, kind: TypeKind) -> Self {
        ClassBuilder {
            name: name.to_owned(),
            kind,
            namespace: None,
            base: None,
            constructors: Vec::new(),
            members: Vec::new(),
            methods: Vec::new(),
            statics: Vec::new(),
            operators: Vec::new(),
            sequence_of: None,
            destructor: None,
            copy: None,
        }
    }

    pub fn namespace(mut self, ns: NamespaceId) -> Self {
        self.namespace = Some(ns);
        self
    }

    /// Base type for subtype checks (single inheritance).
    pub fn base(mut self, base: TypeId) -> Self {
        self.base = Some(base);
        self
    }

    pub fn constructor(
        mut self,
        params: Vec<Param>,
        entry: impl Fn(Option<&Value>, &[Value]) -> Value + 'static,
    ) -> Self {
        self.constructors.push(CtorDef {
            params,
            entry: Rc::new(entry),
        });
        self
    }

    /// Read-only member.
    pub fn member(mut self, name: &str, ty: TypeId, get: impl Fn(&Value) -> Value + 'static) -> Self {
        self.members.push(Member {
            name: name.to_owned(),
            ty,
            nullable: false,
            get: Rc::new(get),
            set: None,
        });
        self
    }

    /// Mutable member with both accessors.
    pub fn member_mut(
        mut self,
        name: &str,
        ty: TypeId,
        get: impl Fn(&Value) -> Value + 'static,
        set: impl Fn(&Value, &Value) + 'static,
    ) -> Self {
        self.members.push(Member {
            name: name.to_owned(),
            ty,
            nullable: false,
            get: Rc::new(get),
            set: Some(Rc::new(set)),
        });
        self
    }

    /// Escape hatch for members needing nullability or prebuilt accessors.
    pub fn member_full(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn method(
        mut self,
        name: &str,
        params: Vec<Param>,
        result: Option<TypeId>,
        entry: impl Fn(Option<&Value>, &[Value]) -> Value + 'static,
    ) -> Self {
        self.methods.push(MethodDef {
            name: name.to_owned(),
            params,
            result,
            entry: Rc::new(entry),
        });
        self
    }

    /// Static member with an initial value; accessors are synthesized.
    pub fn static_value(mut self, name: &str, ty: TypeId, initial: Value) -> Self {
        self.statics.push(StaticDef {
            name: name.to_owned(),
            ty,
            initial,
        });
        self
    }

    /// Binary operator. `name` is the database key (`add`), `sign` the
    /// script token (`+`); `params` must have exactly two entries.
    pub fn operator(
        mut self,
        name: &str,
        sign: &str,
        params: Vec<Param>,
        result: Option<TypeId>,
        entry: impl Fn(Option<&Value>, &[Value]) -> Value + 'static,
    ) -> Self {
        self.operators.push(OperatorDef {
            name: name.to_owned(),
            sign: sign.to_owned(),
            params,
            result,
            entry: Rc::new(entry),
        });
        self
    }

    /// Mark this type as a sequence of `content` elements.
    pub fn sequence_of(mut self, content: TypeId) -> Self {
        self.sequence_of = Some(content);
        self
    }

    pub fn destructor(mut self, f: impl Fn(&Value) + 'static) -> Self {
        self.destructor = Some(Rc::new(f));
        self
    }

    /// Copy constructor for struct-value payloads; see [`copy_of`].
    pub fn copy_with(mut self, f: CopyFn) -> Self {
        self.copy = Some(f);
        self
    }
}

/// Builder for an enum type (named integer constants).
pub struct EnumBuilder {
    name: String,
    namespace: Option<NamespaceId>,
    variants: Vec<EnumVariant>,
}

impl EnumBuilder {
    pub fn new(name: &str) -> Self {
        EnumBuilder {
            name: name.to_owned(),
            namespace: None,
            variants: Vec::new(),
        }
    }

    pub fn namespace(mut self, ns: NamespaceId) -> Self {
        self.namespace = Some(ns);
        self
    }

    pub fn variant(mut self, name: &str, index: u32) -> Self {
        self.variants.push(EnumVariant {
            name: name.to_owned(),
            index,
        });
        self
    }
}

/// Builder for a free function.
pub struct FunctionBuilder {
    name: String,
    namespace: Option<NamespaceId>,
    params: Vec<Param>,
    result: Option<TypeId>,
    entry: EntryFn,
}

impl FunctionBuilder {
    pub fn new(name: &str, entry: impl Fn(Option<&Value>, &[Value]) -> Value + 'static) -> Self {
        FunctionBuilder {
            name: name.to_owned(),
            namespace: None,
            params: Vec::new(),
            result: None,
            entry: Rc::new(entry),
        }
    }

    pub fn namespace(mut self, ns: NamespaceId) -> Self {
        self.namespace = Some(ns);
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    pub fn result(mut self, ty: TypeId) -> Self {
        self.result = Some(ty);
        self
    }
}

enum TypeSlot {
    Reserved(String),
    Defined(Rc<TypeDescriptor>),
}

/// Incremental database builder. See the module docs.
pub struct DbBuilder {
    types: Vec<TypeSlot>,
    namespaces: Vec<Rc<Namespace>>,
    functions: Vec<Rc<Callable>>,
    type_names: FxHashMap<String, TypeId>,
    callable_count: usize,
    builtins: Builtins,
}

impl DbBuilder {
    pub fn new() -> Self {
        let root = Rc::new(Namespace {
            id: 0,
            name: String::new(),
            parent: None,
            path: Vec::new(),
        });
        let mut builder = DbBuilder {
            types: Vec::new(),
            namespaces: vec![root],
            functions: Vec::new(),
            type_names: FxHashMap::default(),
            callable_count: 0,
            builtins: Builtins {
                boolean: 0,
                i8: 0,
                i16: 0,
                i32: 0,
                i64: 0,
                u8: 0,
                u16: 0,
                u32: 0,
                u64: 0,
                f32: 0,
                f64: 0,
                string: 0,
                type_meta: 0,
                function_meta: 0,
                constructor_meta: 0,
                member_meta: 0,
                static_meta: 0,
                method_meta: 0,
                operator_meta: 0,
                virtual_constructor_meta: 0,
                virtual_method: 0,
            },
        };
        builder.builtins = Builtins {
            boolean: builder.builtin_type("bool", TypeKind::Primitive),
            i8: builder.builtin_type("i8", TypeKind::Primitive),
            i16: builder.builtin_type("i16", TypeKind::Primitive),
            i32: builder.builtin_type("i32", TypeKind::Primitive),
            i64: builder.builtin_type("i64", TypeKind::Primitive),
            u8: builder.builtin_type("u8", TypeKind::Primitive),
            u16: builder.builtin_type("u16", TypeKind::Primitive),
            u32: builder.builtin_type("u32", TypeKind::Primitive),
            u64: builder.builtin_type("u64", TypeKind::Primitive),
            f32: builder.builtin_type("f32", TypeKind::Primitive),
            f64: builder.builtin_type("f64", TypeKind::Primitive),
            string: builder.builtin_type("string", TypeKind::Primitive),
            type_meta: builder.builtin_type("Type", TypeKind::Object),
            function_meta: builder.builtin_type("Function", TypeKind::Object),
            constructor_meta: builder.builtin_type("Constructor", TypeKind::Object),
            member_meta: builder.builtin_type("Member", TypeKind::Object),
            static_meta: builder.builtin_type("Static", TypeKind::Object),
            method_meta: builder.builtin_type("Method", TypeKind::Object),
            operator_meta: builder.builtin_type("Operator", TypeKind::Object),
            virtual_constructor_meta: builder.builtin_type("VirtualConstructor", TypeKind::Object),
            virtual_method: builder.builtin_type("VirtualMethod", TypeKind::Object),
        };
        builder
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Get-or-create the namespace at `path`, creating parents as needed.
    pub fn namespace(&mut self, path: &[&str]) -> NamespaceId {
        let mut current = 0;
        let mut full: Vec<String> = Vec::new();
        for segment in path {
            full.push((*segment).to_owned());
            current = match self.namespaces.iter().find(|ns| ns.path == full) {
                Some(ns) => ns.id,
                None => {
                    let id = self.namespaces.len();
                    self.namespaces.push(Rc::new(Namespace {
                        id,
                        name: (*segment).to_owned(),
                        parent: Some(current),
                        path: full.clone(),
                    }));
                    id
                }
            };
        }
        current
    }

    pub fn root(&self) -> NamespaceId {
        0
    }

    /// Claim a type id before defining the class, for self-reference.
    pub fn reserve_type(&mut self, name: &str) -> Result<TypeId, ReflectError> {
        if self.type_names.contains_key(name) {
            return Err(ReflectError::DuplicateType(name.to_owned()));
        }
        let id = self.types.len();
        self.types.push(TypeSlot::Reserved(name.to_owned()));
        self.type_names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Fill in a reserved type.
    pub fn define_class(&mut self, id: TypeId, class: ClassBuilder) -> Result<(), ReflectError> {
        match &self.types[id] {
            TypeSlot::Reserved(name) if *name == class.name => {}
            TypeSlot::Reserved(name) => {
                return Err(ReflectError::ReservationMismatch {
                    reserved: id,
                    expected: name.clone(),
                    got: class.name,
                })
            }
            TypeSlot::Defined(existing) => {
                return Err(ReflectError::DuplicateType(existing.name.clone()))
            }
        }
        let descriptor = self.assemble_class(id, class)?;
        self.types[id] = TypeSlot::Defined(Rc::new(descriptor));
        Ok(())
    }

    /// Reserve and define in one step.
    pub fn add_class(&mut self, class: ClassBuilder) -> Result<TypeId, ReflectError> {
        let id = self.reserve_type(&class.name)?;
        let descriptor = self.assemble_class(id, class)?;
        self.types[id] = TypeSlot::Defined(Rc::new(descriptor));
        Ok(id)
    }

    pub fn add_enum(&mut self, def: EnumBuilder) -> Result<TypeId, ReflectError> {
        let id = self.reserve_type(&def.name)?;
        let descriptor = TypeDescriptor {
            id,
            name: def.name,
            namespace: def.namespace.unwrap_or(0),
            kind: TypeKind::Enum,
            base: None,
            constructors: Vec::new(),
            members: Vec::new(),
            methods: Vec::new(),
            statics: Vec::new(),
            operators: Vec::new(),
            variants: def.variants,
            sequence_of: None,
            destructor: None,
            copy: None,
        };
        self.types[id] = TypeSlot::Defined(Rc::new(descriptor));
        Ok(id)
    }

    /// Sequence of `content` elements, as a struct-value type.
    pub fn add_sequence(&mut self, name: &str, content: TypeId) -> Result<TypeId, ReflectError> {
        self.add_class(ClassBuilder::new(name, TypeKind::Struct).sequence_of(content))
    }

    pub fn add_function(&mut self, def: FunctionBuilder) -> Result<CallableId, ReflectError> {
        let num_defaults = validate_defaults(&def.name, &def.params)?;
        let id = self.alloc_callable();
        self.functions.push(Rc::new(Callable {
            id,
            name: def.name,
            kind: CallableKind::Function,
            namespace: Some(def.namespace.unwrap_or(0)),
            object_type: None,
            params: def.params,
            num_defaults,
            result: def.result,
            entry: def.entry,
        }));
        Ok(id)
    }

    /// Freeze into the read-only database.
    pub fn build(self) -> Result<ReflectionDb, ReflectError> {
        let mut types = Vec::with_capacity(self.types.len());
        for (id, slot) in self.types.into_iter().enumerate() {
            match slot {
                TypeSlot::Defined(descriptor) => types.push(descriptor),
                TypeSlot::Reserved(_) => return Err(ReflectError::UndefinedReservation(id)),
            }
        }
        Ok(ReflectionDb {
            types,
            namespaces: self.namespaces,
            functions: self.functions,
            type_names: self.type_names,
            builtins: self.builtins,
            callable_count: self.callable_count,
        })
    }

    fn alloc_callable(&mut self) -> CallableId {
        let id = self.callable_count;
        self.callable_count += 1;
        id
    }

    fn builtin_type(&mut self, name: &str, kind: TypeKind) -> TypeId {
        let id = self.types.len();
        self.types.push(TypeSlot::Defined(Rc::new(TypeDescriptor {
            id,
            name: name.to_owned(),
            namespace: 0,
            kind,
            base: None,
            constructors: Vec::new(),
            members: Vec::new(),
            methods: Vec::new(),
            statics: Vec::new(),
            operators: Vec::new(),
            variants: Vec::new(),
            sequence_of: None,
            destructor: None,
            copy: None,
        })));
        self.type_names.insert(name.to_owned(), id);
        id
    }

    fn assemble_class(
        &mut self,
        id: TypeId,
        class: ClassBuilder,
    ) -> Result<TypeDescriptor, ReflectError> {
        let mut constructors = Vec::new();
        for ctor in class.constructors {
            let num_defaults = validate_defaults(&class.name, &ctor.params)?;
            constructors.push(Rc::new(Callable {
                id: self.alloc_callable(),
                name: "new".to_owned(),
                kind: CallableKind::Constructor,
                namespace: None,
                object_type: Some(id),
                params: ctor.params,
                num_defaults,
                result: Some(id),
                entry: ctor.entry,
            }));
        }

        let mut methods = Vec::new();
        for def in class.methods {
            let num_defaults = validate_defaults(&def.name, &def.params)?;
            methods.push(Rc::new(Callable {
                id: self.alloc_callable(),
                name: def.name,
                kind: CallableKind::Method,
                namespace: None,
                object_type: Some(id),
                params: def.params,
                num_defaults,
                result: def.result,
                entry: def.entry,
            }));
        }

        let mut statics = Vec::new();
        for def in class.statics {
            let cell = Rc::new(RefCell::new(def.initial));
            let getter = {
                let cell = cell.clone();
                Rc::new(Callable {
                    id: self.alloc_callable(),
                    name: def.name.clone(),
                    kind: CallableKind::Function,
                    namespace: None,
                    object_type: Some(id),
                    params: Vec::new(),
                    num_defaults: 0,
                    result: Some(def.ty),
                    entry: Rc::new(move |_, _| cell.borrow().clone()),
                })
            };
            let setter = {
                let cell = cell.clone();
                Rc::new(Callable {
                    id: self.alloc_callable(),
                    name: def.name.clone(),
                    kind: CallableKind::Function,
                    namespace: None,
                    object_type: Some(id),
                    params: vec![Param::new("value", def.ty)],
                    num_defaults: 0,
                    result: None,
                    entry: Rc::new(move |_, args| {
                        *cell.borrow_mut() = args[0].clone();
                        Value::None
                    }),
                })
            };
            statics.push(Static {
                name: def.name,
                ty: def.ty,
                cell,
                getter,
                setter,
            });
        }

        let mut operators = Vec::new();
        for def in class.operators {
            if def.params.len() != 2 {
                return Err(ReflectError::BadOperatorArity(def.name));
            }
            let function = Rc::new(Callable {
                id: self.alloc_callable(),
                name: def.name.clone(),
                kind: CallableKind::Function,
                namespace: None,
                object_type: Some(id),
                params: def.params,
                num_defaults: 0,
                result: def.result,
                entry: def.entry,
            });
            operators.push(Operator {
                name: def.name,
                sign: def.sign,
                function,
            });
        }

        Ok(TypeDescriptor {
            id,
            name: class.name,
            namespace: class.namespace.unwrap_or(0),
            kind: class.kind,
            base: class.base,
            constructors,
            members: class.members,
            methods,
            statics,
            operators,
            variants: Vec::new(),
            sequence_of: class.sequence_of,
            destructor: class.destructor,
            copy: class.copy,
        })
    }
}

impl Default for DbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_defaults(owner: &str, params: &[Param]) -> Result<usize, ReflectError> {
    let mut seen_default = false;
    let mut count = 0;
    for param in params {
        match (&param.default, seen_default) {
            (Some(_), _) => {
                seen_default = true;
                count += 1;
            }
            (None, true) => return Err(ReflectError::NonTrailingDefault(owner.to_owned())),
            (None, false) => {}
        }
    }
    Ok(count)
}
