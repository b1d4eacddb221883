//! Bridge context — ownership of all mutable bridge state
//!
//! `BridgeCore` is the state every registered trampoline closes over: the
//! frozen reflection database, the codec tables, the handle tables, and
//! the binding cache. `Bridge` wraps a shared core with the declaration
//! driver (prelude install, namespace and type declaration) and the
//! module-variable surface (`get` / `set` / `eval`).
//!
//! Lifecycle: build the database, construct the `Bridge`, `install` the
//! prelude, then `declare_all` (or the granular declare methods). Call
//! `teardown` to hand every pinned handle back before the VM goes away.
//! Handle tables are written during declaration and read thereafter.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use weft_reflect::{Callable, CallableId, Namespace, ReflectionDb, TypeId, TypeKind, Value};
use weft_vm::{ScriptVm, VmHandle};

use crate::binder;
use crate::declgen::{self, NamespaceDecls};
use crate::dispatch::CallBinding;
use crate::error::BridgeError;
use crate::gateway::{self, ScriptRef};
use crate::marshal::{self, Codecs};

const MAIN: &str = "main";

// ============================================================================
// Configuration
// ============================================================================

/// Construction options for a [`Bridge`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Namespace prefixes stripped from script-visible names. Lookup keys
    /// inside generated `ref(...)` calls keep the raw spelling.
    pub import_namespaces: Vec<String>,
    /// Log every generated declaration at debug level before interpreting.
    pub dump_declarations: bool,
}

// ============================================================================
// Shared core
// ============================================================================

/// State shared between the bridge and its trampolines through `Rc`.
///
/// The handle and binding tables are id-indexed and sized once from the
/// frozen database, so lookups never rehash and ids never go out of
/// range. Interior mutability covers the declaration-time writes.
pub struct BridgeCore {
    pub(crate) db: Rc<ReflectionDb>,
    pub(crate) config: BridgeConfig,
    pub(crate) codecs: Codecs,
    class_handles: RefCell<Vec<Option<VmHandle>>>,
    type_handles: RefCell<Vec<Option<VmHandle>>>,
    method_handles: RefCell<Vec<Option<VmHandle>>>,
    bindings: RefCell<Vec<Option<Rc<CallBinding>>>>,
    retained: RefCell<Vec<VmHandle>>,
}

impl BridgeCore {
    pub fn new(db: Rc<ReflectionDb>, config: BridgeConfig) -> BridgeCore {
        let codecs = marshal::default_codecs(&db);
        let types = db.types().count();
        let callables = db.callable_count();
        BridgeCore {
            db,
            config,
            codecs,
            class_handles: RefCell::new(vec![None; types]),
            type_handles: RefCell::new(vec![None; types]),
            method_handles: RefCell::new(vec![None; callables]),
            bindings: RefCell::new(vec![None; callables]),
            retained: RefCell::new(Vec::new()),
        }
    }

    /// The binding for one callable, created on first use and identical
    /// (`Rc::ptr_eq`) on every later one.
    pub fn binding(&self, callable: &Rc<Callable>) -> Rc<CallBinding> {
        self.bindings.borrow_mut()[callable.id]
            .get_or_insert_with(|| Rc::new(CallBinding::new(callable.clone())))
            .clone()
    }

    pub fn class_handle(&self, ty: TypeId) -> Option<VmHandle> {
        self.class_handles.borrow()[ty]
    }

    pub fn type_handle(&self, ty: TypeId) -> Option<VmHandle> {
        self.type_handles.borrow()[ty]
    }

    pub fn method_handle(&self, callable: CallableId) -> Option<VmHandle> {
        self.method_handles.borrow()[callable]
    }

    pub fn store_class_handle(&self, vm: &mut dyn ScriptVm, ty: TypeId, handle: VmHandle) {
        store(vm, &mut self.class_handles.borrow_mut()[ty], handle);
    }

    pub fn store_type_handle(&self, vm: &mut dyn ScriptVm, ty: TypeId, handle: VmHandle) {
        store(vm, &mut self.type_handles.borrow_mut()[ty], handle);
    }

    pub fn store_method_handle(
        &self,
        vm: &mut dyn ScriptVm,
        callable: CallableId,
        handle: VmHandle,
    ) {
        store(vm, &mut self.method_handles.borrow_mut()[callable], handle);
    }

    /// Pin a handle for the rest of the bridge's life. Used for the
    /// script receivers of virtually constructed objects.
    pub fn retain(&self, handle: VmHandle) {
        self.retained.borrow_mut().push(handle);
    }

    /// Type display name for diagnostics.
    pub fn type_name(&self, ty: TypeId) -> String {
        self.db.type_info(ty).name.clone()
    }

    fn release_all(&self, vm: &mut dyn ScriptVm) {
        let tables = [&self.class_handles, &self.type_handles, &self.method_handles];
        for table in tables {
            for slot in table.borrow_mut().iter_mut() {
                if let Some(handle) = slot.take() {
                    vm.release_handle(handle);
                }
            }
        }
        for handle in self.retained.borrow_mut().drain(..) {
            vm.release_handle(handle);
        }
    }
}

/// Replace a table entry, handing a displaced handle back to the VM.
fn store(vm: &mut dyn ScriptVm, slot: &mut Option<VmHandle>, handle: VmHandle) {
    if let Some(old) = slot.replace(handle) {
        vm.release_handle(old);
    }
}

impl fmt::Debug for BridgeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = |table: &RefCell<Vec<Option<VmHandle>>>| {
            table.borrow().iter().filter(|slot| slot.is_some()).count()
        };
        f.debug_struct("BridgeCore")
            .field("db", &self.db)
            .field("class_handles", &filled(&self.class_handles))
            .field("type_handles", &filled(&self.type_handles))
            .field("method_handles", &filled(&self.method_handles))
            .field(
                "bindings",
                &self.bindings.borrow().iter().filter(|b| b.is_some()).count(),
            )
            .field("retained", &self.retained.borrow().len())
            .finish()
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// The scripting bridge over one reflection database.
///
/// Owns the shared core plus the declaration-time accumulators: wrapper
/// text for free functions, keyed by namespace class, and the set of
/// module variables `set` has declared.
pub struct Bridge {
    core: Rc<BridgeCore>,
    namespaces: FxHashMap<String, NamespaceDecls>,
    variables: FxHashSet<String>,
}

impl Bridge {
    pub fn new(db: Rc<ReflectionDb>, config: BridgeConfig) -> Bridge {
        Bridge {
            core: Rc::new(BridgeCore::new(db, config)),
            namespaces: FxHashMap::default(),
            variables: FxHashSet::default(),
        }
    }

    pub fn db(&self) -> &ReflectionDb {
        &self.core.db
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Rc<BridgeCore> {
        &self.core
    }

    /// Identity-stable binding for `callable` (see [`BridgeCore::binding`]).
    pub fn binding(&self, callable: &Rc<Callable>) -> Rc<CallBinding> {
        self.core.binding(callable)
    }

    /// Handle of a declared class, once `declare_type` has run for it.
    pub fn class_handle(&self, ty: TypeId) -> Option<VmHandle> {
        self.core.class_handle(ty)
    }

    /// Handle recorded by the `Type` allocator when script resolved `ty`.
    pub fn type_handle(&self, ty: TypeId) -> Option<VmHandle> {
        self.core.type_handle(ty)
    }

    // ------------------------------------------------------------------
    // Declaration driver
    // ------------------------------------------------------------------

    /// Install the prelude: register the meta-class hooks, interpret the
    /// prelude source into `"main"`, and capture each meta class handle.
    /// Nothing else works until this has succeeded.
    pub fn install(&self, vm: &mut dyn ScriptVm) -> Result<(), BridgeError> {
        binder::install_prelude(&self.core, vm);
        let source = declgen::prelude_source();
        self.dump(MAIN, source);
        vm.interpret(MAIN, source)
            .map_err(|err| BridgeError::Declaration {
                name: "prelude".to_owned(),
                source: err,
            })?;

        let b = self.core.db.builtins().clone();
        let metas = [
            ("Function", b.function_meta),
            ("Type", b.type_meta),
            ("Constructor", b.constructor_meta),
            ("Member", b.member_meta),
            ("Static", b.static_meta),
            ("Method", b.method_meta),
            ("Operator", b.operator_meta),
            ("VirtualConstructor", b.virtual_constructor_meta),
        ];
        vm.ensure_slots(1);
        for (name, ty) in metas {
            vm.get_variable(MAIN, name, 0);
            let handle = vm.slot_handle(0);
            self.core.store_class_handle(vm, ty, handle);
        }
        Ok(())
    }

    /// Declare everything the database holds: namespace import preambles,
    /// free functions accumulated and flushed per namespace class, then
    /// type declarations, in database registration order. Individual
    /// failures are reported and skipped; the rest proceed.
    pub fn declare_all(&mut self, vm: &mut dyn ScriptVm) {
        let namespaces: Vec<Rc<Namespace>> = self.core.db.namespaces().cloned().collect();
        for ns in &namespaces {
            if let Err(err) = self.prepare_namespace(vm, ns) {
                err.report();
            }
        }

        let functions: Vec<Rc<Callable>> = self.core.db.functions().cloned().collect();
        for function in &functions {
            self.register_function(function);
        }
        for ns in &namespaces {
            if let Err(err) = self.declare_namespace(vm, ns) {
                err.report();
            }
        }

        let types: Vec<TypeId> = self.core.db.types().map(|ty| ty.id).collect();
        for ty in types {
            if let Err(err) = self.declare_type(vm, ty) {
                err.report();
            }
        }
    }

    /// Interpret the import preamble into a namespace's module so the
    /// declarations generated there can see the prelude classes.
    pub fn prepare_namespace(
        &self,
        vm: &mut dyn ScriptVm,
        ns: &Namespace,
    ) -> Result<(), BridgeError> {
        if ns.is_root() {
            return Ok(());
        }
        let source = declgen::import_preamble();
        self.dump(&ns.name, source);
        vm.interpret(&ns.name, source)
            .map_err(|err| BridgeError::Declaration {
                name: ns.name.clone(),
                source: err,
            })
    }

    /// Accumulate one free function's wrapper text under its namespace
    /// class key; [`Bridge::declare_namespace`] flushes it.
    pub fn register_function(&mut self, function: &Rc<Callable>) {
        let ns = self.core.db.namespace(function.namespace.unwrap_or(0));
        let key = declgen::namespace_class_key(ns, &self.core.config.import_namespaces);
        let (wrapper, init) = declgen::function_wrapper(function, &ns.name);
        let record = self.namespaces.entry(key).or_default();
        record.methods.push_str(&wrapper);
        record.init.push_str(&init);
    }

    /// Flush the namespace class accumulated under `ns`'s key into the
    /// parent namespace's module. A key already flushed (or never
    /// written) is a no-op, so namespaces sharing a class after prefix
    /// stripping declare once.
    pub fn declare_namespace(
        &mut self,
        vm: &mut dyn ScriptVm,
        ns: &Namespace,
    ) -> Result<(), BridgeError> {
        let key = declgen::namespace_class_key(ns, &self.core.config.import_namespaces);
        let Some(record) = self.namespaces.remove(&key) else {
            return Ok(());
        };
        let source = declgen::namespace_class_decl(&key, &record);
        let module = self.parent_module(ns);
        self.dump(&module, &source);
        vm.interpret(&module, &source)
            .map_err(|err| BridgeError::Declaration {
                name: key,
                source: err,
            })
    }

    /// Declare one reflected type: interpret its generated declaration
    /// and capture the class handle plus one call handle per method.
    /// Meta, primitive, and sequence types have no declaration of their
    /// own. Re-declaring replaces the recorded handles.
    pub fn declare_type(&self, vm: &mut dyn ScriptVm, ty: TypeId) -> Result<(), BridgeError> {
        let descriptor = self.core.db.type_info(ty).clone();
        if self.core.db.builtins().is_meta(ty)
            || descriptor.kind == TypeKind::Primitive
            || descriptor.sequence_of.is_some()
        {
            return Ok(());
        }
        let clean = declgen::clean_name(&descriptor.name, &self.core.config.import_namespaces);
        let module = declgen::declaration_module(&self.core.db, &descriptor);

        if descriptor.kind == TypeKind::Enum {
            let source = declgen::enum_decl(&descriptor, &clean);
            self.dump(&module, &source);
            return vm
                .interpret(&module, &source)
                .map_err(|err| BridgeError::Declaration {
                    name: descriptor.name.clone(),
                    source: err,
                });
        }

        // Hooks must exist before the declaration compiles; the VM binds
        // them while interpreting the foreign class.
        binder::install_class(&self.core, vm, &module, &clean);
        let source = declgen::class_decl(&descriptor, &clean);
        self.dump(&module, &source);
        vm.interpret(&module, &source)
            .map_err(|err| BridgeError::Declaration {
                name: descriptor.name.clone(),
                source: err,
            })?;

        vm.ensure_slots(1);
        vm.get_variable(&module, &clean, 0);
        let handle = vm.slot_handle(0);
        self.core.store_class_handle(vm, ty, handle);
        for method in &descriptor.methods {
            let signature = declgen::call_signature(&method.name, method.arity());
            let handle = vm.make_call_handle(&signature);
            self.core.store_method_handle(vm, method.id, handle);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Variables and evaluation
    // ------------------------------------------------------------------

    /// Read the module variable `name` from `"main"` as `expected`.
    pub fn get(
        &self,
        vm: &mut dyn ScriptVm,
        name: &str,
        expected: TypeId,
    ) -> Result<Value, BridgeError> {
        if !vm.has_variable(MAIN, name) {
            return Err(BridgeError::NotDeclared {
                what: format!("variable `{name}`"),
            });
        }
        vm.ensure_slots(1);
        vm.get_variable(MAIN, name, 0);
        Ok(marshal::read_slot(&self.core, vm, 0, expected))
    }

    /// Assign the module variable `name` in `"main"`, declaring it on
    /// first sight. A value the codecs cannot push still assigns the
    /// null that was crossed in its place, and the error says why.
    pub fn set(
        &mut self,
        vm: &mut dyn ScriptVm,
        name: &str,
        value: &Value,
    ) -> Result<(), BridgeError> {
        if !self.variables.contains(name) && !vm.has_variable(MAIN, name) {
            let declaration = format!("var {name} = null");
            vm.interpret(MAIN, &declaration)
                .map_err(|err| BridgeError::Declaration {
                    name: name.to_owned(),
                    source: err,
                })?;
        }
        self.variables.insert(name.to_owned());
        vm.ensure_slots(1);
        let written = marshal::write_slot(&self.core, vm, 0, value);
        vm.assign_variable(MAIN, name, 0);
        written
    }

    /// Interpret a source string in `"main"`.
    pub fn eval(&self, vm: &mut dyn ScriptVm, source: &str) -> Result<(), BridgeError> {
        Ok(vm.interpret(MAIN, source)?)
    }

    /// Call a declared script method on `receiver` (the reverse
    /// direction). `args` must match the method's declared arity.
    pub fn call_script(
        &self,
        vm: &mut dyn ScriptVm,
        receiver: &ScriptRef,
        method: &Rc<Callable>,
        args: &[Value],
    ) -> Result<Value, BridgeError> {
        gateway::call_script(&self.core, vm, receiver, method, args)
    }

    /// Release every handle the bridge pinned: class, type, and method
    /// tables plus retained receivers. Call before dropping the VM; the
    /// bridge no longer dispatches afterwards.
    pub fn teardown(&self, vm: &mut dyn ScriptVm) {
        self.core.release_all(vm);
    }

    fn parent_module(&self, ns: &Namespace) -> String {
        match ns.parent.map(|id| self.core.db.namespace(id)) {
            Some(parent) if !parent.is_root() => parent.name.clone(),
            _ => MAIN.to_owned(),
        }
    }

    fn dump(&self, module: &str, source: &str) {
        if self.core.config.dump_declarations {
            log::debug!("declaring into module `{module}`:\n{source}");
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("core", &self.core)
            .field("pending_namespaces", &self.namespaces.len())
            .field("variables", &self.variables.len())
            .finish()
    }
}
