//! In-memory VM double for testing bridge logic without an embedded VM
//!
//! `MockVm` implements the full slot protocol over plain Rust data and
//! records everything the bridge does to it: interpreted source, foreign
//! registrations, handle traffic, and calls. Interpreting source scans for
//! `class` / `foreign class` / `var` declarations and defines the matching
//! module variables, so handle capture after a declaration behaves like it
//! does against a real interpreter. Tests drive the script side by seeding
//! slots, scripting per-signature call handlers, and invoking registered
//! foreign hooks directly. Slot protocol violations (reading past the
//! ensured count, typed reads of the wrong kind) panic.

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::context::{ScriptVm, SlotKind, VmError, VmHandle};
use crate::foreign::{ForeignClassHooks, ForeignInstance, ForeignMethod};

/// Plain-data model of one slot's content. `Object` stands in for script
/// values that have no slot type of their own (classes, instances); a real
/// VM reports those as [`SlotKind::Unknown`].
#[derive(Debug, Clone)]
pub enum SlotValue {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<SlotValue>),
    Foreign(ForeignInstance),
    Object(String),
}

impl SlotValue {
    pub fn kind(&self) -> SlotKind {
        match self {
            SlotValue::Null => SlotKind::Null,
            SlotValue::Bool(_) => SlotKind::Bool,
            SlotValue::Number(_) => SlotKind::Number,
            SlotValue::Str(_) => SlotKind::String,
            SlotValue::List(_) => SlotKind::List,
            SlotValue::Foreign(_) => SlotKind::Foreign,
            SlotValue::Object(_) => SlotKind::Unknown,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            SlotValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SlotValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SlotValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SlotValue::Null)
    }
}

/// What a pinned handle refers to.
#[derive(Debug, Clone)]
enum HandleValue {
    Value(SlotValue),
    CallSignature(String),
}

/// One recorded `call` invocation: the signature and the slot layout at
/// the moment of the call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub signature: String,
    pub slots: Vec<SlotValue>,
}

/// A test-scripted implementation of one call signature.
pub type CallHandler = Rc<dyn Fn(&mut MockVm)>;

/// Recording VM double. See the module docs.
pub struct MockVm {
    slots: Vec<SlotValue>,
    variables: FxHashMap<(String, String), SlotValue>,
    handles: Vec<HandleValue>,
    released: Vec<u64>,
    classes: FxHashMap<(String, String), ForeignClassHooks>,
    methods: FxHashMap<(String, String, bool, String), ForeignMethod>,
    interpreted: Vec<(String, String)>,
    interpret_failures: Vec<(String, VmError)>,
    interpret_responses: VecDeque<Result<(), VmError>>,
    calls: Vec<CallRecord>,
    call_handlers: FxHashMap<String, CallHandler>,
    call_responses: VecDeque<Result<SlotValue, VmError>>,
}

impl MockVm {
    pub fn new() -> Self {
        MockVm {
            slots: Vec::new(),
            variables: FxHashMap::default(),
            handles: Vec::new(),
            released: Vec::new(),
            classes: FxHashMap::default(),
            methods: FxHashMap::default(),
            interpreted: Vec::new(),
            interpret_failures: Vec::new(),
            interpret_responses: VecDeque::new(),
            calls: Vec::new(),
            call_handlers: FxHashMap::default(),
            call_responses: VecDeque::new(),
        }
    }

    // ------------------------------------------------------------------
    // Test-side controls
    // ------------------------------------------------------------------

    /// Seed a module variable so `get_variable` finds it.
    pub fn set_variable(&mut self, module: &str, name: &str, value: SlotValue) {
        self.variables
            .insert((module.to_owned(), name.to_owned()), value);
    }

    /// Seed a foreign payload directly, without the class slot an
    /// allocate path would stage.
    pub fn set_foreign(&mut self, slot: usize, instance: ForeignInstance) {
        self.check_slot(slot);
        self.slots[slot] = SlotValue::Foreign(instance);
    }

    /// Queue the outcome of the next `interpret`.
    pub fn queue_interpret(&mut self, response: Result<(), VmError>) {
        self.interpret_responses.push_back(response);
    }

    /// Make every `interpret` whose source contains `needle` fail.
    pub fn fail_interpret_containing(&mut self, needle: &str, error: VmError) {
        self.interpret_failures.push((needle.to_owned(), error));
    }

    /// Queue the slot-0 result (or error) of the next `call`.
    pub fn queue_call(&mut self, response: Result<SlotValue, VmError>) {
        self.call_responses.push_back(response);
    }

    /// Script the behavior of one call signature. The handler runs with
    /// the caller's slot layout and leaves its result in slot 0.
    pub fn on_call(&mut self, signature: &str, handler: impl Fn(&mut MockVm) + 'static) {
        self.call_handlers
            .insert(signature.to_owned(), Rc::new(handler));
    }

    // ------------------------------------------------------------------
    // Test-side inspection
    // ------------------------------------------------------------------

    pub fn slot(&self, slot: usize) -> &SlotValue {
        &self.slots[slot]
    }

    pub fn interpreted(&self) -> &[(String, String)] {
        &self.interpreted
    }

    /// All interpreted source for one module, concatenated.
    pub fn module_source(&self, module: &str) -> String {
        self.interpreted
            .iter()
            .filter(|(m, _)| m == module)
            .map(|(_, src)| src.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn foreign_class(&self, module: &str, class: &str) -> Option<&ForeignClassHooks> {
        self.classes.get(&(module.to_owned(), class.to_owned()))
    }

    pub fn foreign_method(
        &self,
        module: &str,
        class: &str,
        is_static: bool,
        signature: &str,
    ) -> Option<ForeignMethod> {
        self.methods
            .get(&(
                module.to_owned(),
                class.to_owned(),
                is_static,
                signature.to_owned(),
            ))
            .cloned()
    }

    /// Signatures of every registered foreign method, sorted.
    pub fn method_signatures(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .methods
            .keys()
            .map(|(module, class, is_static, sig)| {
                if *is_static {
                    format!("{module}/{class}.static {sig}")
                } else {
                    format!("{module}/{class}.{sig}")
                }
            })
            .collect();
        out.sort();
        out
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn released_handles(&self) -> &[u64] {
        &self.released
    }

    fn check_slot(&self, slot: usize) {
        if slot >= self.slots.len() {
            panic!(
                "slot {} accessed but only {} ensured",
                slot,
                self.slots.len()
            );
        }
    }

    /// A real interpreter defines module variables for top-level `class`
    /// and `var` declarations; mirror that so handle capture after a
    /// declaration finds something.
    fn scan_declarations(&mut self, module: &str, source: &str) {
        for line in source.lines() {
            let line = line.trim_start();
            let parsed = if let Some(rest) = line.strip_prefix("foreign class ") {
                Some((rest, true))
            } else if let Some(rest) = line.strip_prefix("class ") {
                Some((rest, true))
            } else if let Some(rest) = line.strip_prefix("var ") {
                Some((rest, false))
            } else {
                None
            };
            let Some((rest, is_class)) = parsed else {
                continue;
            };
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if name.is_empty() {
                continue;
            }
            let value = if is_class {
                SlotValue::Object(format!("class {name}"))
            } else {
                SlotValue::Null
            };
            self.variables.insert((module.to_owned(), name), value);
        }
    }

    fn pin(&mut self, value: HandleValue) -> VmHandle {
        let raw = self.handles.len() as u64;
        self.handles.push(value);
        VmHandle::new(raw)
    }
}

impl Default for MockVm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptVm for MockVm {
    fn interpret(&mut self, module: &str, source: &str) -> Result<(), VmError> {
        self.interpreted
            .push((module.to_owned(), source.to_owned()));
        for (needle, error) in &self.interpret_failures {
            if source.contains(needle.as_str()) {
                return Err(error.clone());
            }
        }
        if let Some(response) = self.interpret_responses.pop_front() {
            return response;
        }
        self.scan_declarations(module, source);
        Ok(())
    }

    fn ensure_slots(&mut self, count: usize) {
        if count > self.slots.len() {
            self.slots.resize(count, SlotValue::Null);
        }
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_kind(&self, slot: usize) -> SlotKind {
        self.check_slot(slot);
        self.slots[slot].kind()
    }

    fn slot_bool(&self, slot: usize) -> bool {
        self.check_slot(slot);
        match &self.slots[slot] {
            SlotValue::Bool(b) => *b,
            other => panic!("slot {} holds {:?}, not a bool", slot, other.kind()),
        }
    }

    fn slot_number(&self, slot: usize) -> f64 {
        self.check_slot(slot);
        match &self.slots[slot] {
            SlotValue::Number(n) => *n,
            other => panic!("slot {} holds {:?}, not a number", slot, other.kind()),
        }
    }

    fn slot_string(&self, slot: usize) -> String {
        self.check_slot(slot);
        match &self.slots[slot] {
            SlotValue::Str(s) => s.clone(),
            other => panic!("slot {} holds {:?}, not a string", slot, other.kind()),
        }
    }

    fn slot_foreign(&self, slot: usize) -> Option<&ForeignInstance> {
        self.check_slot(slot);
        match &self.slots[slot] {
            SlotValue::Foreign(instance) => Some(instance),
            _ => None,
        }
    }

    fn set_slot_bool(&mut self, slot: usize, value: bool) {
        self.check_slot(slot);
        self.slots[slot] = SlotValue::Bool(value);
    }

    fn set_slot_number(&mut self, slot: usize, value: f64) {
        self.check_slot(slot);
        self.slots[slot] = SlotValue::Number(value);
    }

    fn set_slot_string(&mut self, slot: usize, value: &str) {
        self.check_slot(slot);
        self.slots[slot] = SlotValue::Str(value.to_owned());
    }

    fn set_slot_null(&mut self, slot: usize) {
        self.check_slot(slot);
        self.slots[slot] = SlotValue::Null;
    }

    fn set_slot_new_foreign(&mut self, slot: usize, class_slot: usize, instance: ForeignInstance) {
        self.check_slot(slot);
        self.check_slot(class_slot);
        self.slots[slot] = SlotValue::Foreign(instance);
    }

    fn set_slot_new_list(&mut self, slot: usize) {
        self.check_slot(slot);
        self.slots[slot] = SlotValue::List(Vec::new());
    }

    fn list_count(&self, slot: usize) -> usize {
        self.check_slot(slot);
        match &self.slots[slot] {
            SlotValue::List(items) => items.len(),
            other => panic!("slot {} holds {:?}, not a list", slot, other.kind()),
        }
    }

    fn list_element(&mut self, list_slot: usize, index: usize, element_slot: usize) {
        self.check_slot(list_slot);
        self.check_slot(element_slot);
        let element = match &self.slots[list_slot] {
            SlotValue::List(items) => match items.get(index) {
                Some(item) => item.clone(),
                None => panic!("list index {} out of range ({})", index, items.len()),
            },
            other => panic!("slot {} holds {:?}, not a list", list_slot, other.kind()),
        };
        self.slots[element_slot] = element;
    }

    fn list_insert(&mut self, list_slot: usize, index: usize, element_slot: usize) {
        self.check_slot(list_slot);
        self.check_slot(element_slot);
        let element = self.slots[element_slot].clone();
        match &mut self.slots[list_slot] {
            SlotValue::List(items) => {
                if index > items.len() {
                    panic!("list insert at {} past end ({})", index, items.len());
                }
                items.insert(index, element);
            }
            other => panic!("slot {} holds {:?}, not a list", list_slot, other.kind()),
        }
    }

    fn has_variable(&mut self, module: &str, name: &str) -> bool {
        self.variables
            .contains_key(&(module.to_owned(), name.to_owned()))
    }

    fn get_variable(&mut self, module: &str, name: &str, slot: usize) {
        self.check_slot(slot);
        let value = self
            .variables
            .get(&(module.to_owned(), name.to_owned()))
            .cloned()
            .unwrap_or(SlotValue::Null);
        self.slots[slot] = value;
    }

    fn assign_variable(&mut self, module: &str, name: &str, slot: usize) {
        self.check_slot(slot);
        self.variables.insert(
            (module.to_owned(), name.to_owned()),
            self.slots[slot].clone(),
        );
    }

    fn slot_handle(&mut self, slot: usize) -> VmHandle {
        self.check_slot(slot);
        let value = self.slots[slot].clone();
        self.pin(HandleValue::Value(value))
    }

    fn set_slot_handle(&mut self, slot: usize, handle: &VmHandle) {
        self.check_slot(slot);
        match &self.handles[handle.raw() as usize] {
            HandleValue::Value(value) => self.slots[slot] = value.clone(),
            HandleValue::CallSignature(sig) => {
                panic!("call handle '{}' placed in a data slot", sig)
            }
        }
    }

    fn make_call_handle(&mut self, signature: &str) -> VmHandle {
        self.pin(HandleValue::CallSignature(signature.to_owned()))
    }

    fn call(&mut self, method: &VmHandle) -> Result<(), VmError> {
        let signature = match &self.handles[method.raw() as usize] {
            HandleValue::CallSignature(sig) => sig.clone(),
            HandleValue::Value(_) => {
                return Err(VmError::Runtime {
                    message: "call on a non-method handle".to_owned(),
                })
            }
        };
        self.calls.push(CallRecord {
            signature: signature.clone(),
            slots: self.slots.clone(),
        });
        if let Some(handler) = self.call_handlers.get(&signature).cloned() {
            handler(self);
            return Ok(());
        }
        match self.call_responses.pop_front() {
            Some(Ok(result)) => {
                self.ensure_slots(1);
                self.slots[0] = result;
                Ok(())
            }
            Some(Err(error)) => Err(error),
            None => {
                self.ensure_slots(1);
                self.slots[0] = SlotValue::Null;
                Ok(())
            }
        }
    }

    fn release_handle(&mut self, handle: VmHandle) {
        self.released.push(handle.raw());
    }

    fn register_foreign_class(&mut self, module: &str, class: &str, hooks: ForeignClassHooks) {
        self.classes
            .insert((module.to_owned(), class.to_owned()), hooks);
    }

    fn register_foreign_method(
        &mut self,
        module: &str,
        class: &str,
        is_static: bool,
        signature: &str,
        method: ForeignMethod,
    ) {
        self.methods.insert(
            (
                module.to_owned(),
                class.to_owned(),
                is_static,
                signature.to_owned(),
            ),
            method,
        );
    }
}
