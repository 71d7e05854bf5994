//! The runtime context.
//!
//! A [`Runtime`] owns every piece of mutable state: the object arena, the
//! class registry, the static-symbol table, the call-annotation stack and
//! the bootstrap specials. Nothing is process-global; concurrent use means
//! one runtime per thread (only the name interner is shareable). All work
//! is synchronous — the only non-local control transfer is the unwind
//! carried by `RtResult`, which is resolved before control returns to any
//! caller.

use crate::call::call;
use crate::class::{ClassError, ClassId, ClassRegistry, FieldAccess, FieldSlot};
use crate::heap::{Body, Heap, Obj, deep_eq, deep_hash};
use crate::interning::{Interner, Statics, Sym};
use crate::table::OpenTable;
use crate::tagged::Value;
use crate::unwind::{Raise, RtResult};

/// Bootstrap classes and symbols every runtime carries.
#[derive(Debug, Clone, Copy)]
pub struct Specials {
    pub str_class: ClassId,
    pub tuple_class: ClassId,
    pub func_class: ClassId,
    pub map_class: ClassId,
    pub set_class: ClassId,
    /// Common parent of the builtin error classes, so `catch (Error)`
    /// nets all of them.
    pub error_base: ClassId,
    pub arity_error: ClassId,
    pub method_missing: ClassId,
    pub field_missing: ClassId,
    pub type_error: ClassId,
    pub duplicate_definition: ClassId,
    pub structural_class: ClassId,
    pub undefined_symbol: ClassId,
    /// Reserved method name captured as a class destructor.
    pub destructor_sym: Sym,
    pub anon_sym: Sym,
    pub message_sym: Sym,
}

pub struct Runtime {
    pub heap: Heap,
    pub classes: ClassRegistry,
    pub interner: Interner,
    pub statics: Statics,
    /// Names of active calls, innermost last. Read by raise snapshots.
    pub annotations: Vec<Sym>,
    pub specials: Specials,
}

fn builtin(
    interner: &Interner,
    classes: &mut ClassRegistry,
    name: &str,
    parent: Option<ClassId>,
) -> ClassId {
    let sym = interner.intern(name);
    classes
        .register(sym, parent, 0)
        .expect("bootstrap class names are unique")
}

fn error_class(
    interner: &Interner,
    classes: &mut ClassRegistry,
    name: &str,
    base: ClassId,
    message: Sym,
) -> ClassId {
    let id = builtin(interner, classes, name, Some(base));
    classes
        .add_field(id, message, FieldAccess::READ)
        .expect("error classes are open during bootstrap");
    id
}

fn bootstrap(interner: &Interner, classes: &mut ClassRegistry) -> Specials {
    let str_class = builtin(interner, classes, "Str", None);
    let tuple_class = builtin(interner, classes, "Tuple", None);
    let func_class = builtin(interner, classes, "Func", None);
    let map_class = builtin(interner, classes, "Map", None);
    let set_class = builtin(interner, classes, "Set", None);

    let message_sym = interner.intern("message");
    let error_base = builtin(interner, classes, "Error", None);
    let arity_error = error_class(interner, classes, "ArityError", error_base, message_sym);
    let method_missing = error_class(interner, classes, "MethodMissing", error_base, message_sym);
    let field_missing = error_class(interner, classes, "FieldMissing", error_base, message_sym);
    let type_error = error_class(interner, classes, "TypeError", error_base, message_sym);
    let duplicate_definition = error_class(
        interner,
        classes,
        "DuplicateDefinitionError",
        error_base,
        message_sym,
    );
    let structural_class = error_class(
        interner,
        classes,
        "StructuralClassError",
        error_base,
        message_sym,
    );
    let undefined_symbol = error_class(
        interner,
        classes,
        "UndefinedSymbolError",
        error_base,
        message_sym,
    );

    // builtins must be constructible before user registration finishes
    for id in [
        str_class,
        tuple_class,
        func_class,
        map_class,
        set_class,
        error_base,
        arity_error,
        method_missing,
        field_missing,
        type_error,
        duplicate_definition,
        structural_class,
        undefined_symbol,
    ] {
        classes.seal(id);
    }

    Specials {
        str_class,
        tuple_class,
        func_class,
        map_class,
        set_class,
        error_base,
        arity_error,
        method_missing,
        field_missing,
        type_error,
        duplicate_definition,
        structural_class,
        undefined_symbol,
        destructor_sym: interner.intern("__del__"),
        anon_sym: interner.intern("<anonymous>"),
        message_sym,
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_interner(Interner::new())
    }

    /// Build a runtime around an existing (possibly shared) interner.
    pub fn with_interner(interner: Interner) -> Self {
        let mut classes = ClassRegistry::new();
        let specials = bootstrap(&interner, &mut classes);
        log::debug!("bootstrapped {} builtin classes", classes.len());
        Self {
            heap: Heap::new(),
            classes,
            interner,
            statics: Statics::new(),
            annotations: Vec::new(),
            specials,
        }
    }

    #[inline]
    pub fn intern(&self, name: &str) -> Sym {
        self.interner.intern(name)
    }

    // ── Builtin values ─────────────────────────────────────────────

    pub fn new_string(&mut self, s: &str) -> Value {
        let class = self.specials.str_class;
        Value::from_handle(self.heap.alloc(class, Body::Str(s.to_owned())))
    }

    pub fn str_content(&self, v: Value) -> Option<&str> {
        match &self.obj(v)?.body {
            Body::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn new_tuple(&mut self, items: Vec<Value>) -> Value {
        let class = self.specials.tuple_class;
        Value::from_handle(
            self.heap
                .alloc(class, Body::Tuple(items.into_boxed_slice())),
        )
    }

    pub fn tuple_items(&self, v: Value) -> Option<&[Value]> {
        match &self.obj(v)?.body {
            Body::Tuple(items) => Some(items),
            _ => None,
        }
    }

    // ── Object access ──────────────────────────────────────────────

    /// `None` for non-references and for stale handles.
    pub fn obj(&self, v: Value) -> Option<&Obj> {
        if !v.is_ref() {
            return None;
        }
        self.heap.get(v.as_handle())
    }

    pub fn class_of(&self, v: Value) -> Option<ClassId> {
        Some(self.obj(v)?.class)
    }

    pub fn is_instance_of(&self, v: Value, class: ClassId) -> bool {
        self.class_of(v)
            .is_some_and(|c| self.classes.is_subclass(c, class))
    }

    pub fn class_named(&self, name: &str) -> Option<ClassId> {
        let sym = self.intern(name);
        self.classes.lookup(sym)
    }

    // ── Class registration ─────────────────────────────────────────

    fn class_error(&mut self, err: ClassError) -> Raise {
        match err {
            ClassError::Duplicate { name } => {
                let name = self.sym_name(name);
                self.raise_duplicate("class", &name)
            }
            ClassError::Sealed { class } => {
                let name = self.sym_name(self.classes.get(class).name);
                let class_id = self.specials.type_error;
                self.exception(class_id, format!("class {name:?} is sealed"))
            }
            ClassError::Structural { class } => {
                let name = self.sym_name(self.classes.get(class).name);
                self.raise_structural(&name)
            }
        }
    }

    pub fn register_class(
        &mut self,
        name: &str,
        parent: Option<ClassId>,
        cdata_size: u32,
    ) -> RtResult<ClassId> {
        let sym = self.intern(name);
        self.register_class_sym(sym, parent, cdata_size)
    }

    pub fn register_class_sym(
        &mut self,
        name: Sym,
        parent: Option<ClassId>,
        cdata_size: u32,
    ) -> RtResult<ClassId> {
        match self.classes.register(name, parent, cdata_size) {
            Ok(id) => {
                log::debug!("registered class {} (cdata {cdata_size})", self.sym_name(name));
                Ok(id)
            }
            Err(e) => Err(self.class_error(e)),
        }
    }

    pub fn add_field(
        &mut self,
        class: ClassId,
        name: &str,
        access: FieldAccess,
    ) -> RtResult<u32> {
        let sym = self.intern(name);
        self.add_field_sym(class, sym, access)
    }

    pub fn add_field_sym(
        &mut self,
        class: ClassId,
        name: Sym,
        access: FieldAccess,
    ) -> RtResult<u32> {
        self.classes
            .add_field(class, name, access)
            .map_err(|e| self.class_error(e))
    }

    pub fn add_virtual_field_sym(
        &mut self,
        class: ClassId,
        name: Sym,
        getter: Option<Value>,
        setter: Option<Value>,
    ) -> RtResult<()> {
        self.classes
            .add_virtual_field(class, name, getter, setter)
            .map_err(|e| self.class_error(e))
    }

    pub fn add_method(&mut self, class: ClassId, name: &str, callable: Value) -> RtResult<()> {
        let sym = self.intern(name);
        self.add_method_sym(class, sym, callable)
    }

    pub fn add_method_sym(&mut self, class: ClassId, name: Sym, callable: Value) -> RtResult<()> {
        let destructor_sym = self.specials.destructor_sym;
        self.classes
            .add_method(class, name, callable, destructor_sym)
            .map_err(|e| self.class_error(e))
    }

    /// Validate storage exclusivity across every registered class, then
    /// seal them all. Called once all modules finished registration.
    pub fn finalize_registration(&mut self) -> RtResult<()> {
        self.classes.finalize().map_err(|e| self.class_error(e))
    }

    // ── Object lifecycle ───────────────────────────────────────────

    pub fn new_object(&mut self, class: ClassId) -> RtResult<Value> {
        let klass = self.classes.get(class);
        if !klass.sealed {
            let name = self.sym_name(klass.name);
            let type_error = self.specials.type_error;
            return Err(self.exception(type_error, format!("class {name:?} is not finalized")));
        }
        let body = if klass.cdata_size > 0 {
            Body::CData(vec![0u8; klass.cdata_size as usize].into_boxed_slice())
        } else {
            Body::Fields(vec![Value::NIL; klass.field_count as usize].into_boxed_slice())
        };
        Ok(Value::from_handle(self.heap.alloc(class, body)))
    }

    /// Run the destructor (if any), then retire the object's slot. Any
    /// handle kept past this point fails the generation check instead of
    /// observing recycled storage.
    pub fn destroy(&mut self, target: Value) -> RtResult<()> {
        let Some(class) = self.class_of(target) else {
            return Err(self.raise_type_error("live object", target));
        };
        let dtor = self.classes.get(class).destructor;
        if let Some(dtor) = dtor {
            call(self, dtor, &[target])?;
        }
        match self.heap.release(target.as_handle()) {
            Some(_) => Ok(()),
            None => Err(self.raise_type_error("live object", target)),
        }
    }

    // ── Field access & dispatch ────────────────────────────────────

    pub fn get_field(&mut self, recv: Value, name: Sym) -> RtResult<Value> {
        let Some(class) = self.class_of(recv) else {
            return Err(self.raise_type_error("object with fields", recv));
        };
        let Some(slot) = self.classes.get(class).readable_slot(name) else {
            return Err(self.raise_field_missing(recv, name));
        };
        match slot {
            FieldSlot::Offset(i) => {
                let stored = self.obj(recv).and_then(|obj| match &obj.body {
                    Body::Fields(fields) => fields.get(i as usize).copied(),
                    _ => None,
                });
                match stored {
                    Some(v) => Ok(v),
                    None => Err(self.raise_type_error("field object", recv)),
                }
            }
            FieldSlot::Virtual(getter) => call(self, getter, &[recv]),
        }
    }

    pub fn set_field(&mut self, recv: Value, name: Sym, value: Value) -> RtResult<()> {
        let Some(class) = self.class_of(recv) else {
            return Err(self.raise_type_error("object with fields", recv));
        };
        let Some(slot) = self.classes.get(class).writable_slot(name) else {
            return Err(self.raise_field_missing(recv, name));
        };
        match slot {
            FieldSlot::Offset(i) => {
                let wrote = self
                    .heap
                    .get_mut(recv.as_handle())
                    .map(|obj| match &mut obj.body {
                        Body::Fields(fields) => match fields.get_mut(i as usize) {
                            Some(slot) => {
                                *slot = value;
                                true
                            }
                            None => false,
                        },
                        _ => false,
                    })
                    .unwrap_or(false);
                if wrote {
                    Ok(())
                } else {
                    Err(self.raise_type_error("field object", recv))
                }
            }
            FieldSlot::Virtual(setter) => {
                call(self, setter, &[recv, value])?;
                Ok(())
            }
        }
    }

    /// Resolve a method on the receiver's class. No dispatch across the
    /// parent chain — parents are for identity checks only.
    pub fn dispatch_method(&mut self, recv: Value, name: Sym) -> RtResult<Value> {
        let Some(class) = self.class_of(recv) else {
            return Err(self.raise_type_error("object", recv));
        };
        match self.classes.get(class).method(name) {
            Some(callable) => Ok(callable),
            None => Err(self.raise_method_missing(recv, name)),
        }
    }

    // ── Static symbols ─────────────────────────────────────────────

    pub fn define_static(&mut self, name: &str, value: Value) -> RtResult<()> {
        match self.statics.define(name, value) {
            Ok(()) => Ok(()),
            Err(()) => Err(self.raise_duplicate("static symbol", name)),
        }
    }

    pub fn lookup_static(&mut self, name: &str) -> RtResult<Value> {
        match self.statics.lookup(name) {
            Some(v) => Ok(v),
            None => Err(self.raise_undefined_symbol(name)),
        }
    }

    pub fn static_name_of(&self, value: Value) -> Option<std::sync::Arc<str>> {
        self.statics.name_of(value)
    }

    // ── User-visible containers ────────────────────────────────────
    //
    // The only tables that delete: backed by the tombstoning flavor of
    // the hash engine, keyed by deep Value identity.

    pub fn new_map(&mut self) -> Value {
        let class = self.specials.map_class;
        Value::from_handle(self.heap.alloc(class, Body::Map(OpenTable::new())))
    }

    pub fn new_set(&mut self) -> Value {
        let class = self.specials.set_class;
        Value::from_handle(self.heap.alloc(class, Body::Set(OpenTable::new())))
    }

    fn take_map(&mut self, map: Value) -> RtResult<OpenTable<Value, Value>> {
        let taken = map
            .is_ref()
            .then(|| self.heap.get_mut(map.as_handle()))
            .flatten()
            .and_then(|obj| match &mut obj.body {
                Body::Map(t) => Some(std::mem::take(t)),
                _ => None,
            });
        match taken {
            Some(t) => Ok(t),
            None => Err(self.raise_type_error("map", map)),
        }
    }

    fn put_map(&mut self, map: Value, table: OpenTable<Value, Value>) {
        if let Some(obj) = self.heap.get_mut(map.as_handle()) {
            if let Body::Map(t) = &mut obj.body {
                *t = table;
            }
        }
    }

    pub fn map_insert(&mut self, map: Value, key: Value, value: Value) -> RtResult<Option<Value>> {
        let mut table = self.take_map(map)?;
        let prev = table.insert(
            deep_hash(&self.heap, key),
            |&k| deep_eq(&self.heap, k, key),
            |&k| deep_hash(&self.heap, k),
            key,
            value,
        );
        self.put_map(map, table);
        Ok(prev)
    }

    pub fn map_get(&mut self, map: Value, key: Value) -> RtResult<Option<Value>> {
        let found = self.obj(map).and_then(|obj| match &obj.body {
            Body::Map(t) => Some(
                t.get(deep_hash(&self.heap, key), |&k| deep_eq(&self.heap, k, key))
                    .copied(),
            ),
            _ => None,
        });
        match found {
            Some(r) => Ok(r),
            None => Err(self.raise_type_error("map", map)),
        }
    }

    pub fn map_remove(&mut self, map: Value, key: Value) -> RtResult<Option<Value>> {
        let mut table = self.take_map(map)?;
        let removed = table.remove(deep_hash(&self.heap, key), |&k| deep_eq(&self.heap, k, key));
        self.put_map(map, table);
        Ok(removed)
    }

    pub fn map_len(&mut self, map: Value) -> RtResult<usize> {
        let len = self.obj(map).and_then(|obj| match &obj.body {
            Body::Map(t) => Some(t.len()),
            _ => None,
        });
        match len {
            Some(n) => Ok(n),
            None => Err(self.raise_type_error("map", map)),
        }
    }

    fn take_set(&mut self, set: Value) -> RtResult<OpenTable<Value, ()>> {
        let taken = set
            .is_ref()
            .then(|| self.heap.get_mut(set.as_handle()))
            .flatten()
            .and_then(|obj| match &mut obj.body {
                Body::Set(t) => Some(std::mem::take(t)),
                _ => None,
            });
        match taken {
            Some(t) => Ok(t),
            None => Err(self.raise_type_error("set", set)),
        }
    }

    fn put_set(&mut self, set: Value, table: OpenTable<Value, ()>) {
        if let Some(obj) = self.heap.get_mut(set.as_handle()) {
            if let Body::Set(t) = &mut obj.body {
                *t = table;
            }
        }
    }

    /// Returns `true` when the element was newly added.
    pub fn set_add(&mut self, set: Value, element: Value) -> RtResult<bool> {
        let mut table = self.take_set(set)?;
        let prev = table.insert(
            deep_hash(&self.heap, element),
            |&k| deep_eq(&self.heap, k, element),
            |&k| deep_hash(&self.heap, k),
            element,
            (),
        );
        self.put_set(set, table);
        Ok(prev.is_none())
    }

    pub fn set_contains(&mut self, set: Value, element: Value) -> RtResult<bool> {
        let found = self.obj(set).and_then(|obj| match &obj.body {
            Body::Set(t) => Some(
                t.get(deep_hash(&self.heap, element), |&k| {
                    deep_eq(&self.heap, k, element)
                })
                .is_some(),
            ),
            _ => None,
        });
        match found {
            Some(b) => Ok(b),
            None => Err(self.raise_type_error("set", set)),
        }
    }

    pub fn set_remove(&mut self, set: Value, element: Value) -> RtResult<bool> {
        let mut table = self.take_set(set)?;
        let removed = table
            .remove(deep_hash(&self.heap, element), |&k| {
                deep_eq(&self.heap, k, element)
            })
            .is_some();
        self.put_set(set, table);
        Ok(removed)
    }
}
