//! Class descriptors and the class registry.
//!
//! A class is registered, extended with fields and methods during the
//! module registration phases, then sealed by [`ClassRegistry::finalize`].
//! After sealing it is structurally immutable. A class stores its data
//! either as inline fields or as an opaque cdata blob — never both; the
//! exclusivity is validated once, over all classes, at finalization.
//!
//! Field tables map a name symbol to a `u64` that is read positionally:
//! values below [`VIRTUAL_THRESHOLD`] are inline storage offsets, values at
//! or above it are the raw bits of a callable `Value` (a virtual accessor).
//! The split is sound because encoded references are never below `1 << 36`
//! (see the value codec). A fragile but deliberate space optimization —
//! both meanings share one table.

use bitflags::bitflags;

use crate::interning::Sym;
use crate::table::OpenTable;
use crate::tagged::Value;

/// Index into the runtime's class registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

impl ClassId {
    #[inline]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAccess: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Field-table entries below this are inline offsets; entries at or above
/// it are callable Value bits.
pub const VIRTUAL_THRESHOLD: u64 = 1024;

/// A decoded field-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSlot {
    /// Index into the object's inline field array.
    Offset(u32),
    /// Virtual accessor: a callable invoked instead of a storage access.
    Virtual(Value),
}

#[inline]
fn decode_slot(bits: u64) -> FieldSlot {
    if bits < VIRTUAL_THRESHOLD {
        FieldSlot::Offset(bits as u32)
    } else {
        FieldSlot::Virtual(Value::from_raw(bits))
    }
}

pub struct Klass {
    pub name: Sym,
    /// Identity-chain parent: used for instance checks only, never for
    /// method dispatch.
    pub parent: Option<ClassId>,
    methods: OpenTable<Sym, Value>,
    readable: OpenTable<Sym, u64>,
    writable: OpenTable<Sym, u64>,
    /// Every declared field, readable or not.
    fields: OpenTable<Sym, u64>,
    pub field_count: u32,
    pub cdata_size: u32,
    pub destructor: Option<Value>,
    pub sealed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassError {
    /// A class with this name already exists.
    Duplicate { name: Sym },
    /// Structural mutation after finalization.
    Sealed { class: ClassId },
    /// The class declares both inline fields and a cdata blob.
    Structural { class: ClassId },
}

impl Klass {
    fn sym_insert(table: &mut OpenTable<Sym, u64>, name: Sym, bits: u64) {
        table.insert(name.hash(), |k| *k == name, |k| k.hash(), name, bits);
    }

    pub fn method(&self, name: Sym) -> Option<Value> {
        self.methods.get(name.hash(), |k| *k == name).copied()
    }

    pub fn readable_slot(&self, name: Sym) -> Option<FieldSlot> {
        self.readable
            .get(name.hash(), |k| *k == name)
            .copied()
            .map(decode_slot)
    }

    pub fn writable_slot(&self, name: Sym) -> Option<FieldSlot> {
        self.writable
            .get(name.hash(), |k| *k == name)
            .copied()
            .map(decode_slot)
    }

    pub fn field_slot(&self, name: Sym) -> Option<FieldSlot> {
        self.fields
            .get(name.hash(), |k| *k == name)
            .copied()
            .map(decode_slot)
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[derive(Default)]
pub struct ClassRegistry {
    classes: Vec<Klass>,
    by_name: OpenTable<Sym, ClassId>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: Sym,
        parent: Option<ClassId>,
        cdata_size: u32,
    ) -> Result<ClassId, ClassError> {
        if self.lookup(name).is_some() {
            return Err(ClassError::Duplicate { name });
        }
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Klass {
            name,
            parent,
            methods: OpenTable::new(),
            readable: OpenTable::new(),
            writable: OpenTable::new(),
            fields: OpenTable::new(),
            field_count: 0,
            cdata_size,
            destructor: None,
            sealed: false,
        });
        self.by_name
            .insert(name.hash(), |k| *k == name, |k| k.hash(), name, id);
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: ClassId) -> &Klass {
        &self.classes[id.0 as usize]
    }

    pub fn lookup(&self, name: Sym) -> Option<ClassId> {
        self.by_name.get(name.hash(), |k| *k == name).copied()
    }

    fn get_open(&mut self, id: ClassId) -> Result<&mut Klass, ClassError> {
        let klass = &mut self.classes[id.0 as usize];
        if klass.sealed {
            return Err(ClassError::Sealed { class: id });
        }
        Ok(klass)
    }

    /// Append a stored field. Offsets are handed out monotonically per
    /// class and recorded in the access-matching subset of the tables.
    pub fn add_field(
        &mut self,
        id: ClassId,
        name: Sym,
        access: FieldAccess,
    ) -> Result<u32, ClassError> {
        let klass = self.get_open(id)?;
        let offset = klass.field_count;
        debug_assert!((offset as u64) < VIRTUAL_THRESHOLD, "field offset overflow");
        klass.field_count += 1;
        Klass::sym_insert(&mut klass.fields, name, offset as u64);
        if access.contains(FieldAccess::READ) {
            Klass::sym_insert(&mut klass.readable, name, offset as u64);
        }
        if access.contains(FieldAccess::WRITE) {
            Klass::sym_insert(&mut klass.writable, name, offset as u64);
        }
        Ok(offset)
    }

    /// Register virtual accessors for `name`. The callables' raw bits land
    /// directly in the field tables; their magnitude is what distinguishes
    /// them from offsets.
    pub fn add_virtual_field(
        &mut self,
        id: ClassId,
        name: Sym,
        getter: Option<Value>,
        setter: Option<Value>,
    ) -> Result<(), ClassError> {
        let klass = self.get_open(id)?;
        if let Some(g) = getter {
            debug_assert!(g.raw() >= VIRTUAL_THRESHOLD);
            Klass::sym_insert(&mut klass.readable, name, g.raw());
        }
        if let Some(s) = setter {
            debug_assert!(s.raw() >= VIRTUAL_THRESHOLD);
            Klass::sym_insert(&mut klass.writable, name, s.raw());
        }
        Ok(())
    }

    /// Append a method. When `name` is the reserved destructor symbol the
    /// callable is captured as the class destructor instead of joining the
    /// method table.
    pub fn add_method(
        &mut self,
        id: ClassId,
        name: Sym,
        callable: Value,
        destructor_sym: Sym,
    ) -> Result<(), ClassError> {
        let klass = self.get_open(id)?;
        if name == destructor_sym {
            klass.destructor = Some(callable);
            return Ok(());
        }
        klass
            .methods
            .insert(name.hash(), |k| *k == name, |k| k.hash(), name, callable);
        Ok(())
    }

    /// Exact-identity instance check walking the parent chain.
    pub fn is_subclass(&self, mut class: ClassId, target: ClassId) -> bool {
        loop {
            if class == target {
                return true;
            }
            match self.get(class).parent {
                Some(p) => class = p,
                None => return false,
            }
        }
    }

    /// One pass over every registered class: reject any class mixing the
    /// two storage strategies, then seal everything. The whole pass fails
    /// on the first offender.
    pub fn finalize(&mut self) -> Result<(), ClassError> {
        for (index, klass) in self.classes.iter().enumerate() {
            if klass.cdata_size > 0 && klass.field_count > 0 {
                return Err(ClassError::Structural {
                    class: ClassId(index as u32),
                });
            }
        }
        for klass in &mut self.classes {
            klass.sealed = true;
        }
        log::debug!("sealed {} classes", self.classes.len());
        Ok(())
    }

    /// Seal a single class early — used for the bootstrap builtins, which
    /// must be constructible before user registration finishes.
    pub fn seal(&mut self, id: ClassId) {
        self.classes[id.0 as usize].sealed = true;
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
