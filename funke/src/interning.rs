//! Symbol interning.
//!
//! Two independent spaces:
//! - *Dynamic symbols* ([`Sym`]): small interned integers handed out from a
//!   monotonic counter, used as cheap hash keys throughout the class and
//!   field tables. The interner is shareable across runtime instances, so
//!   it lives behind an `Arc<RwLock<…>>`.
//! - *Static symbols* ([`Statics`]): fully-qualified names bound to runtime
//!   [`Value`]s, used for cross-module static resolution. Values are
//!   runtime-local, so this table lives in the `Runtime` itself.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::table::{OpenTable, hash_bits, hash_bytes};
use crate::tagged::Value;

/// A dynamic symbol: a stable small integer standing in for a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sym(u32);

impl Sym {
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn hash(self) -> u64 {
        hash_bits(self.0 as u64)
    }
}

struct InternerImpl {
    names: Vec<Arc<str>>,
    table: OpenTable<Arc<str>, Sym>,
}

/// The shared dynamic-symbol interner.
#[derive(Clone)]
pub struct Interner(Arc<RwLock<InternerImpl>>);

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(InternerImpl {
            names: Vec::new(),
            table: OpenTable::new(),
        })))
    }

    /// Intern a name. Idempotent: the same name always yields the same
    /// [`Sym`]; a fresh name takes the next counter value.
    pub fn intern(&self, name: &str) -> Sym {
        let mut inner = self.0.write();
        let hash = hash_bytes(name.as_bytes());
        if let Some(&sym) = inner.table.get(hash, |k| &**k == name) {
            return sym;
        }
        let sym = Sym(inner.names.len() as u32);
        let owned: Arc<str> = Arc::from(name);
        inner.names.push(owned.clone());
        inner
            .table
            .insert(hash, |k| &**k == name, |k| hash_bytes(k.as_bytes()), owned, sym);
        sym
    }

    /// Reverse lookup. Total for every `Sym` this interner produced.
    pub fn resolve(&self, sym: Sym) -> Option<Arc<str>> {
        self.0.read().names.get(sym.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The static-symbol table of one runtime: fully-qualified name → Value,
/// plus a reverse direction used only for diagnostics.
#[derive(Default)]
pub struct Statics {
    forward: OpenTable<Arc<str>, Value>,
    reverse: OpenTable<u64, Arc<str>>,
}

impl Statics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`. Fails (returning the name back) when the
    /// name is already defined; static symbols are never redefined.
    pub fn define(&mut self, name: &str, value: Value) -> Result<(), ()> {
        let hash = hash_bytes(name.as_bytes());
        if self.forward.get(hash, |k| &**k == name).is_some() {
            return Err(());
        }
        let owned: Arc<str> = Arc::from(name);
        self.forward.insert(
            hash,
            |k| &**k == name,
            |k| hash_bytes(k.as_bytes()),
            owned.clone(),
            value,
        );
        self.reverse.insert(
            hash_bits(value.raw()),
            |&bits| bits == value.raw(),
            |&bits| hash_bits(bits),
            value.raw(),
            owned,
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.forward
            .get(hash_bytes(name.as_bytes()), |k| &**k == name)
            .copied()
    }

    /// Intentionally partial: only used to name values in diagnostics.
    pub fn name_of(&self, value: Value) -> Option<Arc<str>> {
        self.reverse
            .get(hash_bits(value.raw()), |&bits| bits == value.raw())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
