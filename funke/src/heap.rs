//! The object arena.
//!
//! Objects live in generation-checked slots: destroying an object bumps
//! its slot generation, so any stale [`Handle`] fails the generation check
//! at access time instead of reading recycled storage. This replaces the
//! zero-fill-and-retag sentinel of a raw allocator with a checked access.
//!
//! An object is a class id plus one of the storage bodies. A user class is
//! either a *field object* (inline `Value` array) or a *cdata object*
//! (opaque byte blob sized at class registration) — never both; the
//! remaining bodies back the runtime's builtin types.

use crate::class::ClassId;
use crate::func::Func;
use crate::table::{OpenTable, hash_bits, hash_bytes};
use crate::tagged::{HANDLE_GEN_MASK, Handle, Value};

/// Object payload storage.
pub enum Body {
    /// Inline field array of a user field object.
    Fields(Box<[Value]>),
    /// Opaque foreign-data blob of a user cdata object.
    CData(Box<[u8]>),
    Str(String),
    Tuple(Box<[Value]>),
    Func(Func),
    /// User-visible map container; the only tables that ever delete.
    Map(OpenTable<Value, Value>),
    Set(OpenTable<Value, ()>),
}

pub struct Obj {
    pub class: ClassId,
    pub body: Body,
}

struct Slot {
    generation: u32,
    obj: Option<Obj>,
}

#[derive(Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, class: ClassId, body: Body) -> Handle {
        let obj = Obj { class, body };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.obj.is_none());
            slot.obj = Some(obj);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        // generation 1 keeps every encoded reference above the
        // virtual-accessor threshold
        self.slots.push(Slot {
            generation: 1,
            obj: Some(obj),
        });
        Handle {
            index,
            generation: 1,
        }
    }

    /// `None` when the handle is stale (slot destroyed or recycled).
    pub fn get(&self, h: Handle) -> Option<&Obj> {
        let slot = self.slots.get(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        slot.obj.as_ref()
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut Obj> {
        let slot = self.slots.get_mut(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        slot.obj.as_mut()
    }

    /// Clear the slot and bump its generation, retiring every outstanding
    /// handle. The destructor protocol runs before this, in the runtime.
    pub fn release(&mut self, h: Handle) -> Option<Obj> {
        let slot = self.slots.get_mut(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        let obj = slot.obj.take()?;
        // wrap within the 28 encodable bits, never through 0: a zero
        // generation would encode below the reference floor
        slot.generation = if slot.generation as u64 >= HANDLE_GEN_MASK {
            1
        } else {
            slot.generation + 1
        };
        self.free.push(h.index);
        Some(obj)
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

// ── Deep Value identity ────────────────────────────────────────────
//
// The Value-keyed table configuration compares strings by content and
// tuples element-wise; everything else compares by raw bit pattern. The
// hash rule matches, so equal keys always hash equal.

pub fn deep_eq(heap: &Heap, a: Value, b: Value) -> bool {
    if a.raw() == b.raw() {
        return true;
    }
    if !a.is_ref() || !b.is_ref() {
        return false;
    }
    let (Some(x), Some(y)) = (heap.get(a.as_handle()), heap.get(b.as_handle())) else {
        return false;
    };
    match (&x.body, &y.body) {
        (Body::Str(s1), Body::Str(s2)) => s1 == s2,
        (Body::Tuple(t1), Body::Tuple(t2)) => {
            t1.len() == t2.len()
                && t1
                    .iter()
                    .zip(t2.iter())
                    .all(|(&p, &q)| deep_eq(heap, p, q))
        }
        _ => false,
    }
}

pub fn deep_hash(heap: &Heap, v: Value) -> u64 {
    if v.is_ref() {
        if let Some(obj) = heap.get(v.as_handle()) {
            match &obj.body {
                Body::Str(s) => return hash_bytes(s.as_bytes()),
                Body::Tuple(t) => {
                    use std::hash::Hasher;
                    let mut hasher = ahash::AHasher::default();
                    hasher.write_usize(t.len());
                    for &e in t.iter() {
                        hasher.write_u64(deep_hash(heap, e));
                    }
                    return hasher.finish();
                }
                _ => {}
            }
        }
    }
    hash_bits(v.raw())
}

#[cfg(test)]
mod heap_tests {
    use super::*;

    fn dummy_class() -> ClassId {
        ClassId::from_index(0)
    }

    fn str_value(heap: &mut Heap, s: &str) -> Value {
        Value::from_handle(heap.alloc(dummy_class(), Body::Str(s.to_owned())))
    }

    #[test]
    fn alloc_get_roundtrip() {
        let mut heap = Heap::new();
        let h = heap.alloc(dummy_class(), Body::Str("hello".into()));
        match &heap.get(h).unwrap().body {
            Body::Str(s) => assert_eq!(s, "hello"),
            _ => panic!("wrong body"),
        }
    }

    #[test]
    fn release_retires_handles_and_recycles_slots() {
        let mut heap = Heap::new();
        let h = heap.alloc(dummy_class(), Body::Str("gone".into()));
        assert_eq!(heap.live_count(), 1);
        assert!(heap.release(h).is_some());
        assert_eq!(heap.live_count(), 0);
        assert!(heap.get(h).is_none(), "stale handle must not resolve");
        assert!(heap.release(h).is_none(), "double release is detected");

        let h2 = heap.alloc(dummy_class(), Body::Str("new".into()));
        assert_eq!(h2.index, h.index, "slot is recycled");
        assert_ne!(h2.generation, h.generation, "generation moved on");
        assert!(heap.get(h).is_none(), "old handle still dead");
        assert!(heap.get(h2).is_some());
    }

    #[test]
    fn deep_eq_strings_by_content() {
        let mut heap = Heap::new();
        let a = str_value(&mut heap, "abc");
        let b = str_value(&mut heap, "abc");
        let c = str_value(&mut heap, "abd");
        assert_ne!(a.raw(), b.raw());
        assert!(deep_eq(&heap, a, b));
        assert!(!deep_eq(&heap, a, c));
        assert_eq!(deep_hash(&heap, a), deep_hash(&heap, b));
    }

    #[test]
    fn deep_eq_tuples_elementwise() {
        let mut heap = Heap::new();
        let s1 = str_value(&mut heap, "k");
        let s2 = str_value(&mut heap, "k");
        let t1 = Value::from_handle(heap.alloc(
            dummy_class(),
            Body::Tuple(vec![Value::from_int(1), s1].into_boxed_slice()),
        ));
        let t2 = Value::from_handle(heap.alloc(
            dummy_class(),
            Body::Tuple(vec![Value::from_int(1), s2].into_boxed_slice()),
        ));
        let t3 = Value::from_handle(heap.alloc(
            dummy_class(),
            Body::Tuple(vec![Value::from_int(2), s1].into_boxed_slice()),
        ));
        assert!(deep_eq(&heap, t1, t2));
        assert!(!deep_eq(&heap, t1, t3));
        assert_eq!(deep_hash(&heap, t1), deep_hash(&heap, t2));
    }

    #[test]
    fn everything_else_is_identity() {
        let mut heap = Heap::new();
        let a = heap.alloc(dummy_class(), Body::Fields(Box::new([])));
        let b = heap.alloc(dummy_class(), Body::Fields(Box::new([])));
        let va = Value::from_handle(a);
        let vb = Value::from_handle(b);
        assert!(deep_eq(&heap, va, va));
        assert!(!deep_eq(&heap, va, vb));
        assert!(!deep_eq(&heap, Value::from_int(3), Value::from_f64(4.0)));
        assert!(deep_eq(&heap, Value::from_int(3), Value::from_int(3)));
    }
}
