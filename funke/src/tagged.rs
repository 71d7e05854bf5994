//! The universal tagged 64-bit value.
//!
//! Encoding (low 2 bits are the tag):
//! - **Reference / singleton** `...XX00` — raw values below 16 are the four
//!   singleton constants (nil, false, true, end-of-stream), distinguished by
//!   the low 4 bits; everything else packs an arena handle (index in bits
//!   4..36, generation in bits 36..64).
//! - **Fixnum** `...XXX01` — signed 62-bit integer, stored shifted left 2.
//! - **Float** `...XXX10` — IEEE-754 double with the low 2 mantissa bits
//!   cleared before tagging. Unpacking restores those bits as zeros, so the
//!   round trip is exact only when they were already zero. This is a
//!   deliberate precision trade-off, not a defect.
//! - `...XXX11` — reserved, never constructed.

const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b00;
const INT_TAG: u64 = 0b01;
const FLOAT_TAG: u64 = 0b10;

/// Raw reference values below this are singletons, not handles.
const SINGLETON_LIMIT: u64 = 16;

const HANDLE_INDEX_SHIFT: u64 = 4;
const HANDLE_GEN_SHIFT: u64 = 36;

/// Only 28 generation bits fit above the index; the arena wraps its
/// counters within this range (and never through 0).
pub const HANDLE_GEN_MASK: u64 = (1 << (64 - HANDLE_GEN_SHIFT)) - 1;

/// A reference into the object arena: slot index plus the generation the
/// slot had when the reference was created. A destroyed slot bumps its
/// generation, so stale handles are detected at access time instead of
/// reinterpreting freed storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub index: u32,
    pub generation: u32,
}

/// A tagged 64-bit value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value(0);
    pub const FALSE: Value = Value(4);
    pub const TRUE: Value = Value(8);
    /// End-of-stream marker returned by exhausted iteration.
    pub const EOS: Value = Value(12);

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_int(self) -> bool {
        self.0 & TAG_MASK == INT_TAG
    }

    #[inline(always)]
    pub fn from_int(n: i64) -> Self {
        debug_assert!(
            (-(1i64 << 61)..(1i64 << 61)).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n.wrapping_shl(2) as u64) | INT_TAG)
    }

    /// Arithmetic shift restores the sign; the tag bits fall off the end.
    #[inline(always)]
    pub const fn as_int(self) -> i64 {
        debug_assert!(self.is_int());
        (self.0 as i64) >> 2
    }

    // ── Float ──────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_f64(self) -> bool {
        self.0 & TAG_MASK == FLOAT_TAG
    }

    /// Clears the low 2 mantissa bits before tagging — irreversible for
    /// doubles whose low bits were nonzero.
    #[inline(always)]
    pub fn from_f64(f: f64) -> Self {
        Self((f.to_bits() & !TAG_MASK) | FLOAT_TAG)
    }

    #[inline(always)]
    pub fn as_f64(self) -> f64 {
        debug_assert!(self.is_f64());
        f64::from_bits(self.0 & !TAG_MASK)
    }

    // ── Singletons ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline(always)]
    pub const fn is_false(self) -> bool {
        self.0 == Self::FALSE.0
    }

    #[inline(always)]
    pub const fn is_true(self) -> bool {
        self.0 == Self::TRUE.0
    }

    #[inline(always)]
    pub const fn is_eos(self) -> bool {
        self.0 == Self::EOS.0
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    #[inline(always)]
    pub const fn as_bool(self) -> Option<bool> {
        match self.0 {
            v if v == Self::TRUE.0 => Some(true),
            v if v == Self::FALSE.0 => Some(false),
            _ => None,
        }
    }

    /// Everything except nil and false counts as true.
    #[inline(always)]
    pub const fn is_truthy(self) -> bool {
        !self.is_nil() && !self.is_false()
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG && self.0 >= SINGLETON_LIMIT
    }

    /// Generations start at 1 and stay within [`HANDLE_GEN_MASK`], so an
    /// encoded reference is always at least `1 << 36`. The virtual-accessor
    /// threshold in the class model relies on this bound.
    #[inline(always)]
    pub fn from_handle(h: Handle) -> Self {
        let g = h.generation as u64 & HANDLE_GEN_MASK;
        debug_assert!(
            g != 0 && h.generation as u64 == g,
            "handle generation out of range: {}",
            h.generation
        );
        Self((g << HANDLE_GEN_SHIFT) | ((h.index as u64) << HANDLE_INDEX_SHIFT))
    }

    #[inline(always)]
    pub fn as_handle(self) -> Handle {
        debug_assert!(self.is_ref());
        Handle {
            index: ((self.0 >> HANDLE_INDEX_SHIFT) & 0xFFFF_FFFF) as u32,
            generation: (self.0 >> HANDLE_GEN_SHIFT) as u32,
        }
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_int() {
            write!(f, "Int({})", self.as_int())
        } else if self.is_f64() {
            write!(f, "Float({})", self.as_f64())
        } else if self.is_nil() {
            write!(f, "Nil")
        } else if self.is_false() {
            write!(f, "False")
        } else if self.is_true() {
            write!(f, "True")
        } else if self.is_eos() {
            write!(f, "Eos")
        } else if self.is_ref() {
            let h = self.as_handle();
            write!(f, "Ref({}@{})", h.index, h.generation)
        } else {
            write!(f, "Reserved(0x{:016x})", self.0)
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::from_int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::from_f64(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::from_bool(b)
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn int_roundtrip_exact_over_range() {
        for n in [
            0,
            1,
            -1,
            42,
            -42,
            (1i64 << 61) - 1,
            -(1i64 << 61),
            123_456_789,
        ] {
            let v = Value::from_int(n);
            assert!(v.is_int());
            assert_eq!(v.as_int(), n, "roundtrip failed for {n}");
        }
    }

    #[test]
    fn int_is_not_anything_else() {
        let v = Value::from_int(7);
        assert!(!v.is_f64());
        assert!(!v.is_ref());
        assert!(!v.is_nil());
        assert!(!v.is_true());
    }

    #[test]
    fn float_roundtrip_exact_when_low_bits_zero() {
        for f in [0.0f64, 2.0, 4.5, -8.25, 1024.0] {
            assert_eq!(f.to_bits() & 0b11, 0, "test constant has nonzero low bits");
            let v = Value::from_f64(f);
            assert!(v.is_f64());
            assert_eq!(v.as_f64(), f);
        }
    }

    #[test]
    fn float_truncation_is_deterministic() {
        let f = 0.1f64;
        assert_ne!(f.to_bits() & 0b11, 0);
        let once = Value::from_f64(f).as_f64();
        let twice = Value::from_f64(once).as_f64();
        // the result differs from the input only in the cleared low bits
        assert_eq!(once.to_bits(), f.to_bits() & !0b11);
        // truncation is idempotent
        assert_eq!(once.to_bits(), twice.to_bits());
    }

    #[test]
    fn singletons_are_distinct_and_tagged_as_refs() {
        let all = [Value::NIL, Value::FALSE, Value::TRUE, Value::EOS];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a.raw() & TAG_MASK, REF_TAG);
            assert!(!a.is_ref(), "singletons are not handles");
            for b in &all[i + 1..] {
                assert_ne!(a.raw(), b.raw());
            }
        }
        assert!(Value::NIL.is_nil());
        assert!(Value::FALSE.is_false());
        assert!(Value::TRUE.is_true());
        assert!(Value::EOS.is_eos());
    }

    #[test]
    fn bool_packing() {
        assert!(Value::from_bool(true).is_true());
        assert!(Value::from_bool(false).is_false());
        assert_eq!(Value::from_bool(true).as_bool(), Some(true));
        assert_eq!(Value::from_bool(false).as_bool(), Some(false));
        assert_eq!(Value::NIL.as_bool(), None);
        assert!(!Value::NIL.is_truthy());
        assert!(!Value::FALSE.is_truthy());
        assert!(Value::from_int(0).is_truthy());
    }

    #[test]
    fn handle_roundtrip_and_magnitude() {
        for h in [
            Handle {
                index: 0,
                generation: 1,
            },
            Handle {
                index: 17,
                generation: 1,
            },
            Handle {
                index: u32::MAX,
                generation: 3,
            },
            Handle {
                index: 9,
                generation: HANDLE_GEN_MASK as u32,
            },
        ] {
            let v = Value::from_handle(h);
            assert!(v.is_ref());
            assert_eq!(v.as_handle(), h);
            // the class model's accessor threshold depends on this bound
            assert!(v.raw() >= 1 << 36);
        }
    }
}
