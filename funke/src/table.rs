//! Open-addressing hash table with quadratic probing.
//!
//! One engine backs every table in the runtime: the interner's name table,
//! the static-symbol table, per-class field and method tables, and the
//! user-visible map/set containers. Key hashing and equality are injected
//! per call (the `Value` key strategy needs to borrow the heap to compare
//! string and tuple contents, so the ops cannot live in the table itself).
//!
//! Buckets are `Empty`, `Tombstone` (deleted; only the map/set containers
//! ever delete) or `Full`. Probing walks `(h + i*i) mod capacity`; a lookup
//! stops at the first empty bucket, skipping tombstones, while an insert
//! reuses the first tombstone seen when the key turns out to be absent.

use std::hash::Hasher;

/// Capacities roughly double while avoiding small prime factors that would
/// degrade the quadratic probe sequence.
const GROWTH: &[usize] = &[
    11, 23, 47, 97, 197, 397, 797, 1597, 3203, 6421, 12853, 25717, 51437, 102_877, 205_759,
    411_527, 823_117, 1_646_237, 3_292_489, 6_584_983, 13_169_977,
];

enum Bucket<K, V> {
    Empty,
    Tombstone,
    Full(K, V),
}

pub struct OpenTable<K, V> {
    buckets: Vec<Bucket<K, V>>,
    live: usize,
    /// Deleted buckets still occupying probe positions. Counted toward the
    /// growth trigger: a probe only terminates at an empty bucket, so load
    /// is live + tombstones, not live alone.
    tombstones: usize,
}

impl<K, V> Default for OpenTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OpenTable<K, V> {
    pub const fn new() -> Self {
        Self {
            buckets: Vec::new(),
            live: 0,
            tombstones: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Find the bucket index holding a key matching `eq`, probing from
    /// `hash`. Stops at the first empty bucket.
    fn find_index(&self, hash: u64, mut eq: impl FnMut(&K) -> bool) -> Option<usize> {
        let cap = self.buckets.len();
        if cap == 0 {
            return None;
        }
        for i in 0..cap {
            let at = (hash as usize + i * i) % cap;
            match &self.buckets[at] {
                Bucket::Empty => return None,
                Bucket::Tombstone => {}
                Bucket::Full(k, _) => {
                    if eq(k) {
                        return Some(at);
                    }
                }
            }
        }
        None
    }

    pub fn get(&self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<&V> {
        let at = self.find_index(hash, eq)?;
        match &self.buckets[at] {
            Bucket::Full(_, v) => Some(v),
            _ => unreachable!("find_index returns full buckets only"),
        }
    }

    pub fn get_mut(&mut self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<&mut V> {
        let at = self.find_index(hash, eq)?;
        match &mut self.buckets[at] {
            Bucket::Full(_, v) => Some(v),
            _ => unreachable!("find_index returns full buckets only"),
        }
    }

    /// Insert or update. Returns the previous value when the key was
    /// already present. `rehash` recomputes the hash of stored keys when
    /// the table has to grow.
    pub fn insert(
        &mut self,
        hash: u64,
        mut eq: impl FnMut(&K) -> bool,
        rehash: impl Fn(&K) -> u64,
        key: K,
        value: V,
    ) -> Option<V> {
        if (self.live + self.tombstones + 1) * 2 >= self.buckets.len() {
            self.grow(&rehash);
        }
        let cap = self.buckets.len();
        let mut tombstone: Option<usize> = None;
        for i in 0..cap {
            let at = (hash as usize + i * i) % cap;
            match &mut self.buckets[at] {
                Bucket::Empty => {
                    // absent: prefer the first tombstone on the probe path
                    // so chains do not grow past deleted entries
                    let slot = match tombstone {
                        Some(t) => {
                            self.tombstones -= 1;
                            t
                        }
                        None => at,
                    };
                    self.buckets[slot] = Bucket::Full(key, value);
                    self.live += 1;
                    return None;
                }
                Bucket::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(at);
                    }
                }
                Bucket::Full(k, v) => {
                    if eq(k) {
                        return Some(std::mem::replace(v, value));
                    }
                }
            }
        }
        // occupancy (live + tombstones) never reaches 1/2, so an empty
        // bucket always terminates the probe before the sequence is
        // exhausted
        unreachable!("probe sequence exhausted")
    }

    /// Replace the key's bucket with a tombstone. Only the map/set
    /// containers call this; symbol, field and method tables are
    /// append-only.
    pub fn remove(&mut self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<V> {
        let at = self.find_index(hash, eq)?;
        match std::mem::replace(&mut self.buckets[at], Bucket::Tombstone) {
            Bucket::Full(_, v) => {
                self.live -= 1;
                self.tombstones += 1;
                Some(v)
            }
            _ => unreachable!("find_index returns full buckets only"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().filter_map(|b| match b {
            Bucket::Full(k, v) => Some((k, v)),
            _ => None,
        })
    }

    /// Rehash into the next capacity from [`GROWTH`]. Tombstones are never
    /// carried across a rehash.
    fn grow(&mut self, rehash: &impl Fn(&K) -> u64) {
        let needed = (self.live + 1) * 2;
        let new_cap = *GROWTH
            .iter()
            .find(|&&g| g > needed)
            .expect("table exceeded the growth sequence");
        let old = std::mem::replace(
            &mut self.buckets,
            (0..new_cap).map(|_| Bucket::Empty).collect(),
        );
        self.live = 0;
        self.tombstones = 0;
        for bucket in old {
            if let Bucket::Full(k, v) = bucket {
                let h = rehash(&k);
                self.reinsert(h, k, v);
            }
        }
    }

    /// Insert into a freshly grown table: no tombstones, no duplicates.
    fn reinsert(&mut self, hash: u64, key: K, value: V) {
        let cap = self.buckets.len();
        for i in 0..cap {
            let at = (hash as usize + i * i) % cap;
            if matches!(self.buckets[at], Bucket::Empty) {
                self.buckets[at] = Bucket::Full(key, value);
                self.live += 1;
                return;
            }
        }
        unreachable!("probe sequence exhausted during rehash")
    }

    #[cfg(test)]
    fn bucket_index_of(&self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<usize> {
        self.find_index(hash, eq)
    }
}

/// Hash arbitrary bytes with the process-wide ahash configuration.
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Hash a raw 64-bit pattern (used for symbols, raw `Value` bits and
/// anything else without content identity).
#[inline]
pub fn hash_bits(bits: u64) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write_u64(bits);
    hasher.finish()
}

#[cfg(test)]
mod table_tests {
    use super::*;

    fn insert_u64(t: &mut OpenTable<u64, u64>, k: u64, v: u64) -> Option<u64> {
        t.insert(hash_bits(k), |&x| x == k, |&x| hash_bits(x), k, v)
    }

    fn get_u64(t: &OpenTable<u64, u64>, k: u64) -> Option<u64> {
        t.get(hash_bits(k), |&x| x == k).copied()
    }

    #[test]
    fn insert_lookup_update() {
        let mut t = OpenTable::new();
        assert_eq!(insert_u64(&mut t, 1, 10), None);
        assert_eq!(insert_u64(&mut t, 2, 20), None);
        assert_eq!(get_u64(&t, 1), Some(10));
        assert_eq!(get_u64(&t, 2), Some(20));
        assert_eq!(get_u64(&t, 3), None);
        assert_eq!(insert_u64(&mut t, 1, 11), Some(10));
        assert_eq!(get_u64(&t, 1), Some(11));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn load_invariant_holds_after_every_insert() {
        let mut t = OpenTable::new();
        for k in 0..5000u64 {
            insert_u64(&mut t, k, k * 2);
            assert!(
                t.len() * 2 < t.capacity(),
                "load invariant violated at {} live / {} capacity",
                t.len(),
                t.capacity()
            );
            assert!(GROWTH.contains(&t.capacity()));
        }
        for k in 0..5000u64 {
            assert_eq!(get_u64(&t, k), Some(k * 2));
        }
    }

    #[test]
    fn remove_then_miss() {
        let mut t = OpenTable::new();
        for k in 0..100u64 {
            insert_u64(&mut t, k, k);
        }
        for k in (0..100u64).step_by(2) {
            assert_eq!(t.remove(hash_bits(k), |&x| x == k), Some(k));
        }
        for k in 0..100u64 {
            let expect = if k % 2 == 0 { None } else { Some(k) };
            assert_eq!(get_u64(&t, k), expect);
        }
        assert_eq!(t.len(), 50);
    }

    #[test]
    fn tombstone_slot_is_reused() {
        // force every key onto the same probe chain with a constant hash
        let mut t: OpenTable<u64, u64> = OpenTable::new();
        let h = 0u64;
        t.insert(h, |&x| x == 1, |_| h, 1, 100);
        t.insert(h, |&x| x == 2, |_| h, 2, 200);
        let slot_of_1 = t.bucket_index_of(h, |&x| x == 1).unwrap();
        assert_eq!(t.remove(h, |&x| x == 1), Some(100));

        // a different key probing the same chain must land in the
        // tombstoned slot rather than extending the chain
        t.insert(h, |&x| x == 3, |_| h, 3, 300);
        let slot_of_3 = t.bucket_index_of(h, |&x| x == 3).unwrap();
        assert_eq!(slot_of_1, slot_of_3);

        assert_eq!(t.get(h, |&x| x == 1), None);
        assert_eq!(t.get(h, |&x| x == 3), Some(&300));
        assert_eq!(t.get(h, |&x| x == 2), Some(&200));
    }

    #[test]
    fn delete_heavy_churn_rehashes_instead_of_exhausting_probes() {
        // tombstones count toward the growth trigger, so a workload that
        // deletes as fast as it inserts keeps finding empty buckets
        let mut t = OpenTable::new();
        for k in 0..10_000u64 {
            assert_eq!(insert_u64(&mut t, k, k), None);
            assert_eq!(t.remove(hash_bits(k), |&x| x == k), Some(k));
        }
        assert_eq!(t.len(), 0);
        // tombstones are reclaimed on rehash, so capacity stays bounded
        assert!(t.capacity() <= 47, "churn bloated capacity to {}", t.capacity());
        insert_u64(&mut t, 42, 420);
        assert_eq!(get_u64(&t, 42), Some(420));
    }

    #[test]
    fn rehash_drops_tombstones_and_keeps_entries() {
        let mut t = OpenTable::new();
        for k in 0..40u64 {
            insert_u64(&mut t, k, k);
        }
        for k in 0..20u64 {
            t.remove(hash_bits(k), |&x| x == k);
        }
        // grow past at least one rehash
        for k in 100..300u64 {
            insert_u64(&mut t, k, k);
        }
        for k in 20..40u64 {
            assert_eq!(get_u64(&t, k), Some(k));
        }
        for k in 0..20u64 {
            assert_eq!(get_u64(&t, k), None);
        }
        assert_eq!(t.len(), 220);
    }

    #[test]
    fn iter_visits_live_entries_only() {
        let mut t = OpenTable::new();
        for k in 0..10u64 {
            insert_u64(&mut t, k, k);
        }
        t.remove(hash_bits(3), |&x| x == 3);
        let mut keys: Vec<u64> = t.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
    }
}
