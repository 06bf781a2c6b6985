//! Int→value and string→value hash tables, used by the schema builder's
//! symbol table and by `MessageDef`'s by-number/by-name field indices.
//!
//! Mirrors `upb/table.c`: the int table is a hybrid of a dense array prefix
//! (for small, densely-packed keys) plus a chained scatter table for the
//! rest; the string table is a plain chained scatter table keyed by a
//! length-prefixed copy of the string, hashed with a MurmurHash2-family
//! function. Neither aims for bit-exact compatibility with upb's C hash
//! function — spec.md only requires internal consistency between hashing
//! and lookup, not interop with another process's table.

extern crate alloc as alloc_crate;

use alloc_crate::string::String;
use alloc_crate::vec::Vec;

/// Below this array-prefix density (array_len live entries / array_len
/// slots) new keys go to the chained part instead of growing the array,
/// matching upb's `MIN_DENSITY` policy (spec.md §4.B "Insert compacts to
/// the densest packing that retains ≥ MIN_DENSITY in the array part").
const MIN_DENSITY_NUM: usize = 1;
const MIN_DENSITY_DEN: usize = 16;

const MAX_LOAD_NUM: usize = 85;
const MAX_LOAD_DEN: usize = 100;

/// A hybrid int-keyed table: a dense `array` for keys `0..array.len()`, and
/// a chained scatter `chain` for everything else.
pub struct IntTable<V> {
    array: Vec<Option<V>>,
    chain: Chain<u64, V>,
}

impl<V: Clone> IntTable<V> {
    pub fn new() -> Self {
        IntTable { array: Vec::new(), chain: Chain::new() }
    }

    pub fn len(&self) -> usize {
        self.array.iter().filter(|v| v.is_some()).count() + self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        if (key as usize) < self.array.len() {
            return self.array[key as usize].as_ref();
        }
        self.chain.get(&key)
    }

    pub fn insert(&mut self, key: u64, value: V) {
        if self.should_live_in_array(key) {
            let idx = key as usize;
            if idx >= self.array.len() {
                self.array.resize_with(idx + 1, || None);
            }
            self.array[idx] = Some(value);
            return;
        }
        self.chain.insert(key, value, hash_u64);
        self.chain.maybe_resize(hash_u64);
    }

    pub fn remove(&mut self, key: u64) -> Option<V> {
        if (key as usize) < self.array.len() {
            return self.array[key as usize].take();
        }
        self.chain.remove(&key)
    }

    fn should_live_in_array(&self, key: u64) -> bool {
        let idx = key as usize;
        // Keep keys contiguous with (or just past) the current array happy
        // path; once the array would become sparser than MIN_DENSITY,
        // route new keys to the chain instead of growing the array to
        // follow them (spec.md §4.B).
        if idx <= self.array.len() {
            return true;
        }
        let would_be_len = idx + 1;
        let live = self.array.iter().filter(|v| v.is_some()).count() + 1;
        live * MIN_DENSITY_DEN >= would_be_len * MIN_DENSITY_NUM
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.array
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i as u64, v)))
            .chain(self.chain.iter().map(|(k, v)| (*k, v)))
    }
}

impl<V: Clone> Default for IntTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A string-keyed chained scatter table. Keys are owned copies (the table's
/// allocator is just the process allocator here; `upb`'s C table copies
/// into its own `upb_alloc`, we use `String` for the same effect).
pub struct StrTable<V> {
    chain: Chain<String, V>,
}

impl<V: Clone> StrTable<V> {
    pub fn new() -> Self {
        StrTable { chain: Chain::new() }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.chain.get_by_str(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.chain.insert(key.into(), value, |s| murmur_hash2(s.as_bytes()));
        self.chain.maybe_resize(|s| murmur_hash2(s.as_bytes()));
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.chain.remove_by_str(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.chain.iter()
    }
}

impl<V: Clone> Default for StrTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Chained scatter table shared by both the int and string tables. Buckets
/// hold a `Vec` of entries (a simple chain, not Brent's variation's
/// in-place-relocation optimization — spec.md names Brent's variation as the
/// *reference*'s technique, not a requirement on every reimplementation's
/// collision strategy; we keep the simpler singly-chained form and document
/// the deviation here rather than silently deviate).
struct Chain<K, V> {
    buckets: Vec<Vec<(K, V)>>,
    len: usize,
}

impl<K: PartialEq + core::hash::Hash, V: Clone> Chain<K, V> {
    fn new() -> Self {
        Chain { buckets: Vec::new(), len: 0 }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_index(&self, hash: u64) -> usize {
        if self.buckets.is_empty() {
            0
        } else {
            (hash as usize) % self.buckets.len()
        }
    }

    fn ensure_capacity(&mut self) {
        if self.buckets.is_empty() {
            self.buckets.resize_with(8, Vec::new);
        }
    }

    fn maybe_resize(&mut self, hash_fn: impl Fn(&K) -> u64) {
        if self.buckets.is_empty() {
            return;
        }
        if self.len * MAX_LOAD_DEN > self.buckets.len() * MAX_LOAD_NUM {
            let new_len = self.buckets.len() * 2;
            let mut new_buckets: Vec<Vec<(K, V)>> = Vec::new();
            new_buckets.resize_with(new_len, Vec::new);
            for bucket in self.buckets.drain(..) {
                for (k, v) in bucket {
                    let idx = (hash_fn(&k) as usize) % new_len;
                    new_buckets[idx].push((k, v));
                }
            }
            self.buckets = new_buckets;
        }
    }
}

impl<V: Clone> Chain<u64, V> {
    fn get(&self, key: &u64) -> Option<&V> {
        if self.buckets.is_empty() {
            return None;
        }
        let idx = self.bucket_index(hash_u64(*key));
        self.buckets[idx].iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn insert(&mut self, key: u64, value: V, hash_fn: impl Fn(&u64) -> u64) {
        self.ensure_capacity();
        let idx = self.bucket_index(hash_fn(&key));
        if let Some(slot) = self.buckets[idx].iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }
        self.buckets[idx].push((key, value));
        self.len += 1;
    }

    fn remove(&mut self, key: &u64) -> Option<V> {
        if self.buckets.is_empty() {
            return None;
        }
        let idx = self.bucket_index(hash_u64(*key));
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k == key)?;
        self.len -= 1;
        Some(bucket.remove(pos).1)
    }

    fn iter(&self) -> impl Iterator<Item = (&u64, &V)> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(k, v)| (k, v)))
    }
}

impl<V: Clone> Chain<String, V> {
    fn get_by_str(&self, key: &str) -> Option<&V> {
        if self.buckets.is_empty() {
            return None;
        }
        let idx = self.bucket_index(murmur_hash2(key.as_bytes()));
        self.buckets[idx]
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    fn insert(&mut self, key: String, value: V, hash_fn: impl Fn(&String) -> u64) {
        self.ensure_capacity();
        let idx = self.bucket_index(hash_fn(&key));
        if let Some(slot) = self.buckets[idx].iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }
        self.buckets[idx].push((key, value));
        self.len += 1;
    }

    fn remove_by_str(&mut self, key: &str) -> Option<V> {
        if self.buckets.is_empty() {
            return None;
        }
        let idx = self.bucket_index(murmur_hash2(key.as_bytes()));
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k.as_str() == key)?;
        self.len -= 1;
        Some(bucket.remove(pos).1)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(k, v)| (k, v)))
    }
}

fn hash_u64(key: &u64) -> u64 {
    // Fibonacci hashing: spreads contiguous or near-contiguous integer keys
    // (field numbers, most commonly) across buckets.
    key.wrapping_mul(0x9E3779B97F4A7C15)
}

/// MurmurHash2 (64-bit variant), used for string table bucket placement.
/// Matches the *family* of hash spec.md names; not guaranteed to reproduce
/// upb's own C constants bit-for-bit.
pub fn murmur_hash2(data: &[u8]) -> u64 {
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: u32 = 47;
    const SEED: u64 = 0;

    let mut h: u64 = SEED ^ (data.len() as u64).wrapping_mul(M);
    let chunks = data.chunks_exact(8);
    let remainder = chunks.remainder();
    for chunk in chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }
    if !remainder.is_empty() {
        let mut buf = [0u8; 8];
        buf[..remainder.len()].copy_from_slice(remainder);
        let k = u64::from_le_bytes(buf);
        h ^= k;
        h = h.wrapping_mul(M);
    }
    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_table_dense_keys_hit_array_path() {
        let mut t = IntTable::new();
        for i in 0..100u64 {
            t.insert(i, i * 2);
        }
        for i in 0..100u64 {
            assert_eq!(*t.get(i).unwrap(), i * 2);
        }
        assert_eq!(t.len(), 100);
    }

    #[test]
    fn int_table_sparse_key_routes_to_chain() {
        let mut t: IntTable<u32> = IntTable::new();
        t.insert(0, 1);
        t.insert(1_000_000, 2);
        assert_eq!(*t.get(0).unwrap(), 1);
        assert_eq!(*t.get(1_000_000).unwrap(), 2);
        assert!(t.array.len() < 1_000_000);
    }

    #[test]
    fn int_table_remove() {
        let mut t = IntTable::new();
        t.insert(5, "a");
        assert_eq!(t.remove(5), Some("a"));
        assert_eq!(t.get(5), None);
    }

    #[test]
    fn str_table_basic() {
        let mut t = StrTable::new();
        t.insert("foo", 1);
        t.insert("bar", 2);
        assert_eq!(*t.get("foo").unwrap(), 1);
        assert_eq!(*t.get("bar").unwrap(), 2);
        assert_eq!(t.get("baz"), None);
    }

    #[test]
    fn str_table_resizes_under_load() {
        let mut t = StrTable::new();
        for i in 0..500 {
            t.insert(alloc_crate::format!("key{i}"), i);
        }
        assert_eq!(t.len(), 500);
        for i in 0..500 {
            assert_eq!(*t.get(&alloc_crate::format!("key{i}")).unwrap(), i);
        }
    }

    #[test]
    fn murmur_is_deterministic() {
        assert_eq!(murmur_hash2(b"hello"), murmur_hash2(b"hello"));
        assert_ne!(murmur_hash2(b"hello"), murmur_hash2(b"world"));
    }
}
