//! Bucket: one lock stripe of the table.
//!
//! A bucket owns an insertion-ordered chain of entries behind a
//! `parking_lot::RwLock`. Keys are not unique within a chain: insert and
//! emplace append unconditionally, lookups return the first match in
//! storage order and erase removes only that first match. Every lookup is a
//! linear scan; buckets are expected to stay short.
//!
//! Entries live in a generational `SlotMap` so that a slot key handed out
//! by `insert` stops resolving once its entry is erased, even if the
//! physical slot is reused later. `order` records storage order.

use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use parking_lot::RwLock;
use slotmap::{DefaultKey, SlotMap};

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
}

/// Unlocked chain state. All methods assume the caller holds the bucket
/// lock in the appropriate mode.
#[derive(Debug)]
struct Chain<K, V> {
    order: Vec<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
}

impl<K, V> Default for Chain<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            slots: SlotMap::with_key(),
        }
    }
}

impl<K, V> Chain<K, V> {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn push(&mut self, key: K, value: V) -> DefaultKey {
        let slot = self.slots.insert(Entry { key, value });
        self.order.push(slot);
        slot
    }

    /// Position in `order` and slot of the first entry whose key equals `q`.
    fn position<Q>(&self, q: &Q) -> Option<(usize, DefaultKey)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.order.iter().enumerate().find_map(|(pos, &slot)| {
            self.slots
                .get(slot)
                .filter(|e| e.key.borrow() == q)
                .map(|_| (pos, slot))
        })
    }

    fn unlink(&mut self, pos: usize, slot: DefaultKey) -> Option<(K, V)> {
        self.order.remove(pos);
        self.slots.remove(slot).map(|e| (e.key, e.value))
    }

    fn last_mut(&mut self) -> Option<(DefaultKey, &mut V)> {
        let slot = *self.order.last()?;
        self.slots.get_mut(slot).map(|e| (slot, &mut e.value))
    }

    /// Entries in storage order.
    fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|&slot| self.slots.get(slot))
            .map(|e| (&e.key, &e.value))
    }
}

/// A single lock stripe. See the module docs.
#[derive(Debug)]
pub(crate) struct Bucket<K, V> {
    chain: RwLock<Chain<K, V>>,
    reentrancy: DebugReentrancy,
}

impl<K, V> Default for Bucket<K, V> {
    fn default() -> Self {
        Self {
            chain: RwLock::new(Chain::default()),
            reentrancy: DebugReentrancy::new(),
        }
    }
}

impl<K, V> Bucket<K, V> {
    /// Append `(key, value)`. Never checks for an existing key.
    pub(crate) fn insert(&self, key: K, value: V) -> DefaultKey {
        let _g = self.reentrancy.enter();
        self.chain.write().push(key, value)
    }

    /// Build the value with `make` inside the critical section and append it.
    pub(crate) fn emplace<F>(&self, key: K, make: F) -> DefaultKey
    where
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        let mut chain = self.chain.write();
        let value = make();
        chain.push(key, value)
    }

    /// Remove the first entry matching `q`. A miss is a no-op.
    pub(crate) fn erase<Q>(&self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let _g = self.reentrancy.enter();
        let mut chain = self.chain.write();
        let (pos, slot) = chain.position(q)?;
        chain.unlink(pos, slot)
    }

    /// Remove the entry stored at `slot`, if it is still live.
    pub(crate) fn remove(&self, slot: DefaultKey) -> Option<(K, V)> {
        let _g = self.reentrancy.enter();
        let mut chain = self.chain.write();
        let pos = chain.order.iter().position(|&s| s == slot)?;
        chain.unlink(pos, slot)
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let _g = self.reentrancy.enter();
        self.chain.read().position(q).map(|(_, slot)| slot)
    }

    /// Run `f` on the value of the first match under the shared lock.
    pub(crate) fn with<Q, F, R>(&self, q: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        F: FnOnce(&V) -> R,
    {
        let _g = self.reentrancy.enter();
        let chain = self.chain.read();
        let (_, slot) = chain.position(q)?;
        chain.slots.get(slot).map(|e| f(&e.value))
    }

    /// Run `f` on the value of the first match under the exclusive lock.
    pub(crate) fn with_mut<Q, F, R>(&self, q: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        F: FnOnce(&mut V) -> R,
    {
        let _g = self.reentrancy.enter();
        let mut chain = self.chain.write();
        let (_, slot) = chain.position(q)?;
        chain.slots.get_mut(slot).map(|e| f(&mut e.value))
    }

    /// Run `f` on the most recently appended entry. `None` if empty.
    pub(crate) fn with_last<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&K, &V) -> R,
    {
        let _g = self.reentrancy.enter();
        let chain = self.chain.read();
        let slot = *chain.order.last()?;
        chain.slots.get(slot).map(|e| f(&e.key, &e.value))
    }

    pub(crate) fn with_slot<F, R>(&self, slot: DefaultKey, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        let _g = self.reentrancy.enter();
        self.chain.read().slots.get(slot).map(|e| f(&e.value))
    }

    pub(crate) fn with_slot_mut<F, R>(&self, slot: DefaultKey, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        let _g = self.reentrancy.enter();
        self.chain.write().slots.get_mut(slot).map(|e| f(&mut e.value))
    }

    /// Upsert primitive: find the first match for `key`, or append a value
    /// built by `make`, then run `f` on it. Lookup, append and `f` share one
    /// exclusive critical section, so no other thread can append between
    /// the miss and the read of the freshly appended entry.
    pub(crate) fn get_or_insert_with<M, F, R>(&self, key: K, make: M, f: F) -> R
    where
        K: Eq,
        M: FnOnce() -> V,
        F: FnOnce(DefaultKey, &mut V) -> R,
    {
        let _g = self.reentrancy.enter();
        let mut chain = self.chain.write();
        if let Some((_, slot)) = chain.position(&key) {
            if let Some(e) = chain.slots.get_mut(slot) {
                return f(slot, &mut e.value);
            }
        }
        log::trace!("bucket miss, inserting a fresh value");
        let value = make();
        chain.push(key, value);
        match chain.last_mut() {
            Some((slot, value)) => f(slot, value),
            None => unreachable!("chain empty right after push"),
        }
    }

    pub(crate) fn len(&self) -> usize {
        let _g = self.reentrancy.enter();
        self.chain.read().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every entry in storage order under the shared lock.
    pub(crate) fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        let _g = self.reentrancy.enter();
        for (k, v) in self.chain.read().iter() {
            f(k, v);
        }
    }

    /// Empty the bucket in place through exclusive access, handing the
    /// entries back so they can be dropped outside any lock. Slots are
    /// released rather than rebuilt, so their generations keep advancing and
    /// slot keys from before the clear never resolve again.
    pub(crate) fn take_all(&mut self) -> Vec<(K, V)> {
        let chain = self.chain.get_mut();
        let order = core::mem::take(&mut chain.order);
        order
            .into_iter()
            .filter_map(|slot| chain.slots.remove(slot))
            .map(|e| (e.key, e.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Invariant: duplicate keys coexist; lookup sees the first inserted.
    #[test]
    fn duplicates_coexist_and_first_match_wins() {
        let b: Bucket<String, i32> = Bucket::default();
        b.insert("a".to_string(), 1);
        b.insert("a".to_string(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(b.with("a", |v| *v), Some(1));
    }

    /// Invariant: erase removes only the first match, exposing the next one.
    #[test]
    fn erase_removes_first_match_only() {
        let b: Bucket<String, i32> = Bucket::default();
        b.insert("a".to_string(), 1);
        b.insert("b".to_string(), 9);
        b.insert("a".to_string(), 2);

        assert_eq!(b.erase("a"), Some(("a".to_string(), 1)));
        assert_eq!(b.len(), 2);
        assert_eq!(b.with("a", |v| *v), Some(2));

        assert_eq!(b.erase("a"), Some(("a".to_string(), 2)));
        assert_eq!(b.erase("a"), None);
        assert_eq!(b.len(), 1);
    }

    /// Invariant: storage order survives erasing entries from the middle.
    #[test]
    fn storage_order_is_insertion_order() {
        let b: Bucket<u32, u32> = Bucket::default();
        for i in 0..5 {
            b.insert(i, i * 10);
        }
        b.erase(&2);
        let mut seen = Vec::new();
        b.for_each(|k, v| seen.push((*k, *v)));
        assert_eq!(seen, vec![(0, 0), (1, 10), (3, 30), (4, 40)]);
    }

    /// Invariant: `with_last` tracks the most recent append and is `None`
    /// on an empty bucket.
    #[test]
    fn last_entry_tracking() {
        let b: Bucket<&'static str, i32> = Bucket::default();
        assert_eq!(b.with_last(|_, v| *v), None);
        b.insert("x", 1);
        b.insert("y", 2);
        assert_eq!(b.with_last(|k, v| (*k, *v)), Some(("y", 2)));
        b.erase("y");
        assert_eq!(b.with_last(|k, v| (*k, *v)), Some(("x", 1)));
    }

    /// Invariant: a slot key stops resolving once its entry is erased and
    /// does not alias a later entry that reuses the physical slot.
    #[test]
    fn stale_slot_does_not_alias() {
        let b: Bucket<&'static str, i32> = Bucket::default();
        let s1 = b.insert("old", 1);
        assert_eq!(b.with_slot(s1, |v| *v), Some(1));
        b.erase("old");
        let s2 = b.insert("new", 2);
        assert_ne!(s1, s2);
        assert_eq!(b.with_slot(s1, |v| *v), None);
        assert_eq!(b.remove(s1), None);
        assert_eq!(b.with_slot(s2, |v| *v), Some(2));
    }

    /// Invariant: `emplace` builds the value exactly once and appends it.
    #[test]
    fn emplace_builds_value_once() {
        let b: Bucket<&'static str, Vec<u8>> = Bucket::default();
        let calls = Cell::new(0);
        let slot = b.emplace("k", || {
            calls.set(calls.get() + 1);
            vec![1, 2, 3]
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(b.with_slot(slot, |v| v.len()), Some(3));
    }

    /// Invariant: upsert runs `make` only on a miss and both paths hand the
    /// same slot to `f`.
    #[test]
    fn get_or_insert_with_is_lazy() {
        let b: Bucket<&'static str, i32> = Bucket::default();
        let calls = Cell::new(0);
        let make = || {
            calls.set(calls.get() + 1);
            7
        };
        let s1 = b.get_or_insert_with("k", make, |slot, v| {
            *v += 1;
            slot
        });
        let s2 = b.get_or_insert_with("k", || 100, |slot, v| {
            assert_eq!(*v, 8);
            slot
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(s1, s2);
        assert_eq!(b.len(), 1);
    }

    /// Invariant: `take_all` empties in place and yields entries in order.
    #[test]
    fn take_all_empties_in_place() {
        let mut b: Bucket<u8, u8> = Bucket::default();
        let s1 = b.insert(1, 1);
        b.insert(2, 2);
        assert_eq!(b.take_all(), vec![(1, 1), (2, 2)]);
        assert!(b.is_empty());

        // The freed slot is reused with a newer generation.
        let s3 = b.insert(3, 3);
        assert_eq!(b.len(), 1);
        assert_ne!(s1, s3);
        assert_eq!(b.with_slot(s1, |v| *v), None);
    }
}
