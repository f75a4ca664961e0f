//! StripedHashTable: routes keyed operations to a fixed set of buckets.

use crate::bucket::Bucket;
use crate::error::TableError;
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_map::DefaultHashBuilder;
use parking_lot::{RwLock, RwLockReadGuard};
use slotmap::DefaultKey;

/// Number of buckets used by [`StripedHashTable::new`].
pub const DEFAULT_BUCKET_COUNT: usize = 10;

/// Names one stored entry: its bucket and its generational slot.
///
/// A handle stays valid until its entry is erased or the table is cleared.
/// After that it resolves to `None`, even if the slot has since been reused.
///
/// Handles are only meaningful on the table that issued them. Resolving one
/// against another table is not checked and may name an unrelated entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle {
    bucket: usize,
    slot: DefaultKey,
}

impl Handle {
    fn new(bucket: usize, slot: DefaultKey) -> Self {
        Handle { bucket, slot }
    }

    /// Index of the bucket holding the entry.
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Owned copy of the entry's value, if it is still live.
    pub fn value<K, V, S>(&self, table: &StripedHashTable<K, V, S>) -> Option<V>
    where
        V: Clone,
    {
        table.with_handle(*self, V::clone)
    }

    pub fn with<K, V, S, F, R>(&self, table: &StripedHashTable<K, V, S>, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        table.with_handle(*self, f)
    }

    pub fn with_mut<K, V, S, F, R>(&self, table: &StripedHashTable<K, V, S>, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        table.with_handle_mut(*self, f)
    }
}

/// A fixed-size hash table split into independently locked buckets.
///
/// Every per-key operation takes the table lock in shared mode and then the
/// lock of exactly one bucket, so operations on different buckets never
/// contend. Only [`clear`](Self::clear) takes the table lock exclusively.
///
/// Keys are not unique: [`insert`](Self::insert) always appends, lookups see
/// the first matching entry of a bucket and [`erase`](Self::erase) removes
/// that first match.
///
/// Closures passed to `with`-style methods run while a bucket lock is held
/// and must not call back into the same table. Debug builds panic if they
/// do; release builds deadlock.
pub struct StripedHashTable<K, V, S = DefaultHashBuilder> {
    hasher: S,
    bucket_count: usize,
    buckets: RwLock<Box<[Bucket<K, V>]>>,
    reentrancy: DebugReentrancy,
}

impl<K, V> StripedHashTable<K, V>
where
    K: Eq + Hash,
{
    /// Table with [`DEFAULT_BUCKET_COUNT`] buckets and the default hasher.
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    /// Table with `bucket_count` buckets. Zero is rejected.
    pub fn with_buckets(bucket_count: usize) -> Result<Self, TableError> {
        Self::with_buckets_and_hasher(bucket_count, Default::default())
    }
}

impl<K, V, S> Default for StripedHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> StripedHashTable<K, V, S> {
    /// Number of buckets, fixed at construction.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Table lock in shared mode, behind the table's reentrancy guard.
    fn read_buckets(&self) -> (ReentrancyGuard<'_>, RwLockReadGuard<'_, Box<[Bucket<K, V>]>>) {
        let g = self.reentrancy.enter();
        (g, self.buckets.read())
    }

    fn with_handle<F, R>(&self, h: Handle, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        let (_g, buckets) = self.read_buckets();
        buckets.get(h.bucket)?.with_slot(h.slot, f)
    }

    fn with_handle_mut<F, R>(&self, h: Handle, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        let (_g, buckets) = self.read_buckets();
        buckets.get(h.bucket)?.with_slot_mut(h.slot, f)
    }

    /// Remove the entry named by `h`. `None` if it was already removed.
    pub fn remove(&self, h: Handle) -> Option<(K, V)> {
        let (_g, buckets) = self.read_buckets();
        buckets.get(h.bucket)?.remove(h.slot)
    }

    /// Number of entries in bucket `index`.
    pub fn bucket_len(&self, index: usize) -> Result<usize, TableError> {
        let (_g, buckets) = self.read_buckets();
        buckets
            .get(index)
            .map(Bucket::len)
            .ok_or(TableError::BucketOutOfRange {
                index,
                bucket_count: self.bucket_count,
            })
    }

    /// Run `f` on the most recently appended entry of bucket `index`.
    /// `Ok(None)` if that bucket is empty.
    pub fn with_last_in_bucket<F, R>(
        &self,
        index: usize,
        f: F,
    ) -> Result<Option<R>, TableError>
    where
        F: FnOnce(&K, &V) -> R,
    {
        let (_g, buckets) = self.read_buckets();
        let bucket = buckets.get(index).ok_or(TableError::BucketOutOfRange {
            index,
            bucket_count: self.bucket_count,
        })?;
        Ok(bucket.with_last(f))
    }

    /// Total entry count, summed bucket by bucket. Concurrent writers to
    /// other buckets may make this stale by the time it returns.
    pub fn len(&self) -> usize {
        let (_g, buckets) = self.read_buckets();
        buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        let (_g, buckets) = self.read_buckets();
        buckets.iter().all(Bucket::is_empty)
    }

    /// Visit every entry, one bucket at a time in bucket order and storage
    /// order within a bucket. Not an atomic snapshot across buckets.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        let (_g, buckets) = self.read_buckets();
        for bucket in buckets.iter() {
            bucket.for_each(&mut f);
        }
    }

    /// Remove every entry while keeping all `bucket_count` buckets in place.
    ///
    /// Waits for in-flight operations to finish. Removed keys and values are
    /// dropped after the table lock is released.
    pub fn clear(&self) {
        let removed: Vec<_> = {
            let _g = self.reentrancy.enter();
            let mut buckets = self.buckets.write();
            buckets.iter_mut().map(Bucket::take_all).collect()
        };
        let count: usize = removed.iter().map(Vec::len).sum();
        log::debug!(
            "cleared {} entries across {} buckets",
            count,
            self.bucket_count
        );
        drop(removed);
    }
}

impl<K, V, S> StripedHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Table with [`DEFAULT_BUCKET_COUNT`] buckets hashing through `hasher`.
    pub fn with_hasher(hasher: S) -> Self {
        Self::build(DEFAULT_BUCKET_COUNT, hasher)
    }

    /// Fails with [`TableError::ZeroBuckets`] when `bucket_count` is zero.
    pub fn with_buckets_and_hasher(bucket_count: usize, hasher: S) -> Result<Self, TableError> {
        if bucket_count == 0 {
            return Err(TableError::ZeroBuckets);
        }
        Ok(Self::build(bucket_count, hasher))
    }

    fn build(bucket_count: usize, hasher: S) -> Self {
        log::debug!("creating striped hash table with {} buckets", bucket_count);
        let buckets: Box<[Bucket<K, V>]> = (0..bucket_count).map(|_| Bucket::default()).collect();
        Self {
            hasher,
            bucket_count,
            buckets: RwLock::new(buckets),
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// Bucket a key routes to: `hash(key) % bucket_count`.
    pub fn index_for<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        (self.hasher.hash_one(q) % self.bucket_count as u64) as usize
    }

    /// Append `(key, value)` to its bucket. Never checks for an existing key.
    pub fn insert(&self, key: K, value: V) -> Handle {
        let index = self.index_for(&key);
        let (_g, buckets) = self.read_buckets();
        Handle::new(index, buckets[index].insert(key, value))
    }

    /// Like [`insert`](Self::insert), but builds the value with `make` while
    /// the bucket lock is held.
    pub fn emplace<F>(&self, key: K, make: F) -> Handle
    where
        F: FnOnce() -> V,
    {
        let index = self.index_for(&key);
        let (_g, buckets) = self.read_buckets();
        Handle::new(index, buckets[index].emplace(key, make))
    }

    /// Remove the first entry matching `q`. Erasing an absent key is a
    /// no-op that returns `None`.
    pub fn erase<Q>(&self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let index = self.index_for(q);
        let (_g, buckets) = self.read_buckets();
        buckets[index].erase(q)
    }

    /// Handle to the first entry stored under `q`.
    pub fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let index = self.index_for(q);
        let (_g, buckets) = self.read_buckets();
        buckets[index].find(q).map(|slot| Handle::new(index, slot))
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    /// Run `f` on the first value stored under `q`, holding the bucket's
    /// shared lock.
    pub fn with<Q, F, R>(&self, q: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&V) -> R,
    {
        let index = self.index_for(q);
        let (_g, buckets) = self.read_buckets();
        buckets[index].with(q, f)
    }

    /// Run `f` on the first value stored under `q`, holding the bucket's
    /// exclusive lock.
    pub fn with_mut<Q, F, R>(&self, q: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&mut V) -> R,
    {
        let index = self.index_for(q);
        let (_g, buckets) = self.read_buckets();
        buckets[index].with_mut(q, f)
    }

    /// Owned copy of the first value stored under `q`.
    pub fn get<Q>(&self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.with(q, V::clone)
    }

    /// Strict accessor: like [`get`](Self::get) but a miss is an error.
    pub fn at<Q>(&self, q: &Q) -> Result<V, TableError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.get(q).ok_or(TableError::KeyNotFound)
    }

    /// Return the entry for `key`, inserting `make()` first if the key is
    /// absent. Check and insert happen in one bucket critical section, so
    /// concurrent callers with the same absent key create one entry.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> Handle
    where
        F: FnOnce() -> V,
    {
        let index = self.index_for(&key);
        let (_g, buckets) = self.read_buckets();
        let slot = buckets[index].get_or_insert_with(key, make, |slot, _| slot);
        Handle::new(index, slot)
    }

    /// Default-inserting accessor: the value under `key`, inserting
    /// `V::default()` first if absent.
    pub fn get_or_default(&self, key: K) -> V
    where
        V: Default + Clone,
    {
        self.update_or_default(key, |v| v.clone())
    }

    /// Run `f` on the value under `key`, inserting `V::default()` first if
    /// absent, all inside one exclusive bucket critical section.
    ///
    /// ```
    /// use striped_hashtable::StripedHashTable;
    ///
    /// let hits: StripedHashTable<&str, u32> = StripedHashTable::new();
    /// hits.update_or_default("index.html", |n| *n += 1);
    /// hits.update_or_default("index.html", |n| *n += 1);
    /// assert_eq!(hits.get("index.html"), Some(2));
    /// ```
    pub fn update_or_default<F, R>(&self, key: K, f: F) -> R
    where
        V: Default,
        F: FnOnce(&mut V) -> R,
    {
        let index = self.index_for(&key);
        let (_g, buckets) = self.read_buckets();
        buckets[index].get_or_insert_with(key, V::default, |_, v| f(v))
    }
}
