#![cfg(test)]

// Property tests for StripedHashTable kept inside the crate so they can
// reach the unit-test helpers without a public testing surface.

use crate::table::{Handle, StripedHashTable};
use crate::TableError;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Emplace(usize, i32),
    Erase(usize),
    RemoveLast(usize),
    Get(usize),
    Contains(String),
    Upsert(usize, i32),
    Mutate(usize, i32),
    Clear,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Emplace(i, v)),
            3 => idx.clone().prop_map(OpI::Erase),
            1 => idx.clone().prop_map(OpI::RemoveLast),
            2 => idx.clone().prop_map(OpI::Get),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Upsert(i, d)),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Clear),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Model: per key, the entries stored under it in insertion order. Equal
// keys always share a bucket, so the table's first match for a key is the
// model's front element.
type Model = HashMap<Key, VecDeque<(i32, Handle)>>;

fn model_len(model: &Model) -> usize {
    model.values().map(VecDeque::len).sum()
}

fn run_state_machine<S>(
    sut: StripedHashTable<Key, i32, S>,
    pool: Vec<String>,
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher,
{
    let mut model: Model = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(&pool, i);
                let h = sut.insert(k.clone(), v);
                prop_assert_eq!(h.bucket(), sut.index_for(&k));
                model.entry(k).or_default().push_back((v, h));
            }
            OpI::Emplace(i, v) => {
                let k = key_from(&pool, i);
                let h = sut.emplace(k.clone(), || v);
                model.entry(k).or_default().push_back((v, h));
            }
            OpI::Erase(i) => {
                let k = key_from(&pool, i);
                let expected = model.get_mut(&k).and_then(VecDeque::pop_front);
                match (sut.erase(&k), expected) {
                    (Some((kk, vv)), Some((mv, h))) => {
                        prop_assert!(kk == k);
                        prop_assert_eq!(vv, mv);
                        stale.push(h);
                    }
                    (None, None) => {}
                    (got, want) => {
                        prop_assert!(false, "erase mismatch: {:?} vs {:?}", got, want);
                    }
                }
            }
            OpI::RemoveLast(i) => {
                let k = key_from(&pool, i);
                if let Some((mv, h)) = model.get_mut(&k).and_then(VecDeque::pop_back) {
                    let (kk, vv) = sut.remove(h).expect("live handle removes its entry");
                    prop_assert!(kk == k);
                    prop_assert_eq!(vv, mv);
                    stale.push(h);
                    prop_assert_eq!(sut.remove(h), None);
                }
            }
            OpI::Get(i) => {
                let k = key_from(&pool, i);
                let front = model.get(&k).and_then(|q| q.front()).copied();
                prop_assert_eq!(sut.get(&k), front.map(|(v, _)| v));
                prop_assert_eq!(sut.find(&k), front.map(|(_, h)| h));
                match front {
                    Some((v, _)) => prop_assert_eq!(sut.at(&k), Ok(v)),
                    None => prop_assert_eq!(sut.at(&k), Err(TableError::KeyNotFound)),
                }
            }
            OpI::Contains(s) => {
                let has = sut.contains_key(s.as_str());
                let has_model = model.iter().any(|(k, q)| k.0 == s && !q.is_empty());
                prop_assert_eq!(has, has_model);
            }
            OpI::Upsert(i, d) => {
                let k = key_from(&pool, i);
                let updated = sut.update_or_default(k.clone(), |v| {
                    *v = v.wrapping_add(d);
                    *v
                });
                let q = model.entry(k.clone()).or_default();
                if q.is_empty() {
                    let h = sut.find(&k).expect("upsert inserted the key");
                    q.push_back((0, h));
                }
                if let Some(front) = q.front_mut() {
                    front.0 = front.0.wrapping_add(d);
                    prop_assert_eq!(updated, front.0);
                }
            }
            OpI::Mutate(i, d) => {
                let k = key_from(&pool, i);
                if let Some(front) = model.get_mut(&k).and_then(|q| q.front_mut()) {
                    let h = front.1;
                    let got = h.with_mut(&sut, |v| {
                        *v = v.wrapping_sub(d);
                        *v
                    });
                    front.0 = front.0.wrapping_sub(d);
                    prop_assert_eq!(got, Some(front.0));
                } else {
                    prop_assert_eq!(sut.with_mut(&k, |v| *v), None);
                }
            }
            OpI::Clear => {
                for (_, q) in model.drain() {
                    stale.extend(q.into_iter().map(|(_, h)| h));
                }
                let buckets = sut.bucket_count();
                sut.clear();
                prop_assert_eq!(sut.bucket_count(), buckets);
            }
            OpI::Iterate => {
                let mut seen: BTreeMap<Key, Vec<i32>> = BTreeMap::new();
                sut.for_each(|k, v| seen.entry(k.clone()).or_default().push(*v));
                let expected: BTreeMap<Key, Vec<i32>> = model
                    .iter()
                    .filter(|(_, q)| !q.is_empty())
                    .map(|(k, q)| (k.clone(), q.iter().map(|&(v, _)| v).collect()))
                    .collect();
                prop_assert_eq!(seen, expected);
            }
        }

        // Post-conditions after each op
        // 1) All stale handles must not resolve
        for &h in &stale {
            prop_assert!(h.value(&sut).is_none());
        }
        // 2) Size parity, globally and per bucket
        prop_assert_eq!(sut.len(), model_len(&model));
        prop_assert_eq!(sut.is_empty(), model_len(&model) == 0);
        let mut per_bucket = vec![0usize; sut.bucket_count()];
        for (k, q) in &model {
            per_bucket[sut.index_for(k)] += q.len();
        }
        for (i, &n) in per_bucket.iter().enumerate() {
            prop_assert_eq!(sut.bucket_len(i), Ok(n));
        }
    }
    Ok(())
}

// Property: state-machine equivalence against a per-key queue model.
// Invariants exercised across random operation sequences:
// - Duplicate keys coexist; `get`/`at`/`find` see the first inserted entry.
// - `erase` removes exactly the first match and returns it; misses are no-ops.
// - `remove(handle)` removes that specific entry and invalidates the handle.
// - `update_or_default` inserts `0` once, then updates the first match.
// - `clear` invalidates every handle but keeps the table usable.
// - `len`/`bucket_len` parity with the model after each op.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut: StripedHashTable<Key, i32> = StripedHashTable::new();
        run_state_machine(sut, pool, ops)?;
    }
}

// Collision variant using a constant hasher: every key lands in bucket 0,
// so one chain holds interleaved duplicates of many keys.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut: StripedHashTable<Key, i32, ConstBuildHasher> =
            StripedHashTable::with_hasher(ConstBuildHasher);
        run_state_machine(sut, pool, ops)?;
    }

    #[test]
    fn prop_index_in_range(buckets in 1usize..64, keys in proptest::collection::vec(any::<u64>(), 0..32)) {
        let sut: StripedHashTable<u64, ()> = StripedHashTable::with_buckets(buckets).unwrap();
        for k in keys {
            let i = sut.index_for(&k);
            prop_assert!(i < buckets);
            prop_assert_eq!(sut.insert(k, ()).bucket(), i);
        }
        prop_assert_eq!(sut.bucket_count(), buckets);
    }
}

