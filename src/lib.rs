//! striped-hashtable: a fixed-size, lock-striped concurrent hash table.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a key/value store shared by many threads through `&self`
//!   without an external lock, where operations on different keys rarely
//!   contend.
//! - Layers:
//!   - Bucket<K, V>: one lock stripe. An insertion-ordered chain of entries
//!     behind a `parking_lot::RwLock`; linear-scan lookups, generational
//!     slots so handles to erased entries stop resolving.
//!   - StripedHashTable<K, V, S>: a boxed slice of buckets behind a table
//!     level `RwLock`. Routes each key to `hash(key) % bucket_count` and
//!     delegates.
//!
//! Locking
//! - Two tiers, always taken table first, then at most one bucket.
//! - Table lock: shared for every per-key, per-handle and per-bucket
//!   operation; exclusive only for `clear`.
//! - Bucket lock: exclusive for insert/emplace/erase/remove/upsert and
//!   `with_mut`; shared for lookups.
//! - Keys are hashed before any lock is taken.
//!
//! Constraints
//! - Bucket count is fixed at construction (default 10). No resizing; `clear`
//!   empties buckets in place and keeps all of them.
//! - Keys are not unique. Insert appends; lookups and erase act on the first
//!   match in storage order.
//! - No references into bucket storage escape a lock. Values are read by
//!   owned copy, by closure under the lock, or through a `Handle`.
//! - Default-insert access (`get_or_insert_with`, `get_or_default`,
//!   `update_or_default`) is one exclusive bucket critical section, so
//!   racing callers with the same absent key create a single entry.
//!
//! Reentrancy policy
//! - User code that runs under a lock: `K: Eq`, value constructors,
//!   `V: Default`, and closures passed to `with`-style methods and
//!   `for_each`. It must not call back into the same table. Debug builds
//!   detect this per thread and panic instead of deadlocking.
//! - Removed keys and values are returned to the caller (or, for `clear`,
//!   dropped after the table lock is released), so their `Drop` may use the
//!   table freely.

mod bucket;
mod error;
mod reentrancy;
pub mod table;
mod table_proptest;

// Public surface
pub use error::TableError;
pub use reentrancy::DebugReentrancy;
pub use table::{Handle, StripedHashTable, DEFAULT_BUCKET_COUNT};
