//! Error type shared by the table's fallible operations.

/// Failures reported by [`StripedHashTable`](crate::StripedHashTable).
///
/// Erasing an absent key is not an error; it simply returns `None`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("key not found")]
    KeyNotFound,
    #[error("bucket index {index} out of range for {bucket_count} buckets")]
    BucketOutOfRange { index: usize, bucket_count: usize },
    #[error("a table needs at least one bucket")]
    ZeroBuckets,
}
