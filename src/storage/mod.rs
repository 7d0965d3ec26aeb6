//! Key-value store capability used for campaigns, counters, and logs.
//!
//! The engine only needs a small Redis-like surface: plain values,
//! append-only lists, score-ordered sets, atomic counters, and
//! expiring exclusive markers. Backends are constructed once and shared
//! through an `Arc<dyn KvStore>`.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process-local, for tests and dry runs
//! - [`LocalStore`]: one JSON document per key under a root directory

mod entry;
pub mod local;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

// Re-export for convenience
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Trait for key-value store backends.
///
/// Ranges are inclusive; negative indices count from the end (`-1` is the last element).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a plain value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a plain value, replacing whatever the key held.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key of any type. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append to the tail of a list. Returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Keep only the given range of a list.
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Insert or rescore a member. Returns true when the member is new.
    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> Result<bool>;

    /// Members with scores, ascending by score.
    async fn sorted_set_range(&self, key: &str, start: i64, stop: i64)
    -> Result<Vec<(String, f64)>>;

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Atomically add `delta` to an integer value (missing counts as 0).
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
}

pub(crate) fn expiry(ttl: Option<Duration>) -> Option<chrono::DateTime<chrono::Utc>> {
    ttl.and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| chrono::Utc::now() + d)
}
