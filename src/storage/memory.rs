//! In-process store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::storage::entry::{self, Entry};
use crate::storage::{KvStore, expiry};

/// Mutex-guarded map; every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Entry>) -> Result<T>) -> Result<T> {
        let mut entries = self.entries.lock().await;
        let slot = entry::live(entries.remove(key), Utc::now());
        let result = f(slot.as_ref());
        if let Some(e) = slot {
            entries.insert(key.to_string(), e);
        }
        result
    }

    async fn mutate<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Option<Entry>) -> Result<T>,
    ) -> Result<T> {
        let mut entries = self.entries.lock().await;
        let mut slot = entry::live(entries.remove(key), Utc::now());
        let result = f(&mut slot);
        if let Some(e) = slot {
            entries.insert(key.to_string(), e);
        }
        result
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key, entry::get).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(key, |slot| {
            entry::set(slot, value.to_string(), None);
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.mutate(key, |slot| Ok(slot.take().is_some())).await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        self.mutate(key, |slot| entry::list_push(slot, value.to_string()))
            .await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.read(key, |slot| entry::list_range(slot, start, stop))
            .await
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.mutate(key, |slot| entry::list_trim(slot, start, stop))
            .await
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> Result<bool> {
        self.mutate(key, |slot| {
            entry::sorted_set_add(slot, score, member.to_string())
        })
        .await
    }

    async fn sorted_set_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>> {
        self.read(key, |slot| entry::sorted_set_range(slot, start, stop))
            .await
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool> {
        self.mutate(key, |slot| entry::sorted_set_remove(slot, member))
            .await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.mutate(key, |slot| entry::incr_by(slot, delta)).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let expires_at = expiry(ttl);
        self.mutate(key, |slot| {
            Ok(entry::set_if_absent(slot, value.to_string(), expires_at))
        })
        .await
    }
}
