//! Local filesystem store implementation.
//!
//! Keeps one JSON document per key, for single-host deployments and
//! local operation of the CLI.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── campaign%3A{id}.json                 # Campaign record
//! ├── campaign%3A{id}%3Acount%3Av1.json    # Counter
//! ├── campaigns%3Aindex.json               # Sorted set of campaign ids
//! └── events%3Achat.json                   # Event log (list)
//! ```
//!
//! Writes go to a uniquely named temp file and are renamed into place, so
//! readers never see a partial document.
//!
//! ## Key Leases
//!
//! Read-modify-write operations (`incr_by`, `set_if_absent`, list and
//! sorted-set updates) run under a lease on the key: a `{key}.lock` file
//! created with `create_new`. The lease excludes every process sharing the
//! directory (a network mount shared by several Lambda invocations
//! included), not just callers of this instance. A lease older than
//! [`LEASE_STALE_AFTER`] was left by a crashed holder and is broken.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::entry::{self, Entry};
use crate::storage::{KvStore, expiry};

/// How long a writer waits for a key lease before giving up.
const LEASE_WAIT: Duration = Duration::from_secs(10);

/// Age after which a lease file is considered abandoned.
pub const LEASE_STALE_AFTER: Duration = Duration::from_secs(30);

const LEASE_RETRY: Duration = Duration::from_millis(5);

/// Exclusive lease on one key, released when dropped.
struct KeyLease {
    path: PathBuf,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Local filesystem store backend.
pub struct LocalStore {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the file path for a key.
    fn path(&self, key: &str) -> PathBuf {
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.root_dir.join(format!("{encoded}.json"))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn remove_file(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Take the cross-process lease on a key, waiting for the current holder.
    async fn lease(&self, key: &str) -> Result<KeyLease> {
        let path = self.path(key).with_extension("lock");
        self.ensure_dir(&path).await?;

        let started = tokio::time::Instant::now();
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(KeyLease { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.break_stale_lease(&path).await {
                        continue;
                    }
                    if started.elapsed() >= LEASE_WAIT {
                        return Err(AppError::store(format!(
                            "timed out waiting for the lease on key '{key}'"
                        )));
                    }
                    tokio::time::sleep(LEASE_RETRY).await;
                }
                Err(e) => return Err(AppError::Io(e)),
            }
        }
    }

    /// Remove a lease file whose holder is gone. Returns whether it was removed.
    async fn break_stale_lease(&self, path: &Path) -> bool {
        let age = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified.elapsed().unwrap_or_default(),
            Err(_) => return false,
        };
        if age < LEASE_STALE_AFTER {
            return false;
        }
        log::warn!("Breaking stale store lease {} ({:?} old)", path.display(), age);
        tokio::fs::remove_file(path).await.is_ok()
    }

    /// Load the live entry stored under a key.
    async fn load(&self, key: &str) -> Result<Option<Entry>> {
        let slot = match self.read_bytes(key).await? {
            Some(bytes) => Some(serde_json::from_slice::<Entry>(&bytes).map_err(|e| {
                AppError::store(format!("corrupt entry for key '{key}': {e}"))
            })?),
            None => None,
        };
        Ok(entry::live(slot, Utc::now()))
    }

    async fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Entry>) -> Result<T>) -> Result<T> {
        let slot = self.load(key).await?;
        f(slot.as_ref())
    }

    async fn mutate<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Option<Entry>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let _lease = self.lease(key).await?;
        let before = self.load(key).await?;
        let mut slot = before.clone();
        let result = f(&mut slot)?;

        if slot != before {
            match &slot {
                Some(e) => self.write_bytes(key, &serde_json::to_vec_pretty(e)?).await?,
                None => self.remove_file(key).await?,
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl KvStore for LocalStore {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());

        storage.write_bytes("test", b"hello").await.unwrap();
        let data = storage.read_bytes("test").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());

        assert!(storage.read_bytes("nope").await.unwrap().is_none());
        assert!(storage.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());

        let path = storage.path("../campaign:1/x");
        assert_eq!(path.parent(), Some(tmp.path()));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = LocalStore::new(tmp.path());
            storage.set("campaign:1", "{}").await.unwrap();
            storage
                .sorted_set_add("campaigns:index", 2.0, "1")
                .await
                .unwrap();
            storage.incr_by("campaign:1:count:v1", 3).await.unwrap();
        }

        let storage = LocalStore::new(tmp.path());
        assert_eq!(storage.get("campaign:1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(
            storage.sorted_set_range("campaigns:index", 0, -1).await.unwrap(),
            vec![("1".to_string(), 2.0)]
        );
        assert_eq!(storage.incr_by("campaign:1:count:v1", 1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStore::new(tmp.path()));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.incr_by("n", 1).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(storage.get("n").await.unwrap().as_deref(), Some("20"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_instances_sharing_a_directory_stay_atomic() {
        let tmp = TempDir::new().unwrap();
        let first = Arc::new(LocalStore::new(tmp.path()));
        let second = Arc::new(LocalStore::new(tmp.path()));

        let mut handles = Vec::new();
        for i in 0..100 {
            let storage = if i % 2 == 0 {
                Arc::clone(&first)
            } else {
                Arc::clone(&second)
            };
            handles.push(tokio::spawn(async move {
                storage.incr_by("n", 1).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(first.get("n").await.unwrap().as_deref(), Some("100"));

        for i in 0..25 {
            let key = format!("marker:{i}");
            let (a, b) = tokio::join!(
                first.set_if_absent(&key, "a", None),
                second.set_if_absent(&key, "b", None)
            );
            assert!(a.unwrap() ^ b.unwrap(), "exactly one writer takes {key}");
        }
    }

    #[tokio::test]
    async fn test_lease_is_released_and_leaves_no_files() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());

        storage.incr_by("n", 1).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["n.json".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_lease_is_kept_and_stale_one_broken() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());
        let lock = storage.path("n").with_extension("lock");

        std::fs::write(&lock, b"").unwrap();
        assert!(!storage.break_stale_lease(&lock).await);

        let old = std::time::SystemTime::now() - LEASE_STALE_AFTER - Duration::from_secs(1);
        std::fs::File::options()
            .write(true)
            .open(&lock)
            .unwrap()
            .set_modified(old)
            .unwrap();
        assert_eq!(storage.incr_by("n", 2).await.unwrap(), 2);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());

        storage.list_push("log", "a").await.unwrap();
        assert!(storage.path("log").exists());
        assert!(storage.delete("log").await.unwrap());
        assert!(!storage.path("log").exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStore::new(tmp.path());

        storage.write_bytes("bad", b"not json").await.unwrap();
        assert!(matches!(storage.get("bad").await, Err(AppError::Store(_))));
    }
}
