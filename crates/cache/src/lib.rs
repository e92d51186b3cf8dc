//! Persistent, content-addressed local store for model artifacts.
//!
//! A [`CacheStore`] maps a `model_id` to a directory under its root and
//! maintains a JSON index of what has been populated. Population is
//! at-most-once per model_id: concurrent `ensure` calls for the same model
//! serialize on an in-process fast-path mutex in front of a file-based lock,
//! so the guarantee holds across both tasks in this process and other
//! processes sharing the same store root (§4.3, §9 "Cache lock discipline").

pub mod error;
mod index;
pub mod model;

pub use error::{Error, Result};
pub use model::{CacheEntry, CacheStats, Mount};

use chrono::Utc;
use index::Index;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const FILE_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn slug(model_id: &str) -> String {
    model_id.replace('/', "--")
}

/// Thread/process-safe facade over the on-disk cache (§5: "Cache Store index
/// is the only persistent shared mutable state").
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    index: Arc<Mutex<Index>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CacheStore {
    /// Open (or create) a store rooted at `root`, loading the existing index
    /// if present. A corrupt index is treated as empty (§6).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| Error::Io { path: root.clone(), source })?;
        std::fs::create_dir_all(root.join("models")).map_err(|source| Error::Io { path: root.clone(), source })?;
        let index = Index::load(&root);
        Ok(Self {
            root,
            index: Arc::new(Mutex::new(index)),
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Deterministic on-disk path for `model_id`, derived by replacing `/` with `--`.
    #[must_use]
    pub fn path_of(&self, model_id: &str) -> PathBuf {
        self.root.join("models").join(slug(model_id))
    }

    pub async fn is_cached(&self, model_id: &str) -> bool {
        let index = self.index.lock().await;
        match index.get(model_id) {
            Some(entry) => entry.cached && entry.cache_path.is_dir(),
            None => false,
        }
    }

    /// Populate `model_id` if not already cached, invoking `fetch_fn` at most
    /// once across all concurrent callers (property 4, §8). `fetch_fn` receives
    /// the target directory and may return an optional commit hash.
    pub async fn ensure<F, Fut>(&self, model_id: &str, fetch_fn: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Fut,
        Fut: Future<Output = std::result::Result<Option<String>, String>>,
    {
        if self.is_cached(model_id).await {
            let index = self.index.lock().await;
            return Ok(index.get(model_id).expect("just checked cached").cache_path.clone());
        }

        let per_model_lock = self.lock_for(model_id).await;
        let _guard = per_model_lock.lock().await;

        // Double-check now that we hold the in-process fast path.
        if self.is_cached(model_id).await {
            let index = self.index.lock().await;
            return Ok(index.get(model_id).expect("just checked cached").cache_path.clone());
        }

        let target_dir = self.path_of(model_id);
        let file_lock = self.acquire_file_lock(model_id).await?;

        // Triple-check: another process may have populated it while we waited
        // for the file lock.
        if self.is_cached(model_id).await {
            file_lock.release();
            let index = self.index.lock().await;
            return Ok(index.get(model_id).expect("just checked cached").cache_path.clone());
        }

        std::fs::create_dir_all(&target_dir).map_err(|source| Error::Io {
            path: target_dir.clone(),
            source,
        })?;

        debug!(model_id, path = %target_dir.display(), "populating cache entry");
        let fetch_result = fetch_fn(&target_dir).await;
        let commit_hash = match fetch_result {
            Ok(hash) => hash,
            Err(reason) => {
                let _ = std::fs::remove_dir_all(&target_dir);
                file_lock.release();
                return Err(Error::FetchFailed {
                    model_id: model_id.to_string(),
                    reason,
                });
            }
        };

        let size = directory_size(&target_dir)?;
        let entry = CacheEntry {
            model_id: model_id.to_string(),
            cached: true,
            cache_path: target_dir.clone(),
            commit_hash,
            cached_at: Utc::now(),
            size,
        };

        {
            let mut index = self.index.lock().await;
            index.insert(entry);
            index.save(&self.root)?;
        }

        info!(model_id, bytes = size, "cache entry populated");
        file_lock.release();
        Ok(target_dir)
    }

    /// Remove a model's directory and index entry. Safe to call on an absent entry.
    pub async fn evict(&self, model_id: &str) -> Result<()> {
        let mut index = self.index.lock().await;
        if let Some(entry) = index.remove(model_id) {
            if entry.cache_path.exists() {
                std::fs::remove_dir_all(&entry.cache_path).map_err(|source| Error::Io {
                    path: entry.cache_path.clone(),
                    source,
                })?;
            }
            index.save(&self.root)?;
        }
        Ok(())
    }

    /// Remove every entry whose `cached_at` is older than `now - max_age`.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());

        let stale: Vec<String> = {
            let index = self.index.lock().await;
            index
                .values()
                .filter(|e| e.cached_at < cutoff)
                .map(|e| e.model_id.clone())
                .collect()
        };

        for model_id in &stale {
            self.evict(model_id).await?;
        }
        Ok(stale.len())
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        let entries: Vec<CacheEntry> = index.values().cloned().collect();
        CacheStats {
            count: entries.len(),
            total_bytes: entries.iter().map(|e| e.size).sum(),
            entries,
        }
    }

    /// Environment variables pointing the inference runtime at this store (§4.3, §6).
    pub async fn cache_env(&self, model_id: &str) -> HashMap<String, String> {
        let root = self.root.to_string_lossy().to_string();
        let mut env = HashMap::from([
            ("HF_HOME".to_string(), root.clone()),
            ("TRANSFORMERS_CACHE".to_string(), root.clone()),
            ("HF_DATASETS_CACHE".to_string(), root.clone()),
            ("VLLM_CACHE_DIR".to_string(), root),
            ("HF_HUB_DISABLE_TELEMETRY".to_string(), "1".to_string()),
        ]);

        let index = self.index.lock().await;
        if let Some(entry) = index.get(model_id) {
            if entry.cached {
                env.insert(
                    "MODEL_CACHE_PATH".to_string(),
                    entry.cache_path.to_string_lossy().to_string(),
                );
            }
        }
        env
    }

    /// Read-only mounts: the store root, plus an alias of the specific model's
    /// directory when cached (§4.3).
    pub async fn cache_mounts(&self, model_id: &str) -> Vec<Mount> {
        let mut mounts = vec![Mount {
            host_path: self.root.clone(),
            container_path: "/cache".to_string(),
            read_only: true,
        }];

        let index = self.index.lock().await;
        if let Some(entry) = index.get(model_id) {
            if entry.cached {
                mounts.push(Mount {
                    host_path: entry.cache_path.clone(),
                    container_path: format!("/cache/models/{}", slug(model_id)),
                    read_only: true,
                });
            }
        }
        mounts
    }

    async fn lock_for(&self, model_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Cross-process lock: create an exclusive dotfile next to the model's
    /// directory, spinning with a bounded poll interval until it can be created.
    async fn acquire_file_lock(&self, model_id: &str) -> Result<FileLock> {
        let lock_path = self.root.join("models").join(format!(".{}.lock", slug(model_id)));
        loop {
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => return Ok(FileLock { path: lock_path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::time::sleep(FILE_LOCK_POLL_INTERVAL).await;
                }
                Err(source) => return Err(Error::Io { path: lock_path, source }),
            }
        }
    }
}

struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn release(self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release cache file lock");
        }
    }
}

fn directory_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|err| Error::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::other(err),
        })?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|err| Error::Io {
                path: entry.path().to_path_buf(),
                source: std::io::Error::other(err),
            })?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn ensure_populates_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        assert!(!store.is_cached("Acme/M").await);
        let path = store
            .ensure("Acme/M", |target| async move {
                std::fs::write(target.join("weights.bin"), vec![0u8; 1234]).unwrap();
                Ok(None)
            })
            .await
            .unwrap();

        assert!(store.is_cached("Acme/M").await);
        assert_eq!(path, store.path_of("Acme/M"));
        let stats = store.stats().await;
        assert_eq!(stats.count, 1);
        assert_eq!(stats.total_bytes, 1234);
    }

    #[tokio::test]
    async fn evict_removes_directory_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store
            .ensure("Acme/M", |target| async move {
                std::fs::write(target.join("f"), b"x").unwrap();
                Ok(None)
            })
            .await
            .unwrap();

        store.evict("Acme/M").await.unwrap();
        assert!(!store.is_cached("Acme/M").await);
        assert!(!store.path_of("Acme/M").exists());

        // Evicting an absent entry is a no-op, not an error.
        store.evict("Acme/M").await.unwrap();
    }

    #[tokio::test]
    async fn failed_fetch_removes_partial_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        let result = store
            .ensure("Acme/M", |target| async move {
                std::fs::write(target.join("partial"), b"oops").unwrap();
                Err("network unreachable".to_string())
            })
            .await;

        assert!(matches!(result, Err(Error::FetchFailed { .. })));
        assert!(!store.path_of("Acme/M").exists());
        assert!(!store.is_cached("Acme/M").await);
    }

    #[tokio::test]
    async fn concurrent_ensure_invokes_fetch_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .ensure("Acme/M", |target| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            std::fs::write(target.join("f"), b"x").unwrap();
                            Ok(None)
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn cache_env_includes_model_path_only_when_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();

        let env = store.cache_env("Acme/M").await;
        assert!(!env.contains_key("MODEL_CACHE_PATH"));
        assert_eq!(env.get("HF_HUB_DISABLE_TELEMETRY").map(String::as_str), Some("1"));

        store
            .ensure("Acme/M", |target| async move {
                std::fs::write(target.join("f"), b"x").unwrap();
                Ok(None)
            })
            .await
            .unwrap();

        let env = store.cache_env("Acme/M").await;
        assert!(env.contains_key("MODEL_CACHE_PATH"));
    }

    #[tokio::test]
    async fn corrupt_index_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cache_index.json"), "{not valid json").unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.stats().await.count, 0);
    }
}
