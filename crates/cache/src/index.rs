use crate::model::CacheEntry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const INDEX_FILE_NAME: &str = "cache_index.json";

/// In-memory mirror of `cache_index.json`, keyed by `model_id`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Index(HashMap<String, CacheEntry>);

impl Index {
    /// Load the index from `root/cache_index.json`. A missing or corrupt file is
    /// treated as an empty store (§6: "a reader seeing a corrupt file must treat
    /// the store as empty and proceed").
    pub fn load(root: &Path) -> Self {
        let path = index_path(root);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(index) => index,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt cache index, treating store as empty");
                Self::default()
            }
        }
    }

    /// Persist the index with write-temp-then-rename so a reader never observes
    /// a partial write.
    pub fn save(&self, root: &Path) -> crate::error::Result<()> {
        let path = index_path(root);
        let tmp_path = path.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(self).expect("Index serialization is infallible");

        std::fs::write(&tmp_path, &serialized).map_err(|source| crate::error::Error::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| crate::error::Error::Io { path, source })?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&CacheEntry> {
        self.0.get(model_id)
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.0.insert(entry.model_id.clone(), entry);
    }

    pub fn remove(&mut self, model_id: &str) -> Option<CacheEntry> {
        self.0.remove(model_id)
    }

    pub fn values(&self) -> impl Iterator<Item = &CacheEntry> {
        self.0.values()
    }
}

#[must_use]
pub fn index_path(root: &Path) -> PathBuf {
    root.join(INDEX_FILE_NAME)
}
