use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One model's entry in the cache index (§3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub model_id: String,
    pub cached: bool,
    pub cache_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub size: u64,
}

/// A read-only bind mount exposed to the serving process (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Aggregate cache occupancy, as returned by [`crate::CacheStore::stats`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
    pub entries: Vec<CacheEntry>,
}
