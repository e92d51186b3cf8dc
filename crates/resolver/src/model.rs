use aim_catalog::{Backend, BackendConfig, Precision};
use std::time::Duration;

/// Caller input to the resolver (§3).
#[derive(Debug, Clone)]
pub struct Request {
    pub model_id: String,
    pub gpu_count: Option<u32>,
    pub precision: Option<Precision>,
    pub backend: Backend,
    pub port: u16,
    pub use_cache: bool,
    pub readiness_timeout: Duration,
}

impl Request {
    #[must_use]
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            gpu_count: None,
            precision: None,
            backend: Backend::Vllm,
            port: 8000,
            use_cache: true,
            readiness_timeout: Duration::from_secs(600),
        }
    }
}

/// Which fields of the target were derived rather than explicitly requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoSelected {
    pub gpu_count: bool,
    pub precision: bool,
}

/// The resolver's output: a fully matched recipe plus the actual (possibly
/// fallen-back) gpu_count/precision (§3, §4.4).
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub recipe_id: String,
    pub model_id: String,
    pub gpu_count: u32,
    pub precision: Precision,
    pub backend: Backend,
    pub backend_config: BackendConfig,
    pub detected_runtime_gpus: u32,
    pub auto_selected: AutoSelected,
    /// Ordered (gpu_count, precision) tuples tried before the match (or all
    /// attempted, on failure) — surfaced for diagnostics (SPEC_FULL.md §3).
    pub attempted: Vec<(u32, Precision)>,
}
