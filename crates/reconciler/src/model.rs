use aim_catalog::Precision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the Reconciler should pick a recipe for an `EndpointSpec` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSelector {
    pub auto_select: bool,
    #[serde(default)]
    pub gpu_count: Option<u32>,
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default)]
    pub recipe_id: Option<String>,
}

impl Default for RecipeSelector {
    fn default() -> Self {
        Self {
            auto_select: true,
            gpu_count: None,
            precision: None,
            recipe_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Caller-visible desired state (§3). Reconciled against observed Supervisor
/// state until `status.ready_replicas == replicas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub model_id: String,
    #[serde(default)]
    pub recipe_selector: RecipeSelector,
    pub replicas: u32,
    pub port: u16,
    #[serde(default)]
    pub resource_overrides: Option<ResourceOverrides>,
    #[serde(default)]
    pub cache_policy: CachePolicy,
}

/// ADDED: the knobs a spec can override beyond what `recipe_selector` covers —
/// the backend and readiness patience, both inputs `aim_resolver::Request`
/// otherwise defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOverrides {
    #[serde(default)]
    pub backend: Option<aim_catalog::Backend>,
    #[serde(default)]
    pub readiness_timeout_secs: Option<u64>,
}

/// One typed, timestamped predicate in an `EndpointStatus` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: String,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointPhase {
    Pending,
    Progressing,
    Ready,
    Degraded,
}

/// The Reconciler's report on one `EndpointSpec` (§3). `generation` only
/// increments on a real state change (§4.8 idempotence invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub phase: EndpointPhase,
    #[serde(default)]
    pub resolved_recipe_id: Option<String>,
    pub ready_replicas: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub endpoint_urls: Vec<String>,
    pub generation: u64,
    pub observed_generation: u64,
}

impl Default for EndpointStatus {
    fn default() -> Self {
        Self {
            phase: EndpointPhase::Pending,
            resolved_recipe_id: None,
            ready_replicas: 0,
            conditions: Vec::new(),
            endpoint_urls: Vec::new(),
            generation: 0,
            observed_generation: 0,
        }
    }
}

impl EndpointStatus {
    /// Append (or refresh) a condition, without touching `generation` —
    /// callers that want a real state change bump it explicitly.
    pub fn set_condition(&mut self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.kind == kind) {
            // Leave `observed_at` untouched when nothing actually changed, so a
            // no-op reconcile stays a no-op for the generation check (§4.8).
            if existing.message != message {
                existing.message = message;
                existing.observed_at = Utc::now();
            }
        } else {
            self.conditions.push(Condition {
                kind: kind.to_string(),
                message,
                observed_at: Utc::now(),
            });
        }
    }
}
