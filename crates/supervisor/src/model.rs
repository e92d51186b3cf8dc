use chrono::{DateTime, Utc};

/// §4.6 phase diagram. Only `Terminated` is terminal in the Kubernetes sense —
/// `Ready` and `Failed` can both still transition to `Terminating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Starting,
    Ready,
    Failed,
    Terminating,
    Terminated,
}

impl Phase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// An observed runtime instance, owned exclusively by the Supervisor (§3).
#[derive(Debug, Clone)]
pub struct EndpointInstance {
    pub identity: String,
    pub endpoint_url: String,
    pub phase: Phase,
    pub pid: Option<u32>,
    /// Launch time, used by the Reconciler to pick a newest-first stop order
    /// during scale-down (§8, scenario F).
    pub started_at: DateTime<Utc>,
    pub last_health_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}
