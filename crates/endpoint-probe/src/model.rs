/// Outcome of [`crate::EndpointProbe::wait_ready`] (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Timeout,
    InstanceDied,
    Cancelled,
}

/// Outcome of a single-shot [`crate::EndpointProbe::check`] (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    Unhealthy(String),
}
