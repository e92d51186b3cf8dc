//! Polls an HTTP endpoint for readiness with bounded patience (§4.7).
//!
//! Grounded in `blueprint-qos`'s heartbeat polling loop shape
//! (`HeartbeatService`, a fixed-interval loop with cancellation), generalized
//! from "send a heartbeat" to "poll a readiness URL".

pub mod model;

pub use model::{CheckOutcome, WaitOutcome};

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Fixed poll interval mandated by §4.7.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-request timeout ceiling mandated by §4.7.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EndpointProbe {
    client: reqwest::Client,
}

impl EndpointProbe {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout is infallible to build");
        Self { client }
    }

    /// Poll `url` every [`POLL_INTERVAL`] until it answers 2xx, `timeout`
    /// elapses, the instance dies, or the caller cancels.
    ///
    /// `instance_alive` is re-checked every iteration; a `false` short-circuits
    /// to [`WaitOutcome::InstanceDied`] (§4.7). `cancel` is a `watch` receiver
    /// flipped to `true` by the caller to abort at the next poll boundary.
    pub async fn wait_ready<F, Fut>(&self, url: &str, timeout: Duration, mut instance_alive: F, mut cancel: watch::Receiver<bool>) -> WaitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            if *cancel.borrow() {
                return WaitOutcome::Cancelled;
            }
            if !instance_alive().await {
                return WaitOutcome::InstanceDied;
            }

            match self.check(url).await {
                CheckOutcome::Healthy => return WaitOutcome::Ready,
                CheckOutcome::Unhealthy(reason) => debug!(url, reason, "endpoint not ready yet"),
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Timeout;
            }

            let sleep = tokio::time::sleep(POLL_INTERVAL.min(deadline - now));
            tokio::pin!(sleep);
            tokio::select! {
                () = &mut sleep => {}
                changed = cancel.changed() => {
                    if changed.is_ok() && *cancel.borrow() {
                        return WaitOutcome::Cancelled;
                    }
                }
            }
        }
    }

    /// Single-shot readiness check: success is any HTTP 2xx response.
    pub async fn check(&self, url: &str) -> CheckOutcome {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => CheckOutcome::Healthy,
            Ok(response) => CheckOutcome::Unhealthy(format!("status {}", response.status())),
            Err(err) => CheckOutcome::Unhealthy(err.to_string()),
        }
    }
}

impl Default for EndpointProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn always_alive() -> impl FnMut() -> std::future::Ready<bool> {
        || std::future::ready(true)
    }

    #[tokio::test]
    async fn wait_ready_succeeds_on_first_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = EndpointProbe::new();
        let (_tx, rx) = watch::channel(false);
        let outcome = probe
            .wait_ready(&format!("{}/health", server.uri()), Duration::from_secs(5), always_alive(), rx)
            .await;
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn wait_ready_times_out_when_never_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = EndpointProbe::new();
        let (_tx, rx) = watch::channel(false);
        let outcome = probe
            .wait_ready(&format!("{}/health", server.uri()), Duration::from_millis(200), always_alive(), rx)
            .await;
        assert_eq!(outcome, WaitOutcome::Timeout);
    }

    #[tokio::test]
    async fn wait_ready_short_circuits_on_instance_death() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = EndpointProbe::new();
        let (_tx, rx) = watch::channel(false);
        let outcome = probe
            .wait_ready(&format!("{}/health", server.uri()), Duration::from_secs(30), || std::future::ready(false), rx)
            .await;
        assert_eq!(outcome, WaitOutcome::InstanceDied);
    }

    #[tokio::test]
    async fn wait_ready_honors_cancellation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = EndpointProbe::new();
        let (tx, rx) = watch::channel(false);
        let url = format!("{}/health", server.uri());

        let handle = tokio::spawn(async move { probe.wait_ready(&url, Duration::from_secs(30), always_alive(), rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn check_reports_unhealthy_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let probe = EndpointProbe::new();
        let outcome = probe.check(&format!("{}/health", server.uri())).await;
        assert!(matches!(outcome, CheckOutcome::Unhealthy(_)));
    }
}
