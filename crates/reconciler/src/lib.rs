//! Declarative controller: wires the [`Reconciler`] algorithm to a per-spec
//! work queue with exponential backoff, and exposes the resource store over
//! an optional `axum` HTTP surface (SPEC_FULL.md §6).
//!
//! The per-spec task layout generalizes the teacher's per-service-instance
//! task tracking (`executor`'s instance-keyed `JoinHandle` map): one
//! perpetually-running task per `EndpointSpec` name, cancelled when the spec
//! is removed.

pub mod backoff;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod model;
pub mod reconciler;
pub mod store;

pub use backoff::Backoff;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use model::{CachePolicy, Condition, EndpointPhase, EndpointSpec, EndpointStatus, RecipeSelector, ResourceOverrides};
pub use reconciler::Reconciler;
pub use store::{InMemoryResourceStore, ResourceStore};

use aim_cache::CacheStore;
use aim_endpoint_probe::EndpointProbe;
use aim_resolver::Resolver;
use aim_supervisor::Supervisor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Steady-state poll interval once a spec is Ready (drift detection, not
/// error recovery — error recovery uses `Backoff`).
const STEADY_STATE_INTERVAL: Duration = Duration::from_secs(30);

struct SpecTask {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

/// Owns the resource store, the reconcile algorithm, and one background task
/// per `EndpointSpec`.
pub struct Controller {
    store: Arc<dyn ResourceStore>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    tasks: Arc<Mutex<HashMap<String, SpecTask>>>,
}

impl Controller {
    #[must_use]
    pub fn new(resolver: Resolver, cache: CacheStore, supervisor: Supervisor, probe: EndpointProbe, store: Arc<dyn ResourceStore>) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(resolver),
            Arc::new(cache),
            Arc::new(supervisor),
            Arc::new(probe),
            store.clone(),
        ));
        Self { store, reconciler, metrics: Arc::new(Metrics::new()), tasks: Arc::new(Mutex::new(HashMap::new())) }
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Register (or replace) a spec and make sure its reconcile loop is running.
    pub async fn upsert_spec(&self, spec: EndpointSpec) {
        let name = spec.name.clone();
        self.store.put_spec(spec).await;

        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&name) {
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let reconciler = self.reconciler.clone();
        let metrics = self.metrics.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(run_spec_loop(task_name, reconciler, metrics, cancel_rx));
        tasks.insert(name, SpecTask { handle, cancel: cancel_tx });
    }

    /// Remove a spec and cancel its reconcile loop.
    pub async fn remove_spec(&self, name: &str) {
        self.store.remove(name).await;
        if let Some(task) = self.tasks.lock().await.remove(name) {
            let _ = task.cancel.send(true);
            task.handle.abort();
        }
    }

    pub async fn get(&self, name: &str) -> Option<(EndpointSpec, EndpointStatus)> {
        self.store.get(name).await
    }

    pub async fn list(&self) -> Vec<(EndpointSpec, EndpointStatus)> {
        self.store.list().await
    }

    /// Bind an `axum` HTTP surface over this controller's resource store and
    /// metrics registry, and serve it until the process exits.
    pub async fn serve(self: Arc<Self>, addr: std::net::SocketAddr) -> std::io::Result<()> {
        let app = http::router(self);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "reconciler http surface listening");
        axum::serve(listener, app).await
    }
}

async fn run_spec_loop(name: String, reconciler: Arc<Reconciler>, metrics: Arc<Metrics>, mut cancel: watch::Receiver<bool>) {
    let mut backoff = Backoff::new();

    loop {
        if *cancel.borrow() {
            return;
        }

        let outcome = reconciler.reconcile_once(&name).await;
        let delay = match &outcome {
            Ok(()) => {
                metrics.record_reconcile(&name, "ok");
                backoff.reset();
                STEADY_STATE_INTERVAL
            }
            Err(Error::StatusConflict(_)) => {
                metrics.record_reconcile(&name, "conflict");
                Duration::ZERO
            }
            Err(err) => {
                metrics.record_reconcile(&name, "error");
                warn!(name, error = %err, "reconcile failed, requeuing with backoff");
                backoff.next()
            }
        };

        if delay.is_zero() {
            continue;
        }

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

mod http {
    use super::Controller;
    use crate::model::EndpointSpec;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use prometheus::{Encoder, TextEncoder};
    use std::sync::Arc;

    pub(super) fn router(controller: Arc<Controller>) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/endpoints", get(list_endpoints))
            .route("/endpoints/{name}", get(get_endpoint).put(put_endpoint))
            .route("/endpoints/{name}/status", get(get_status))
            .route("/metrics", get(metrics_handler))
            .with_state(controller)
    }

    async fn healthz() -> &'static str {
        "ok"
    }

    async fn list_endpoints(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
        Json(controller.list().await)
    }

    async fn get_endpoint(State(controller): State<Arc<Controller>>, Path(name): Path<String>) -> Response {
        match controller.get(&name).await {
            Some(entry) => Json(entry).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn get_status(State(controller): State<Arc<Controller>>, Path(name): Path<String>) -> Response {
        match controller.get(&name).await {
            Some((_, status)) => Json(status).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    /// Optimistic-concurrency write: an `If-Match: <generation>` header must
    /// match the stored generation, or the write is rejected with 409 (§6).
    async fn put_endpoint(
        State(controller): State<Arc<Controller>>,
        Path(name): Path<String>,
        headers: HeaderMap,
        Json(spec): Json<EndpointSpec>,
    ) -> Response {
        if spec.name != name {
            return (StatusCode::BAD_REQUEST, "path name and body name must match").into_response();
        }

        if let Some(existing) = controller.get(&name).await {
            let if_match = headers.get("If-Match").and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<u64>().ok());
            match if_match {
                Some(expected) if expected == existing.1.generation => {}
                Some(_) => return StatusCode::CONFLICT.into_response(),
                None => return (StatusCode::PRECONDITION_REQUIRED, "If-Match header required to update an existing endpoint").into_response(),
            }
        }

        controller.upsert_spec(spec).await;
        StatusCode::OK.into_response()
    }

    async fn metrics_handler(State(controller): State<Arc<Controller>>) -> Response {
        let encoder = TextEncoder::new();
        let metric_families = controller.metrics().registry.gather();
        let mut buffer = Vec::new();
        match encoder.encode(&metric_families, &mut buffer) {
            Ok(()) => (StatusCode::OK, buffer).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_catalog::Catalog;
    use aim_gpu_probe::{GpuProbe, StrategyChain};
    use async_trait::async_trait;

    struct AlwaysOne;
    #[async_trait]
    impl aim_gpu_probe::GpuProbeStrategy for AlwaysOne {
        async fn probe(&self) -> Option<u32> {
            Some(1)
        }
        fn name(&self) -> &str {
            "always-one"
        }
    }

    fn test_controller() -> Controller {
        let catalog = Catalog::from_parts(Vec::new(), Vec::new());
        let gpu_probe = GpuProbe::new(
            StrategyChain::new("runtime", vec![Box::new(AlwaysOne)]),
            StrategyChain::new("container", vec![]),
            StrategyChain::new("host", vec![]),
        );
        let resolver = Resolver::new(catalog, gpu_probe);
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path()).unwrap();
        let supervisor = Supervisor::new();
        let probe = EndpointProbe::new();
        let store: Arc<dyn ResourceStore> = Arc::new(InMemoryResourceStore::new());
        Controller::new(resolver, cache, supervisor, probe, store)
    }

    #[tokio::test]
    async fn upsert_then_remove_spec_manages_its_own_task() {
        let controller = test_controller();
        let spec = EndpointSpec {
            name: "demo".to_string(),
            model_id: "Acme/NoSuchModel".to_string(),
            recipe_selector: RecipeSelector::default(),
            replicas: 1,
            port: 8000,
            resource_overrides: None,
            cache_policy: CachePolicy { enabled: false },
        };
        controller.upsert_spec(spec).await;
        assert!(controller.get("demo").await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        // NoRecipe (empty catalog) keeps it Degraded, but reconciling at all
        // without panicking is the property under test here.
        let (_, status) = controller.get("demo").await.unwrap();
        assert_eq!(status.phase, EndpointPhase::Degraded);

        controller.remove_spec("demo").await;
        assert!(controller.get("demo").await.is_none());
    }
}
