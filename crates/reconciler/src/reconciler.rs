use crate::error::{Error, Result};
use crate::model::{EndpointPhase, EndpointSpec, EndpointStatus};
use crate::store::ResourceStore;
use aim_cache::CacheStore;
use aim_endpoint_probe::{EndpointProbe, WaitOutcome};
use aim_materializer::materialize;
use aim_resolver::{Request, Resolver};
use aim_supervisor::{Phase, Supervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Grace period for stop-to-drain (§5 default).
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(600);

/// Drives one `EndpointSpec` toward its desired state, generalizing the
/// teacher's per-target event-driven reconcile loop (`executor/event_handler.rs`)
/// from "blockchain service-request events" to "declarative EndpointSpec diffing".
pub struct Reconciler {
    pub resolver: Arc<Resolver>,
    pub cache: Arc<CacheStore>,
    pub supervisor: Arc<Supervisor>,
    pub probe: Arc<EndpointProbe>,
    pub store: Arc<dyn ResourceStore>,
}

impl Reconciler {
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, cache: Arc<CacheStore>, supervisor: Arc<Supervisor>, probe: Arc<EndpointProbe>, store: Arc<dyn ResourceStore>) -> Self {
        Self { resolver, cache, supervisor, probe, store }
    }

    /// One reconcile step for `name` (§4.8). Returns `Ok(())` whether or not a
    /// condition was set — conditions are the Reconciler's vocabulary for
    /// recoverable failure, not `Err`. `Err` only for store-level problems the
    /// caller must react to (missing spec, status conflict).
    pub async fn reconcile_once(&self, name: &str) -> Result<()> {
        let Some((spec, mut status)) = self.store.get(name).await else {
            return Err(Error::NotFound(name.to_string()));
        };
        let expected_generation = status.generation;

        let request = build_request(&spec);

        // Step 2: ensure the model is cached, if the spec asks for it.
        if spec.cache_policy.enabled {
            if let Err(err) = self.cache.ensure(&spec.model_id, |dir| crate::fetcher::huggingface_fetch(&spec.model_id, dir)).await {
                status.set_condition("CacheFailed", err.to_string());
                status.phase = EndpointPhase::Degraded;
                self.write_status(name, expected_generation, status).await?;
                return Ok(());
            }
        }

        // Step 3: resolve a recipe.
        let plan = match self.resolver.resolve(&request).await {
            Ok(plan) => plan,
            Err(err) => {
                let kind = match &err {
                    aim_resolver::Error::NoAccelerator => "NoAccelerator",
                    aim_resolver::Error::NoRecipe { .. } => "NoRecipe",
                };
                status.set_condition(kind, err.to_string());
                status.phase = EndpointPhase::Degraded;
                self.write_status(name, expected_generation, status).await?;
                return Ok(());
            }
        };
        status.resolved_recipe_id = Some(plan.recipe_id.clone());

        // Step 4: materialize the launch spec; its identity is what the
        // supervisor indexes instances by.
        let launch_spec = materialize(&plan, &request, &self.cache).await;
        let identity = launch_spec.identity.clone();

        // Step 1 (performed here since identity is only known post-resolve):
        // snapshot current instances for this identity.
        let mut instances: Vec<_> = self.supervisor.list().await.into_iter().filter(|i| i.identity == identity).collect();

        // A Failed instance is not terminal (only Terminated is, §4.6) and
        // would otherwise block this identity from ever being relaunched.
        // Reap it now so the diff below sees an accurate, launchable count.
        for instance in instances.iter().filter(|i| i.phase == Phase::Failed) {
            self.supervisor.stop(&instance.identity, STOP_GRACE_PERIOD).await?;
        }
        instances.retain(|i| i.phase != Phase::Failed);
        instances.sort_by_key(|i| i.started_at);

        let ready_count = instances.iter().filter(|i| i.phase == Phase::Ready).count() as u32;
        let starting_exists = instances.iter().any(|i| i.phase == Phase::Starting);

        // Step 5: diff desired replicas against observed instances.
        if ready_count < spec.replicas && !starting_exists {
            match self.supervisor.launch(&launch_spec).await {
                Ok(instance) => instances.push(instance),
                Err(aim_supervisor::Error::AlreadyExists(_)) => {}
                Err(err) => {
                    status.set_condition("LaunchFailed", err.to_string());
                    status.phase = EndpointPhase::Degraded;
                    self.write_status(name, expected_generation, status).await?;
                    return Ok(());
                }
            }
        } else if (instances.len() as u32) > spec.replicas {
            let excess = instances.len() as u32 - spec.replicas;
            // Newest-first: instances are sorted oldest-first, so drain from the tail.
            for instance in instances.iter().rev().take(excess as usize) {
                self.supervisor.stop(&instance.identity, STOP_GRACE_PERIOD).await?;
            }
        }

        // Step 6: wait for every currently-Starting instance to become Ready.
        let readiness_timeout = spec
            .resource_overrides
            .and_then(|o| o.readiness_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_READINESS_TIMEOUT);

        for instance in instances.iter().filter(|i| i.phase == Phase::Starting) {
            let (_tx, cancel_rx) = watch::channel(false);
            let supervisor = self.supervisor.clone();
            let watched_identity = instance.identity.clone();
            let outcome = self
                .probe
                .wait_ready(
                    &instance.endpoint_url,
                    readiness_timeout,
                    || {
                        let supervisor = supervisor.clone();
                        let identity = watched_identity.clone();
                        async move { !matches!(supervisor.status(&identity).await, Ok(s) if s.phase.is_terminal()) }
                    },
                    cancel_rx,
                )
                .await;

            match outcome {
                WaitOutcome::Ready => {
                    self.supervisor.mark_ready(&instance.identity).await?;
                    info!(name, identity = %instance.identity, "instance ready");
                }
                WaitOutcome::Timeout => {
                    self.supervisor.mark_failed(&instance.identity, "ReadinessTimeout".to_string()).await?;
                    self.supervisor.stop(&instance.identity, STOP_GRACE_PERIOD).await?;
                    status.set_condition("LaunchFailed", "ReadinessTimeout");
                    status.phase = EndpointPhase::Degraded;
                    warn!(name, identity = %instance.identity, "readiness timed out");
                }
                WaitOutcome::InstanceDied => {
                    self.supervisor.stop(&instance.identity, STOP_GRACE_PERIOD).await?;
                    status.set_condition("LaunchFailed", "InstanceDied");
                    status.phase = EndpointPhase::Degraded;
                    warn!(name, identity = %instance.identity, "instance died before becoming ready");
                }
                WaitOutcome::Cancelled => {}
            }
        }

        // Re-read live Supervisor state rather than accumulating onto the
        // stored status (§4.8 step 1): `ready_replicas`/`endpoint_urls` must
        // reflect what's actually Ready right now, including instances this
        // reconcile stopped or marked failed above.
        let live_instances = self.supervisor.list().await.into_iter().filter(|i| i.identity == identity);
        let ready_instances: Vec<_> = live_instances.filter(|i| i.phase == Phase::Ready).collect();
        status.ready_replicas = ready_instances.len() as u32;
        status.endpoint_urls = ready_instances.into_iter().map(|i| i.endpoint_url).collect();

        if status.ready_replicas >= spec.replicas && spec.replicas > 0 {
            status.phase = EndpointPhase::Ready;
        } else if status.phase != EndpointPhase::Degraded {
            status.phase = EndpointPhase::Progressing;
        }

        // Step 7: write status atomically; a conflict is requeued immediately
        // by the caller (the per-spec work queue), not retried here.
        self.write_status(name, expected_generation, status).await
    }

    async fn write_status(&self, name: &str, expected_generation: u64, status: EndpointStatus) -> Result<()> {
        self.store.update_status(name, expected_generation, status).await.map(|_| ())
    }
}

fn build_request(spec: &EndpointSpec) -> Request {
    let mut request = Request::new(spec.model_id.clone());
    request.port = spec.port;
    request.use_cache = spec.cache_policy.enabled;

    if !spec.recipe_selector.auto_select {
        request.gpu_count = spec.recipe_selector.gpu_count;
        request.precision = spec.recipe_selector.precision;
    }

    if let Some(overrides) = spec.resource_overrides {
        if let Some(backend) = overrides.backend {
            request.backend = backend;
        }
        if let Some(secs) = overrides.readiness_timeout_secs {
            request.readiness_timeout = Duration::from_secs(secs);
        }
    }

    request
}
