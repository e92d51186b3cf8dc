//! One-shot `aim-manager deploy`: resolve a single model, launch it, block
//! until ready (or fail with the exit code mandated by §6), then keep serving
//! until interrupted.

use crate::config::{Cli, DeployArgs};
use crate::error::{Error, Result};
use aim_cache::CacheStore;
use aim_catalog::Catalog;
use aim_gpu_probe::GpuProbe;
use aim_materializer::materialize;
use aim_resolver::{Request, Resolver};
use aim_supervisor::Supervisor;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

pub async fn run(cli: &Cli, args: &DeployArgs) -> Result<()> {
    let catalog = Catalog::load(&cli.catalog_dir)?;
    let gpu_probe = GpuProbe::with_default_strategies();
    let resolver = Resolver::new(catalog, gpu_probe);
    let cache = CacheStore::open(&cli.cache_dir).map_err(Error::CacheFailed)?;
    let supervisor = Supervisor::new();
    let probe = aim_endpoint_probe::EndpointProbe::new();

    let mut request = Request::new(args.model_id.clone());
    request.port = args.port;
    request.use_cache = !args.no_cache;
    request.gpu_count = args.gpu_count;
    request.precision = args.precision;
    request.backend = args.backend;
    request.readiness_timeout = Duration::from_secs(args.readiness_timeout_secs);

    if request.use_cache {
        cache
            .ensure(&request.model_id, |dir| aim_reconciler::fetcher::huggingface_fetch(&request.model_id, dir))
            .await
            .map_err(Error::CacheFailed)?;
    }

    let plan = match resolver.resolve(&request).await {
        Ok(plan) => plan,
        Err(aim_resolver::Error::NoAccelerator) => return Err(Error::NoAccelerator),
        Err(aim_resolver::Error::NoRecipe { model_id, attempted }) => {
            return Err(Error::NoRecipe(format!("{model_id} (tried {attempted:?})")));
        }
    };

    info!(recipe_id = %plan.recipe_id, gpu_count = plan.gpu_count, precision = %plan.precision, "recipe resolved");

    let launch_spec = materialize(&plan, &request, &cache).await;
    let identity = launch_spec.identity.clone();
    let instance = supervisor.launch(&launch_spec).await.map_err(Error::Launch)?;

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let supervisor_for_alive = supervisor.clone();
    let alive_identity = identity.clone();
    let outcome = probe
        .wait_ready(
            &instance.endpoint_url,
            request.readiness_timeout,
            || {
                let supervisor = supervisor_for_alive.clone();
                let identity = alive_identity.clone();
                async move { !matches!(supervisor.status(&identity).await, Ok(s) if s.phase.is_terminal()) }
            },
            cancel_rx,
        )
        .await;

    match outcome {
        aim_endpoint_probe::WaitOutcome::Ready => {
            supervisor.mark_ready(&identity).await.map_err(Error::Launch)?;
        }
        aim_endpoint_probe::WaitOutcome::Timeout | aim_endpoint_probe::WaitOutcome::InstanceDied | aim_endpoint_probe::WaitOutcome::Cancelled => {
            let _ = supervisor.stop(&identity, STOP_GRACE_PERIOD).await;
            return Err(Error::ReadinessTimeout);
        }
    }

    info!(endpoint_url = %instance.endpoint_url, "endpoint ready, serving until interrupted");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping instance");
    supervisor.stop(&identity, STOP_GRACE_PERIOD).await.map_err(Error::Launch)?;
    Ok(())
}
