//! `aim-manager serve`: runs the declarative reconciler daemon, optionally
//! seeded from a directory of `EndpointSpec` documents, behind an HTTP
//! control surface (SPEC_FULL.md §6).

use crate::config::{Cli, ServeArgs};
use crate::error::{Error, Result};
use aim_cache::CacheStore;
use aim_catalog::Catalog;
use aim_endpoint_probe::EndpointProbe;
use aim_gpu_probe::GpuProbe;
use aim_reconciler::{Controller, EndpointSpec, InMemoryResourceStore, ResourceStore};
use aim_resolver::Resolver;
use aim_supervisor::Supervisor;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let catalog = Catalog::load(&cli.catalog_dir)?;
    let gpu_probe = GpuProbe::with_default_strategies();
    let resolver = Resolver::new(catalog, gpu_probe);
    let cache = CacheStore::open(&cli.cache_dir).map_err(Error::CacheFailed)?;
    let supervisor = Supervisor::new();
    let probe = EndpointProbe::new();
    let store: Arc<dyn ResourceStore> = Arc::new(InMemoryResourceStore::new());

    let controller = Arc::new(Controller::new(resolver, cache, supervisor, probe, store));

    if let Some(specs_dir) = &args.specs_dir {
        for spec in load_specs(specs_dir)? {
            info!(name = %spec.name, "loaded endpoint spec");
            controller.upsert_spec(spec).await;
        }
    }

    let controller_for_signal = controller.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        for (spec, _) in controller_for_signal.list().await {
            controller_for_signal.remove_spec(&spec.name).await;
        }
        std::process::exit(0);
    });

    controller.serve(args.listen_addr).await.map_err(Error::Io)
}

fn load_specs(dir: &Path) -> Result<Vec<EndpointSpec>> {
    let mut specs = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Config { path: dir.to_path_buf(), source })?;

    for entry in entries {
        let entry = entry.map_err(|source| Error::Config { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| Error::Config { path: path.clone(), source })?;
        let spec = match ext {
            "toml" => toml::from_str::<EndpointSpec>(&contents).map_err(|source| Error::ConfigParse { path: path.clone(), source })?,
            "json" => match serde_json::from_str::<EndpointSpec>(&contents) {
                Ok(spec) => spec,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping malformed endpoint spec");
                    continue;
                }
            },
            _ => continue,
        };
        specs.push(spec);
    }

    Ok(specs)
}
