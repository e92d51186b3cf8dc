//! Pure translation of a [`ResolvedPlan`] into a [`LaunchSpec`] (§4.5).
//!
//! Argv and environment rendering follow an ordered-`Vec`-construction
//! discipline (never an unordered map walk) so output is byte-identical for
//! the same inputs, matching `BlueprintArgs::encode` / `BlueprintEnvVars::encode`.

pub mod model;

pub use model::{LaunchSpec, Mount, PortBinding};

use aim_cache::CacheStore;
use aim_catalog::Backend;
use aim_resolver::{Request, ResolvedPlan};
use std::collections::HashMap;

const PORT_ARG_KEY: &str = "--port";

fn base_command(backend: Backend) -> Vec<String> {
    match backend {
        Backend::Vllm => vec![
            "python3".to_string(),
            "-m".to_string(),
            "vllm.entrypoints.openai.api_server".to_string(),
        ],
        Backend::Sglang => vec!["python3".to_string(), "-m".to_string(), "sglang.launch_server".to_string()],
    }
}

fn slug(model_id: &str) -> String {
    model_id.to_lowercase().replace('/', "-")
}

/// Render `backend_config.args` as `--key value` tokens, ensuring the port
/// argument reflects `request.port` (the request's port always takes
/// precedence over any catalog default, §4.5).
fn render_args(plan: &ResolvedPlan, request: &Request) -> Vec<String> {
    let mut tokens = Vec::with_capacity(plan.backend_config.args.len() * 2 + 2);
    let mut saw_port = false;

    for (key, value) in &plan.backend_config.args {
        tokens.push(key.clone());
        if key == PORT_ARG_KEY {
            saw_port = true;
            tokens.push(request.port.to_string());
        } else {
            tokens.push(value.clone());
        }
    }

    if !saw_port {
        tokens.push(PORT_ARG_KEY.to_string());
        tokens.push(request.port.to_string());
    }

    tokens
}

fn hardware_environment(gpu_count: u32) -> HashMap<String, String> {
    let visible = (0..gpu_count).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
    HashMap::from([
        ("AIM_RUNTIME_ENABLED".to_string(), "1".to_string()),
        ("HIP_VISIBLE_DEVICES".to_string(), visible.clone()),
        ("ROCR_VISIBLE_DEVICES".to_string(), visible.clone()),
        ("CUDA_VISIBLE_DEVICES".to_string(), visible),
    ])
}

/// Build a [`LaunchSpec`] from a resolved plan, the originating request, and
/// the cache store (for environment/mount bindings, §4.3). Pure given a
/// stable cache index: identical inputs yield byte-identical output.
pub async fn materialize(plan: &ResolvedPlan, request: &Request, cache: &CacheStore) -> LaunchSpec {
    let mut environment = hardware_environment(plan.gpu_count);
    if request.use_cache {
        environment.extend(cache.cache_env(&plan.model_id).await);
    }

    let mounts = if request.use_cache {
        cache.cache_mounts(&plan.model_id).await.into_iter().map(Mount::from).collect()
    } else {
        Vec::new()
    };

    let mut command = base_command(plan.backend);
    command.extend(render_args(plan, request));

    LaunchSpec {
        command,
        environment,
        mounts,
        port_bindings: vec![PortBinding {
            host_port: request.port,
            container_port: request.port,
        }],
        device_assignments: (0..plan.gpu_count).collect(),
        identity: format!("aim-{}-{}gpu-{}-{}", slug(&plan.model_id), plan.gpu_count, plan.precision, plan.backend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_catalog::{BackendConfig, Precision};
    use aim_resolver::AutoSelected;

    fn plan() -> ResolvedPlan {
        ResolvedPlan {
            recipe_id: "qwen3-32b-mi300x-bf16".into(),
            model_id: "Qwen/Qwen3-32B".into(),
            gpu_count: 4,
            precision: Precision::Bf16,
            backend: Backend::Vllm,
            backend_config: BackendConfig {
                enabled: true,
                args: vec![("--tensor-parallel-size".into(), "4".into())],
            },
            detected_runtime_gpus: 4,
            auto_selected: AutoSelected { gpu_count: true, precision: true },
            attempted: vec![(4, Precision::Bf16)],
        }
    }

    #[tokio::test]
    async fn identity_matches_scenario_a() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path()).unwrap();
        let request = Request::new("Qwen/Qwen3-32B");
        let spec = materialize(&plan(), &request, &cache).await;
        assert_eq!(spec.identity, "aim-qwen-qwen3-32b-4gpu-bf16-vllm");
    }

    #[tokio::test]
    async fn request_port_overrides_catalog_port_arg() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path()).unwrap();
        let mut catalog_plan = plan();
        catalog_plan.backend_config.args.push(("--port".into(), "9999".into()));
        let mut request = Request::new("Qwen/Qwen3-32B");
        request.port = 8123;

        let spec = materialize(&catalog_plan, &request, &cache).await;
        let port_idx = spec.command.iter().position(|t| t == "--port").unwrap();
        assert_eq!(spec.command[port_idx + 1], "8123");
        assert_eq!(spec.port_bindings[0].host_port, 8123);
    }

    #[tokio::test]
    async fn materialize_is_pure_given_stable_cache_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path()).unwrap();
        let request = Request::new("Qwen/Qwen3-32B");
        let a = materialize(&plan(), &request, &cache).await;
        let b = materialize(&plan(), &request, &cache).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn device_assignments_cover_zero_to_gpu_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path()).unwrap();
        let request = Request::new("Qwen/Qwen3-32B");
        let spec = materialize(&plan(), &request, &cache).await;
        assert_eq!(spec.device_assignments, vec![0, 1, 2, 3]);
        assert_eq!(spec.environment.get("CUDA_VISIBLE_DEVICES"), Some(&"0,1,2,3".to_string()));
    }
}
