//! Transforms a [`Request`] into a [`ResolvedPlan`] via the four-stage
//! pipeline in §4.4: probe & normalize, pick a target gpu_count, pick a
//! target precision, then match a recipe with fallback.
//!
//! Grounded in `ProviderSelector::select_provider` / `get_fallback_providers`'s
//! ordered-candidate-list-with-fallback shape, generalized from "pick a cloud
//! provider" to "pick a recipe".

pub mod error;
pub mod model;

pub use error::{Error, Result};
pub use model::{AutoSelected, Request, ResolvedPlan};

use aim_catalog::{Backend, Catalog, Precision, ReadinessLevel, Recipe};
use aim_gpu_probe::GpuProbe;
use tracing::{debug, info};

/// Decreasing GPU-count fallback order (§4.4, Stage 4.2).
const GPU_COUNT_FALLBACK: [u32; 4] = [8, 4, 2, 1];

/// Precision fallback order (§4.4, Stage 4.3). `int8`/`int4` deliberately
/// excluded — reachable only via an explicit request override (§9 Open Questions).
const PRECISION_FALLBACK: [Precision; 3] = [Precision::Bf16, Precision::Fp16, Precision::Fp8];

pub struct Resolver {
    catalog: Catalog,
    gpu_probe: GpuProbe,
}

impl Resolver {
    #[must_use]
    pub fn new(catalog: Catalog, gpu_probe: GpuProbe) -> Self {
        Self { catalog, gpu_probe }
    }

    pub async fn resolve(&self, request: &Request) -> Result<ResolvedPlan> {
        // Stage 1 — probe & normalize.
        let counts = self.gpu_probe.probe().await;
        let available = counts.runtime_visible;
        if available == 0 {
            return Err(Error::NoAccelerator);
        }

        // Stage 2 — target gpu_count.
        let (target_gpu_count, gpu_count_auto) = match request.gpu_count {
            Some(requested) => (requested.min(available), false),
            None => {
                let ideal = self
                    .catalog
                    .get_model(&request.model_id)
                    .ok()
                    .and_then(|m| m.size_class.ideal_gpu_count());
                match ideal {
                    Some(ideal) => (ideal.min(available), true),
                    None => (available, true),
                }
            }
        };

        // Stage 3 — target precision.
        let (target_precision, precision_auto) = match request.precision {
            Some(precision) => (precision, false),
            None => {
                let default = self
                    .catalog
                    .get_model(&request.model_id)
                    .map(|m| m.size_class.default_precision())
                    .unwrap_or(Precision::Bf16);
                (default, true)
            }
        };

        // Stage 4 — match, with fallback.
        let recipes = self.catalog.recipes_for(&request.model_id);
        let candidates = candidate_sequence(target_gpu_count, target_precision, available);

        let mut attempted = Vec::with_capacity(candidates.len());
        for (gpu_count, precision) in candidates {
            attempted.push((gpu_count, precision));
            debug!(model_id = %request.model_id, gpu_count, ?precision, "trying recipe candidate");
            if let Some(recipe) = best_match(recipes, request.backend, gpu_count, precision) {
                let backend_config = recipe
                    .backend_config(request.backend, gpu_count)
                    .expect("best_match only returns recipes with a matching backend_config")
                    .clone();

                info!(
                    model_id = %request.model_id,
                    recipe_id = %recipe.recipe_id,
                    gpu_count,
                    ?precision,
                    "recipe resolved"
                );

                return Ok(ResolvedPlan {
                    recipe_id: recipe.recipe_id.clone(),
                    model_id: request.model_id.clone(),
                    gpu_count,
                    precision,
                    backend: request.backend,
                    backend_config,
                    detected_runtime_gpus: available,
                    auto_selected: AutoSelected {
                        gpu_count: gpu_count_auto,
                        precision: precision_auto,
                    },
                    attempted,
                });
            }
        }

        Err(Error::NoRecipe {
            model_id: request.model_id.clone(),
            attempted,
        })
    }
}

/// Builds the ordered, de-duplicated (gpu_count, precision) candidate list
/// per §4.4 Stage 4's matching order.
fn candidate_sequence(target_gpu_count: u32, target_precision: Precision, available: u32) -> Vec<(u32, Precision)> {
    let mut seen = Vec::new();

    let mut push = |gpu_count: u32, precision: Precision| {
        if !seen.contains(&(gpu_count, precision)) {
            seen.push((gpu_count, precision));
        }
    };

    push(target_gpu_count, target_precision);

    for &gpu_count in GPU_COUNT_FALLBACK.iter().filter(|&&g| g <= available) {
        push(gpu_count, target_precision);
    }

    for &precision in PRECISION_FALLBACK.iter().filter(|&&p| p != target_precision) {
        for &gpu_count in GPU_COUNT_FALLBACK.iter().filter(|&&g| g <= available) {
            push(gpu_count, precision);
        }
    }

    seen
}

/// Among recipes matching `(backend, gpu_count, precision)` and enabled,
/// prefer `production-ready` over `experimental`; break remaining ties by
/// lexicographic `recipe_id` (§4.4 tie-break rule).
fn best_match(recipes: &[Recipe], backend: Backend, gpu_count: u32, precision: Precision) -> Option<&Recipe> {
    recipes
        .iter()
        .filter(|r| {
            r.precision == precision
                && r.backend_config(backend, gpu_count)
                    .is_some_and(|c| c.enabled)
        })
        .reduce(|a, b| {
            let a_ready = a.readiness_level == ReadinessLevel::ProductionReady;
            let b_ready = b.readiness_level == ReadinessLevel::ProductionReady;
            match (a_ready, b_ready) {
                (true, false) => a,
                (false, true) => b,
                _ if a.recipe_id <= b.recipe_id => a,
                _ => b,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_catalog::{BackendConfig, GpuCountKey, ModelDescriptor, SizeClass};
    use aim_gpu_probe::{GpuProbe, GpuProbeStrategy, StrategyChain};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct Fixed(u32);

    #[async_trait]
    impl GpuProbeStrategy for Fixed {
        async fn probe(&self) -> Option<u32> {
            (self.0 > 0).then_some(self.0)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn model(id: &str, size_class: SizeClass) -> ModelDescriptor {
        ModelDescriptor {
            model_id: id.to_string(),
            size_class,
            family: "qwen".into(),
            readiness_level: ReadinessLevel::ProductionReady,
        }
    }

    fn recipe(id: &str, model_id: &str, precision: Precision, gpu_count: u32, tp: u32, ready: ReadinessLevel) -> Recipe {
        let mut backends = BTreeMap::new();
        let mut by_count = BTreeMap::new();
        by_count.insert(
            GpuCountKey(gpu_count),
            BackendConfig {
                enabled: true,
                args: vec![("--tensor-parallel-size".into(), tp.to_string())],
            },
        );
        backends.insert(Backend::Vllm, by_count);
        Recipe {
            recipe_id: id.to_string(),
            model_id: model_id.to_string(),
            hardware_tag: "MI300X".into(),
            precision,
            readiness_level: ready,
            backends,
        }
    }

    fn probe_with_runtime(n: u32) -> GpuProbe {
        let runtime = StrategyChain::new("runtime", vec![Box::new(Fixed(n))]);
        GpuProbe::new(runtime, StrategyChain::new("container", vec![]), StrategyChain::new("host", vec![]))
    }

    #[tokio::test]
    async fn scenario_a_auto_selection_32b_4_gpus() {
        let catalog = Catalog::from_parts(
            vec![model("Qwen/Qwen3-32B", SizeClass::B32)],
            vec![recipe(
                "qwen3-32b-mi300x-bf16",
                "Qwen/Qwen3-32B",
                Precision::Bf16,
                4,
                4,
                ReadinessLevel::ProductionReady,
            )],
        );
        let resolver = Resolver::new(catalog, probe_with_runtime(4));
        let plan = resolver.resolve(&Request::new("Qwen/Qwen3-32B")).await.unwrap();

        assert_eq!(plan.gpu_count, 4);
        assert_eq!(plan.precision, Precision::Bf16);
        assert!(plan.auto_selected.gpu_count);
        assert!(plan.auto_selected.precision);
        assert_eq!(plan.recipe_id, "qwen3-32b-mi300x-bf16");
    }

    #[tokio::test]
    async fn scenario_b_oversubscribed_override_clamps() {
        let catalog = Catalog::from_parts(
            vec![model("Qwen/Qwen3-32B", SizeClass::B32)],
            vec![recipe(
                "qwen3-32b-mi300x-bf16",
                "Qwen/Qwen3-32B",
                Precision::Bf16,
                4,
                4,
                ReadinessLevel::ProductionReady,
            )],
        );
        let resolver = Resolver::new(catalog, probe_with_runtime(4));
        let mut request = Request::new("Qwen/Qwen3-32B");
        request.gpu_count = Some(8);
        request.precision = Some(Precision::Bf16);

        let plan = resolver.resolve(&request).await.unwrap();
        assert_eq!(plan.gpu_count, 4);
        assert!(!plan.auto_selected.gpu_count);
        assert_eq!(plan.recipe_id, "qwen3-32b-mi300x-bf16");
    }

    #[tokio::test]
    async fn scenario_c_precision_fallback_to_fp16() {
        let catalog = Catalog::from_parts(
            vec![model("Foo/Bar-7B", SizeClass::B7)],
            vec![recipe(
                "foo-bar-7b-mi300x-fp16",
                "Foo/Bar-7B",
                Precision::Fp16,
                1,
                1,
                ReadinessLevel::ProductionReady,
            )],
        );
        let resolver = Resolver::new(catalog, probe_with_runtime(1));
        let mut request = Request::new("Foo/Bar-7B");
        request.precision = Some(Precision::Fp8);

        let plan = resolver.resolve(&request).await.unwrap();
        assert_eq!(plan.precision, Precision::Fp16);
        assert_eq!(plan.attempted[0], (1, Precision::Fp8));
        assert!(plan.attempted.contains(&(1, Precision::Fp16)));
    }

    #[tokio::test]
    async fn no_accelerator_when_runtime_visible_is_zero() {
        let catalog = Catalog::from_parts(vec![], vec![]);
        let resolver = Resolver::new(catalog, probe_with_runtime(0));
        let result = resolver.resolve(&Request::new("Foo/Bar-7B")).await;
        assert!(matches!(result, Err(Error::NoAccelerator)));
    }

    #[tokio::test]
    async fn no_recipe_when_fallback_exhausted() {
        let catalog = Catalog::from_parts(vec![model("Foo/Bar-7B", SizeClass::B7)], vec![]);
        let resolver = Resolver::new(catalog, probe_with_runtime(1));
        let result = resolver.resolve(&Request::new("Foo/Bar-7B")).await;
        assert!(matches!(result, Err(Error::NoRecipe { .. })));
    }

    #[tokio::test]
    async fn tie_break_prefers_production_ready_then_recipe_id() {
        let catalog = Catalog::from_parts(
            vec![model("Foo/Bar-7B", SizeClass::B7)],
            vec![
                recipe("zzz-experimental", "Foo/Bar-7B", Precision::Fp16, 1, 1, ReadinessLevel::Experimental),
                recipe("aaa-production", "Foo/Bar-7B", Precision::Fp16, 1, 1, ReadinessLevel::ProductionReady),
                recipe("bbb-production", "Foo/Bar-7B", Precision::Fp16, 1, 1, ReadinessLevel::ProductionReady),
            ],
        );
        let resolver = Resolver::new(catalog, probe_with_runtime(1));
        let mut request = Request::new("Foo/Bar-7B");
        request.precision = Some(Precision::Fp16);
        let plan = resolver.resolve(&request).await.unwrap();
        assert_eq!(plan.recipe_id, "aaa-production");
    }

    #[test]
    fn candidate_sequence_is_deduplicated_and_ordered() {
        let seq = candidate_sequence(4, Precision::Bf16, 8);
        assert_eq!(seq[0], (4, Precision::Bf16));
        assert!(seq.iter().filter(|t| **t == (4, Precision::Bf16)).count() == 1);
        assert!(seq.contains(&(8, Precision::Bf16)));
        assert!(seq.contains(&(1, Precision::Fp16)));
    }
}
