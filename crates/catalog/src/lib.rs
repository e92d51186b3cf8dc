//! Read-only access to model metadata and recipe entries.
//!
//! The catalog is loaded once at startup (see [`Catalog::load`]) and indexed so
//! that [`Catalog::recipes_for`] is a map lookup, never a scan of the full recipe set.

pub mod error;
pub mod loader;
pub mod model;

pub use error::{Error, Result};
pub use model::{Backend, BackendConfig, GpuCountKey, ModelDescriptor, Precision, ReadinessLevel, Recipe, SizeClass};

use std::collections::HashMap;
use std::path::Path;

/// An immutable, process-wide snapshot of the model/recipe catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: HashMap<String, ModelDescriptor>,
    recipes_by_model: HashMap<String, Vec<Recipe>>,
}

impl Catalog {
    /// Load every model and recipe document under `root` (`root/models/*`,
    /// `root/recipes/*`) and build the model-scoped recipe index.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let models = loader::load_models(root)?;
        let recipes = loader::load_recipes(root)?;

        let mut models_by_id = HashMap::with_capacity(models.len());
        for model in models {
            models_by_id.insert(model.model_id.clone(), model);
        }

        let mut recipes_by_model: HashMap<String, Vec<Recipe>> = HashMap::new();
        for recipe in recipes {
            recipes_by_model
                .entry(recipe.model_id.clone())
                .or_default()
                .push(recipe);
        }

        Ok(Self {
            models: models_by_id,
            recipes_by_model,
        })
    }

    /// Build a catalog directly from already-parsed models/recipes (used by tests
    /// and by embedders that load the catalog from a non-filesystem source).
    #[must_use]
    pub fn from_parts(models: Vec<ModelDescriptor>, recipes: Vec<Recipe>) -> Self {
        let mut models_by_id = HashMap::with_capacity(models.len());
        for model in models {
            models_by_id.insert(model.model_id.clone(), model);
        }
        let mut recipes_by_model: HashMap<String, Vec<Recipe>> = HashMap::new();
        for recipe in recipes {
            recipes_by_model
                .entry(recipe.model_id.clone())
                .or_default()
                .push(recipe);
        }
        Self {
            models: models_by_id,
            recipes_by_model,
        }
    }

    pub fn get_model(&self, model_id: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(model_id)
            .ok_or_else(|| Error::NotFound(model_id.to_string()))
    }

    /// Recipes whose `model_id` equals `model_id`, in catalog load order. Never
    /// scans the full recipe set: backed by an index built once in [`Catalog::load`].
    #[must_use]
    pub fn recipes_for(&self, model_id: &str) -> &[Recipe] {
        self.recipes_by_model
            .get(model_id)
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn recipe_count(&self) -> usize {
        self.recipes_by_model.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn model(id: &str) -> ModelDescriptor {
        ModelDescriptor {
            model_id: id.to_string(),
            size_class: SizeClass::B32,
            family: "qwen".into(),
            readiness_level: ReadinessLevel::ProductionReady,
        }
    }

    fn recipe(id: &str, model_id: &str) -> Recipe {
        let mut backends = BTreeMap::new();
        let mut by_count = BTreeMap::new();
        by_count.insert(
            GpuCountKey(4),
            BackendConfig {
                enabled: true,
                args: vec![("--tensor-parallel-size".into(), "4".into())],
            },
        );
        backends.insert(Backend::Vllm, by_count);
        Recipe {
            recipe_id: id.to_string(),
            model_id: model_id.to_string(),
            hardware_tag: "MI300X".into(),
            precision: Precision::Bf16,
            readiness_level: ReadinessLevel::ProductionReady,
            backends,
        }
    }

    #[test]
    fn recipes_for_is_model_scoped() {
        let catalog = Catalog::from_parts(
            vec![model("Qwen/Qwen3-32B"), model("Foo/Bar-7B")],
            vec![
                recipe("qwen3-32b-mi300x-bf16", "Qwen/Qwen3-32B"),
                recipe("foo-bar-7b-mi300x-bf16", "Foo/Bar-7B"),
            ],
        );

        let recipes = catalog.recipes_for("Qwen/Qwen3-32B");
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].recipe_id, "qwen3-32b-mi300x-bf16");

        assert!(catalog.recipes_for("Nonexistent/Model").is_empty());
    }

    #[test]
    fn get_model_not_found() {
        let catalog = Catalog::from_parts(vec![], vec![]);
        assert!(matches!(
            catalog.get_model("missing/model"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn tensor_parallel_invariant_violation_is_rejected() {
        let mut backends = BTreeMap::new();
        let mut by_count = BTreeMap::new();
        by_count.insert(
            GpuCountKey(4),
            BackendConfig {
                enabled: true,
                args: vec![("--tensor-parallel-size".into(), "2".into())],
            },
        );
        backends.insert(Backend::Vllm, by_count);
        let bad = Recipe {
            recipe_id: "bad".into(),
            model_id: "Foo/Bar".into(),
            hardware_tag: "MI300X".into(),
            precision: Precision::Bf16,
            readiness_level: ReadinessLevel::Experimental,
            backends,
        };
        assert!(bad.validate_tensor_parallel_invariant().is_err());
    }

    #[test]
    fn load_from_disk_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::create_dir_all(dir.path().join("recipes")).unwrap();

        std::fs::write(
            dir.path().join("models/qwen3-32b.json"),
            r#"{"model_id":"Qwen/Qwen3-32B","size_class":"32B","family":"qwen","readiness_level":"production-ready"}"#,
        )
        .unwrap();

        std::fs::write(
            dir.path().join("recipes/qwen3-32b-mi300x-bf16.json"),
            r#"{
                "recipe_id": "qwen3-32b-mi300x-bf16",
                "model_id": "Qwen/Qwen3-32B",
                "hardware_tag": "MI300X",
                "precision": "bf16",
                "readiness_level": "production-ready",
                "backends": {
                    "vllm": {
                        "4_gpu": {"enabled": true, "args": [["--tensor-parallel-size", "4"]]}
                    }
                }
            }"#,
        )
        .unwrap();

        let catalog = Catalog::load(dir.path()).unwrap();
        assert_eq!(catalog.model_count(), 1);
        assert_eq!(catalog.recipe_count(), 1);
        assert!(catalog.get_model("Qwen/Qwen3-32B").is_ok());
    }

    #[test]
    fn load_rejects_malformed_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("recipes")).unwrap();
        std::fs::write(
            dir.path().join("recipes/bad.json"),
            r#"{
                "recipe_id": "bad",
                "model_id": "Foo/Bar",
                "hardware_tag": "MI300X",
                "precision": "bf16",
                "readiness_level": "experimental",
                "backends": {
                    "vllm": {
                        "4_gpu": {"enabled": true, "args": [["--tensor-parallel-size", "2"]]}
                    }
                }
            }"#,
        )
        .unwrap();

        let result = Catalog::load(dir.path());
        assert!(matches!(result, Err(Error::MalformedCatalog { .. })));
    }
}
