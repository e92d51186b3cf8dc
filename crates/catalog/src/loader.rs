use crate::error::{Error, Result};
use crate::model::{ModelDescriptor, Recipe};
use std::path::Path;
use tracing::warn;

/// Parses one catalog document (JSON or TOML, determined by extension) into `T`.
fn parse_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "json" => serde_json::from_str(&contents).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        "toml" => toml::from_str(&contents).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        other => Err(Error::Parse {
            path: path.to_path_buf(),
            reason: format!("unsupported catalog document extension: {other}"),
        }),
    }
}

fn is_catalog_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("toml")
    )
}

/// Walk `dir` once, parsing every document into `T` via `parse`. Used for both
/// `catalog/models/` and `catalog/recipes/`.
fn load_all<T>(dir: &Path) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_catalog_document(entry.path()) {
            continue;
        }
        out.push(parse_document(entry.path())?);
    }
    Ok(out)
}

/// Load every model descriptor under `<root>/models/`.
pub fn load_models(root: &Path) -> Result<Vec<ModelDescriptor>> {
    load_all(&root.join("models"))
}

/// Load every recipe under `<root>/recipes/`, validating the tensor-parallel
/// invariant (§3) for each one. A single violation is fatal for the whole load,
/// per `MalformedCatalog` in the error taxonomy.
pub fn load_recipes(root: &Path) -> Result<Vec<Recipe>> {
    let recipes_dir = root.join("recipes");
    let recipes: Vec<Recipe> = load_all(&recipes_dir)?;

    for recipe in &recipes {
        if let Err(reason) = recipe.validate_tensor_parallel_invariant() {
            return Err(Error::MalformedCatalog {
                path: recipes_dir.clone(),
                reason,
            });
        }
    }

    if recipes.is_empty() {
        warn!("no recipes found under {}", recipes_dir.display());
    }

    Ok(recipes)
}
