use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Known weight-count buckets used to derive default GPU counts and precision.
///
/// `Unknown` covers any model whose size class the catalog doesn't (yet) classify;
/// the resolver falls back to "use everything the probe sees" for those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeClass {
    #[serde(rename = "7B")]
    B7,
    #[serde(rename = "8B")]
    B8,
    #[serde(rename = "13B")]
    B13,
    #[serde(rename = "14B")]
    B14,
    #[serde(rename = "32B")]
    B32,
    #[serde(rename = "34B")]
    B34,
    #[serde(rename = "70B")]
    B70,
    #[serde(rename = "72B")]
    B72,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::B7 => "7B",
            Self::B8 => "8B",
            Self::B13 => "13B",
            Self::B14 => "14B",
            Self::B32 => "32B",
            Self::B34 => "34B",
            Self::B70 => "70B",
            Self::B72 => "72B",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl SizeClass {
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "7B" => Self::B7,
            "8B" => Self::B8,
            "13B" => Self::B13,
            "14B" => Self::B14,
            "32B" => Self::B32,
            "34B" => Self::B34,
            "70B" => Self::B70,
            "72B" => Self::B72,
            _ => Self::Unknown,
        }
    }

    /// Ideal GPU count for this size class, per the default sizing table.
    /// `None` for `Unknown`, where the caller must fall back to the full probe count.
    #[must_use]
    pub fn ideal_gpu_count(self) -> Option<u32> {
        match self {
            Self::B7 | Self::B8 => Some(1),
            Self::B13 | Self::B14 => Some(2),
            Self::B32 | Self::B34 => Some(4),
            Self::B70 | Self::B72 => Some(8),
            Self::Unknown => None,
        }
    }

    /// Default precision for this size class when the caller doesn't override it.
    #[must_use]
    pub fn default_precision(self) -> Precision {
        match self {
            Self::B7 | Self::B8 => Precision::Fp16,
            _ => Precision::Bf16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessLevel {
    Experimental,
    ProductionReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp16,
    Bf16,
    Fp8,
    Int8,
    Int4,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
            Self::Fp8 => "fp8",
            Self::Int8 => "int8",
            Self::Int4 => "int4",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Vllm,
    Sglang,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vllm => "vllm",
            Self::Sglang => "sglang",
        };
        f.write_str(s)
    }
}

/// Immutable model metadata, as loaded from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub size_class: SizeClass,
    pub family: String,
    pub readiness_level: ReadinessLevel,
}

/// GPU-count key used to index a backend's per-topology configs (`1_gpu`, `2_gpu`, ...).
///
/// Serialized as the `^[0-9]+_gpu$` string form so it can be used as a JSON/TOML
/// map key matching the catalog file schema in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuCountKey(pub u32);

impl fmt::Display for GpuCountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_gpu", self.0)
    }
}

impl GpuCountKey {
    /// Parse a key of the form `^[0-9]+_gpu$`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let n = raw.strip_suffix("_gpu")?;
        n.parse::<u32>().ok().map(Self)
    }
}

impl Serialize for GpuCountKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GpuCountKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid gpu-count key: {raw:?}, expected N_gpu"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub enabled: bool,
    /// Insertion-ordered so rendered command lines are deterministic.
    #[serde(default)]
    pub args: Vec<(String, String)>,
}

impl BackendConfig {
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Hardware- and precision-specific serving configuration for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub recipe_id: String,
    pub model_id: String,
    pub hardware_tag: String,
    pub precision: Precision,
    pub readiness_level: ReadinessLevel,
    /// Per-backend, per-gpu-count configs. `BTreeMap` keeps `N_gpu` lookups ordered
    /// for deterministic iteration during fallback search.
    #[serde(default)]
    pub backends: BTreeMap<Backend, BTreeMap<GpuCountKey, BackendConfig>>,
}

impl Recipe {
    #[must_use]
    pub fn backend_config(&self, backend: Backend, gpu_count: u32) -> Option<&BackendConfig> {
        self.backends
            .get(&backend)
            .and_then(|m| m.get(&GpuCountKey(gpu_count)))
    }

    /// Validate the tensor-parallel invariant: for every enabled `N_gpu` entry, if
    /// `--tensor-parallel-size` is present in `args`, its value must equal `N`.
    pub fn validate_tensor_parallel_invariant(&self) -> Result<(), String> {
        for (backend, by_count) in &self.backends {
            for (count, cfg) in by_count {
                if !cfg.enabled {
                    continue;
                }
                if let Some(tp) = cfg.arg("--tensor-parallel-size") {
                    let parsed: Result<u32, _> = tp.parse();
                    match parsed {
                        Ok(n) if n == count.0 => {}
                        Ok(n) => {
                            return Err(format!(
                                "{}/{backend}/{count}: --tensor-parallel-size={n} != {}",
                                self.recipe_id, count.0
                            ));
                        }
                        Err(_) => {
                            return Err(format!(
                                "{}/{backend}/{count}: --tensor-parallel-size={tp} is not an integer",
                                self.recipe_id
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
