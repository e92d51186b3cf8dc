use aim_catalog::{Backend, Precision};
use clap::Parser;
use std::path::PathBuf;

fn parse_backend(raw: &str) -> Result<Backend, String> {
    match raw {
        "vllm" => Ok(Backend::Vllm),
        "sglang" => Ok(Backend::Sglang),
        other => Err(format!("unknown backend `{other}`, expected `vllm` or `sglang`")),
    }
}

fn parse_precision(raw: &str) -> Result<Precision, String> {
    match raw {
        "fp16" => Ok(Precision::Fp16),
        "bf16" => Ok(Precision::Bf16),
        "fp8" => Ok(Precision::Fp8),
        "int8" => Ok(Precision::Int8),
        "int4" => Ok(Precision::Int4),
        other => Err(format!("unknown precision `{other}`, expected one of fp16/bf16/fp8/int8/int4")),
    }
}

fn default_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("aim-engine"),
        None => PathBuf::from("./aim-engine-cache"),
    }
}

/// AIM Engine: resolves a model + hardware to a runnable recipe, launches it,
/// and keeps it serving.
#[derive(Debug, Parser)]
#[command(name = "aim-manager", about = "Recipe-driven inference-serving engine", version)]
pub struct Cli {
    /// Directory containing `models/` and `recipes/` catalog documents.
    #[arg(long, env = "AIM_CATALOG_DIR", global = true, default_value = "./catalog")]
    pub catalog_dir: PathBuf,

    /// Root directory for the on-disk model cache.
    #[arg(long, env = "AIM_CACHE_DIR", global = true, default_value_os_t = default_cache_dir())]
    pub cache_dir: PathBuf,

    /// Log verbosity, can be repeated (-v, -vv) to increase detail.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Resolve and launch a single model, blocking until ready (or failed).
    Deploy(DeployArgs),
    /// Run the declarative reconciler daemon with an HTTP control surface.
    Serve(ServeArgs),
}

#[derive(Debug, clap::Args)]
pub struct DeployArgs {
    /// Hugging-Face-style model identifier, e.g. `Qwen/Qwen3-32B`.
    pub model_id: String,

    /// Explicit GPU count; omit to auto-select from the catalog and probed hardware.
    #[arg(long)]
    pub gpu_count: Option<u32>,

    /// Explicit precision (fp16, bf16, fp8, int8, int4); omit to auto-select with fallback.
    #[arg(long, value_parser = parse_precision)]
    pub precision: Option<Precision>,

    #[arg(long, value_parser = parse_backend, default_value_t = Backend::Vllm)]
    pub backend: Backend,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Skip the Cache Store entirely (useful when artifacts are already baked into the image).
    #[arg(long)]
    pub no_cache: bool,

    /// How long to wait for the endpoint to report healthy before giving up.
    #[arg(long, default_value_t = 600)]
    pub readiness_timeout_secs: u64,
}

#[derive(Debug, clap::Args)]
pub struct ServeArgs {
    /// Address the declarative HTTP surface binds to.
    #[arg(long, env = "AIM_LISTEN_ADDR", default_value = "127.0.0.1:9090")]
    pub listen_addr: std::net::SocketAddr,

    /// Optional directory of `*.toml` `EndpointSpec` files to load at startup.
    #[arg(long)]
    pub specs_dir: Option<PathBuf>,
}
