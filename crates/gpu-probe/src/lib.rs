//! Reports GPU counts at three abstraction levels: runtime-visible,
//! container-visible, and host-visible. See the module-level design rationale in
//! the spec this crate implements: the three numbers can legitimately differ
//! (a host with 8 GPUs might only expose 4 to a container, which in turn can
//! only address 2 at the runtime level because of driver limits).
//!
//! The probe is idempotent, side-effect free, and never fails: a strategy that
//! errors or times out is a silent miss, and a level with no successful
//! strategy reports `0`.

mod strategies;

pub use strategies::{EnvVarStrategy, GpuProbeStrategy, VendorToolStrategy};

use std::time::Duration;
use tracing::debug;

/// Per-strategy wall-clock budget (§4.2).
pub const STRATEGY_TIMEOUT: Duration = Duration::from_secs(10);

/// The three GPU counts produced by a single probe pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuCounts {
    pub runtime_visible: u32,
    pub container_visible: u32,
    pub host_visible: u32,
}

/// An ordered chain of strategies for one visibility level. The first strategy
/// to return `Some` wins; all others are skipped for that pass.
pub struct StrategyChain {
    level: &'static str,
    strategies: Vec<Box<dyn GpuProbeStrategy>>,
}

impl StrategyChain {
    #[must_use]
    pub fn new(level: &'static str, strategies: Vec<Box<dyn GpuProbeStrategy>>) -> Self {
        Self { level, strategies }
    }

    /// Run each strategy in order, bounded by [`STRATEGY_TIMEOUT`], until one
    /// succeeds. Every failure (timeout, non-zero exit, parse error) collapses
    /// to a miss and is logged at `debug`, never propagated.
    pub async fn resolve(&self) -> u32 {
        for strategy in &self.strategies {
            let outcome = tokio::time::timeout(STRATEGY_TIMEOUT, strategy.probe()).await;
            match outcome {
                Ok(Some(count)) => return count,
                Ok(None) => {
                    debug!(level = self.level, strategy = strategy.name(), "probe strategy missed");
                }
                Err(_) => {
                    debug!(level = self.level, strategy = strategy.name(), "probe strategy timed out");
                }
            }
        }
        0
    }
}

/// Builds the three strategy chains and resolves [`GpuCounts`] from them.
pub struct GpuProbe {
    runtime: StrategyChain,
    container: StrategyChain,
    host: StrategyChain,
}

impl GpuProbe {
    #[must_use]
    pub fn new(runtime: StrategyChain, container: StrategyChain, host: StrategyChain) -> Self {
        Self {
            runtime,
            container,
            host,
        }
    }

    /// The default strategy wiring: a vendor-tool query first, an
    /// environment-variable device list as fallback, for every level.
    #[must_use]
    pub fn with_default_strategies() -> Self {
        let env_vars = vec!["ROCR_VISIBLE_DEVICES", "HIP_VISIBLE_DEVICES", "CUDA_VISIBLE_DEVICES"];

        let runtime = StrategyChain::new(
            "runtime",
            vec![
                Box::new(VendorToolStrategy::rocm_smi()),
                Box::new(EnvVarStrategy::new(env_vars.clone())),
            ],
        );
        let container = StrategyChain::new(
            "container",
            vec![
                Box::new(VendorToolStrategy::device_nodes()),
                Box::new(EnvVarStrategy::new(env_vars.clone())),
            ],
        );
        let host = StrategyChain::new(
            "host",
            vec![
                Box::new(VendorToolStrategy::kfd_topology()),
                Box::new(EnvVarStrategy::new(env_vars)),
            ],
        );

        Self::new(runtime, container, host)
    }

    /// Probe all three levels. Bounded in time, never panics, never returns an
    /// error: misses collapse to zero per level.
    pub async fn probe(&self) -> GpuCounts {
        GpuCounts {
            runtime_visible: self.runtime.resolve().await,
            container_visible: self.container.resolve().await,
            host_visible: self.host.resolve().await,
        }
    }
}

impl Default for GpuProbe {
    fn default() -> Self {
        Self::with_default_strategies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(Option<u32>, &'static str);

    #[async_trait]
    impl GpuProbeStrategy for Fixed {
        async fn probe(&self) -> Option<u32> {
            self.0
        }

        fn name(&self) -> &str {
            self.1
        }
    }

    #[tokio::test]
    async fn first_successful_strategy_wins() {
        let chain = StrategyChain::new(
            "runtime",
            vec![
                Box::new(Fixed(None, "miss")),
                Box::new(Fixed(Some(4), "hit")),
                Box::new(Fixed(Some(8), "never-reached")),
            ],
        );
        assert_eq!(chain.resolve().await, 4);
    }

    #[tokio::test]
    async fn all_misses_collapse_to_zero() {
        let chain = StrategyChain::new(
            "runtime",
            vec![Box::new(Fixed(None, "a")), Box::new(Fixed(None, "b"))],
        );
        assert_eq!(chain.resolve().await, 0);
    }

    #[tokio::test]
    async fn probe_never_panics_with_no_hardware() {
        // In a CI sandbox with no rocm-smi / accelerators, every strategy misses
        // and the probe must still complete, collapsing every level to zero.
        let probe = GpuProbe::with_default_strategies();
        let counts = probe.probe().await;
        assert_eq!(counts, GpuCounts::default());
    }
}
