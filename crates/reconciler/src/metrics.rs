//! Prometheus counters/gauges for the reconcile loop, exposed alongside the
//! `axum` status surface — the same crate `blueprint-qos`'s
//! `metrics/prometheus/server.rs` already depends on for its exporter.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub reconcile_total: IntCounterVec,
    pub cache_result_total: IntCounterVec,
    pub instances_by_phase: IntGaugeVec,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("aim_reconcile_total", "Reconcile attempts per endpoint, by outcome"),
            &["endpoint", "outcome"],
        )
        .expect("static metric descriptor is valid");
        registry.register(Box::new(reconcile_total.clone())).expect("first registration of this metric");

        let cache_result_total = IntCounterVec::new(
            Opts::new("aim_cache_result_total", "Cache Store ensure() outcomes, by result"),
            &["result"],
        )
        .expect("static metric descriptor is valid");
        registry.register(Box::new(cache_result_total.clone())).expect("first registration of this metric");

        let instances_by_phase = IntGaugeVec::new(
            Opts::new("aim_instances_by_phase", "Observed serving instances, by phase"),
            &["phase"],
        )
        .expect("static metric descriptor is valid");
        registry.register(Box::new(instances_by_phase.clone())).expect("first registration of this metric");

        Self { registry, reconcile_total, cache_result_total, instances_by_phase }
    }

    pub fn record_reconcile(&self, endpoint: &str, outcome: &str) {
        self.reconcile_total.with_label_values(&[endpoint, outcome]).inc();
    }

    pub fn record_cache_result(&self, result: &str) {
        self.cache_result_total.with_label_values(&[result]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
