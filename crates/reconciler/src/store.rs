//! The declarative resource store: "read own resources, watch for changes,
//! update status with optimistic concurrency" (§6). The default binding is an
//! in-process map; swapping the trait implementation (etcd, Kubernetes CRDs,
//! ...) is the intended extension point (SPEC_FULL.md §6).

use crate::error::{Error, Result};
use crate::model::{EndpointSpec, EndpointStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn put_spec(&self, spec: EndpointSpec);
    async fn get(&self, name: &str) -> Option<(EndpointSpec, EndpointStatus)>;
    async fn list(&self) -> Vec<(EndpointSpec, EndpointStatus)>;
    async fn remove(&self, name: &str);

    /// Read-modify-write with an optimistic-concurrency version check:
    /// rejected with [`Error::StatusConflict`] if `expected_generation`
    /// doesn't match the currently stored generation.
    async fn update_status(&self, name: &str, expected_generation: u64, status: EndpointStatus) -> Result<EndpointStatus>;
}

fn content_equal(a: &EndpointStatus, b: &EndpointStatus) -> bool {
    a.phase == b.phase
        && a.resolved_recipe_id == b.resolved_recipe_id
        && a.ready_replicas == b.ready_replicas
        && a.conditions == b.conditions
        && a.endpoint_urls == b.endpoint_urls
}

#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    entries: Arc<RwLock<HashMap<String, (EndpointSpec, EndpointStatus)>>>,
}

impl InMemoryResourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn put_spec(&self, spec: EndpointSpec) {
        let mut entries = self.entries.write().await;
        entries
            .entry(spec.name.clone())
            .and_modify(|(existing_spec, _)| *existing_spec = spec.clone())
            .or_insert_with(|| (spec, EndpointStatus::default()));
    }

    async fn get(&self, name: &str) -> Option<(EndpointSpec, EndpointStatus)> {
        self.entries.read().await.get(name).cloned()
    }

    async fn list(&self) -> Vec<(EndpointSpec, EndpointStatus)> {
        self.entries.read().await.values().cloned().collect()
    }

    async fn remove(&self, name: &str) {
        self.entries.write().await.remove(name);
    }

    async fn update_status(&self, name: &str, expected_generation: u64, mut status: EndpointStatus) -> Result<EndpointStatus> {
        let mut entries = self.entries.write().await;
        let (_, current) = entries.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        if current.generation != expected_generation {
            return Err(Error::StatusConflict(name.to_string()));
        }

        // Idempotence (§4.8): no real state change means no generation bump.
        if content_equal(current, &status) {
            return Ok(current.clone());
        }

        status.generation = expected_generation + 1;
        status.observed_generation = status.generation;
        entries.get_mut(name).expect("existence checked above").1 = status.clone();
        Ok(status)
    }
}
