use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl From<aim_cache::Mount> for Mount {
    fn from(m: aim_cache::Mount) -> Self {
        Self {
            host_path: m.host_path,
            container_path: m.container_path,
            read_only: m.read_only,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

/// The fully materialized process description a [`crate::materialize`] call
/// produces from a [`aim_resolver::ResolvedPlan`] (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub environment: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub port_bindings: Vec<PortBinding>,
    pub device_assignments: Vec<u32>,
    pub identity: String,
}
