//! Federation plan and status definitions

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shard name
pub type ShardName = String;

/// Federation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FederationBackend {
    /// Native collector-to-collector federation
    #[default]
    Prometheus,
    /// Long-term storage with a global query view
    Thanos,
}

impl std::fmt::Display for FederationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FederationBackend::Prometheus => write!(f, "prometheus"),
            FederationBackend::Thanos => write!(f, "thanos"),
        }
    }
}

/// How nodes are partitioned into shards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardingStrategy {
    /// Even split with a size-derived shard count
    #[default]
    Auto,
    /// Even split into a requested number of shards
    Count,
    /// One shard per `rack` label
    Rack,
    /// Hand-written plan
    Manual,
}

impl std::fmt::Display for ShardingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardingStrategy::Auto => write!(f, "auto"),
            ShardingStrategy::Count => write!(f, "count"),
            ShardingStrategy::Rack => write!(f, "rack"),
            ShardingStrategy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ShardingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ShardingStrategy::Auto),
            "count" => Ok(ShardingStrategy::Count),
            "rack" => Ok(ShardingStrategy::Rack),
            "manual" => Ok(ShardingStrategy::Manual),
            other => Err(format!("unknown sharding strategy: {}", other)),
        }
    }
}

/// Per-shard collector settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Listen port (kept wide so hand-written plans can be validated)
    pub port: u32,
    pub storage_path: PathBuf,
    pub retention: String,
}

/// One shard: a named partition of nodes scraped by one collector
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardConfig {
    pub name: ShardName,
    /// Node names assigned to this shard
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Rack identifiers (rack strategy only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub racks: Vec<String>,
    #[serde(alias = "prometheus")]
    pub collector: CollectorSettings,
}

impl ShardConfig {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn default_central_port() -> u32 {
    9090
}

fn default_retention_raw() -> String {
    "2d".to_string()
}

fn default_retention_downsampled() -> String {
    "30d".to_string()
}

fn default_federate_interval() -> String {
    "60s".to_string()
}

fn default_central_storage() -> PathBuf {
    PathBuf::from("/var/lib/fleet/collector-central")
}

/// Central aggregator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CentralConfig {
    #[serde(default = "default_central_port")]
    pub port: u32,
    #[serde(default = "default_central_storage")]
    pub storage_path: PathBuf,
    /// Retention for federated raw series
    #[serde(default = "default_retention_raw")]
    pub retention_raw: String,
    /// Retention for recorded aggregates
    #[serde(default = "default_retention_downsampled")]
    pub retention_downsampled: String,
    /// How often the central collector pulls from shards
    #[serde(default = "default_federate_interval")]
    pub federate_interval: String,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            port: default_central_port(),
            storage_path: default_central_storage(),
            retention_raw: default_retention_raw(),
            retention_downsampled: default_retention_downsampled(),
            federate_interval: default_federate_interval(),
        }
    }
}

impl CentralConfig {
    /// Configured port, or the default when unset
    pub fn effective_port(&self) -> u32 {
        if self.port == 0 {
            default_central_port()
        } else {
            self.port
        }
    }
}

/// Complete federation plan
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, alias = "type")]
    pub backend: FederationBackend,
    #[serde(default)]
    pub shards: Vec<ShardConfig>,
    /// Node hosting the central collector, if not the local machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_node: Option<String>,
    #[serde(default)]
    pub central: CentralConfig,
}

impl FederationConfig {
    pub fn total_nodes(&self) -> usize {
        self.shards.iter().map(ShardConfig::node_count).sum()
    }

    pub fn shard(&self, name: &str) -> Option<&ShardConfig> {
        self.shards.iter().find(|s| s.name == name)
    }
}

/// Suggested move of one node between shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMove {
    pub node: String,
    pub from_shard: ShardName,
    pub to_shard: ShardName,
}

impl std::fmt::Display for NodeMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.node, self.from_shard, self.to_shard)
    }
}

/// Live status of one shard collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStatus {
    pub name: ShardName,
    pub endpoint: String,
    pub node_count: usize,
    pub healthy: bool,
    /// Head series count, 0 if unknown
    pub metric_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Live status of the central collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralStatus {
    pub endpoint: String,
    pub healthy: bool,
    pub metric_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Overall federation status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationStatus {
    pub enabled: bool,
    pub backend: FederationBackend,
    pub shard_count: usize,
    pub total_nodes: usize,
    pub healthy_count: usize,
    pub shards: Vec<ShardStatus>,
    pub central: CentralStatus,
    pub checked_at: DateTime<Utc>,
}
