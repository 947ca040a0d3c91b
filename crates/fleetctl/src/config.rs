//! Configuration module for fleetctl
//!
//! One YAML file with a section per engine. Every section has defaults, so a
//! file only needs the parts it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_core::Node;
use fleet_exec::{ExecutorConfig, HostKeyPolicy};
use fleet_federation::{DeployLayout, ShardingPolicy, ShardingStrategy};
use fleet_multicluster::AggregatorOptions;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Name used in generated collector labels
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Nodes commands and shards operate on
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub executor: ExecSettings,
    #[serde(default)]
    pub federation: FederationSettings,
    #[serde(default)]
    pub multicluster: MultiClusterSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            nodes: Vec::new(),
            executor: ExecSettings::default(),
            federation: FederationSettings::default(),
            multicluster: MultiClusterSettings::default(),
            log: LogConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Layer `other` over this config
    ///
    /// A value in `other` wins only where it differs from the default, so an
    /// overlay parsed from a partial YAML file leaves the rest untouched. An
    /// overlay cannot reset a value back to its default.
    pub fn merge(&mut self, other: FleetConfig) {
        if other.cluster_name != default_cluster_name() {
            self.cluster_name = other.cluster_name;
        }
        if !other.nodes.is_empty() {
            self.nodes = other.nodes;
        }
        self.executor.merge(other.executor);
        self.federation.merge(other.federation);
        self.multicluster.merge(other.multicluster);
        self.log.merge(other.log);
    }

    /// Look up nodes by name; an empty list selects every node
    pub fn select_nodes(&self, names: &[String]) -> Result<Vec<Node>, ConfigError> {
        if names.is_empty() {
            return Ok(self.nodes.clone());
        }
        names
            .iter()
            .map(|name| {
                self.nodes
                    .iter()
                    .find(|n| &n.name == name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownNode(name.clone()))
            })
            .collect()
    }

    fn check(&self) -> Result<(), ConfigError> {
        let duplicates = fleet_core::duplicate_names(&self.nodes);
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateNodes(duplicates));
        }
        Ok(())
    }
}

/// Remote execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSettings {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Verify host keys against this known_hosts file; unset accepts any key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            known_hosts: None,
        }
    }
}

impl ExecSettings {
    fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.max_parallel != defaults.max_parallel {
            self.max_parallel = other.max_parallel;
        }
        if other.connect_timeout_secs != defaults.connect_timeout_secs {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.command_timeout_secs != defaults.command_timeout_secs {
            self.command_timeout_secs = other.command_timeout_secs;
        }
        if other.max_retries != defaults.max_retries {
            self.max_retries = other.max_retries;
        }
        if other.backoff_base_secs != defaults.backoff_base_secs {
            self.backoff_base_secs = other.backoff_base_secs;
        }
        if other.backoff_max_secs != defaults.backoff_max_secs {
            self.backoff_max_secs = other.backoff_max_secs;
        }
        if other.known_hosts.is_some() {
            self.known_hosts = other.known_hosts;
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::from_secs(
            self.max_parallel,
            self.connect_timeout_secs,
            self.command_timeout_secs,
            self.max_retries,
            self.backoff_base_secs,
            self.backoff_max_secs,
        )
    }

    pub fn host_key_policy(&self) -> HostKeyPolicy {
        match &self.known_hosts {
            Some(path) => HostKeyPolicy::KnownHosts(path.clone()),
            None => HostKeyPolicy::AcceptAny,
        }
    }
}

/// Monitoring shard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationSettings {
    /// Where the current plan is stored
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub strategy: ShardingStrategy,
    /// Requested shard count for the `count` strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<usize>,
    #[serde(default)]
    pub policy: ShardingPolicy,
    #[serde(default)]
    pub layout: DeployLayout,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            strategy: ShardingStrategy::default(),
            shard_count: None,
            policy: ShardingPolicy::default(),
            layout: DeployLayout::default(),
        }
    }
}

impl FederationSettings {
    fn merge(&mut self, other: Self) {
        if other.state_dir != default_state_dir() {
            self.state_dir = other.state_dir;
        }
        if other.strategy != ShardingStrategy::default() {
            self.strategy = other.strategy;
        }
        if other.shard_count.is_some() {
            self.shard_count = other.shard_count;
        }
        if other.policy != ShardingPolicy::default() {
            self.policy = other.policy;
        }
        if other.layout != DeployLayout::default() {
            self.layout = other.layout;
        }
    }
}

/// Multi-cluster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiClusterSettings {
    /// Cluster registry file
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Poll interval of `clusters watch`
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    /// Health score below which a connected cluster counts as unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: f64,
}

impl Default for MultiClusterSettings {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
            request_timeout_secs: default_request_timeout_secs(),
            watch_interval_secs: default_watch_interval_secs(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

impl MultiClusterSettings {
    fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.registry_path != defaults.registry_path {
            self.registry_path = other.registry_path;
        }
        if other.request_timeout_secs != defaults.request_timeout_secs {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.watch_interval_secs != defaults.watch_interval_secs {
            self.watch_interval_secs = other.watch_interval_secs;
        }
        if other.unhealthy_threshold != defaults.unhealthy_threshold {
            self.unhealthy_threshold = other.unhealthy_threshold;
        }
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if other.level != default_log_level() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_max_parallel() -> usize {
    fleet_exec::config::DEFAULT_MAX_PARALLEL
}

fn default_connect_timeout_secs() -> u64 {
    fleet_exec::config::DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_command_timeout_secs() -> u64 {
    fleet_exec::config::DEFAULT_COMMAND_TIMEOUT.as_secs()
}

fn default_max_retries() -> u32 {
    fleet_exec::config::DEFAULT_MAX_RETRIES
}

fn default_backoff_base_secs() -> u64 {
    fleet_exec::config::DEFAULT_BACKOFF_BASE.as_secs()
}

fn default_backoff_max_secs() -> u64 {
    fleet_exec::config::DEFAULT_BACKOFF_MAX.as_secs()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleet/federation")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("/etc/fleet/clusters.yaml")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_watch_interval_secs() -> u64 {
    30
}

fn default_unhealthy_threshold() -> f64 {
    80.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("duplicate node names: {}", .0.join(", "))]
    DuplicateNodes(Vec<String>),
    #[error("unknown node: {0}")]
    UnknownNode(String),
}
