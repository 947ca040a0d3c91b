//! Federation manager
//!
//! Deploys a shard plan as collector configs, target files and service units,
//! probes the running collectors, and tears the federation down again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::{scatter, CancellationToken, Node};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::collector::{CollectorClient, CollectorError, PROBE_TIMEOUT};
use crate::error::FederationError;
use crate::render::{self, UnitSpec};
use crate::service::{central_unit, shard_unit, ServiceManager, Systemctl};
use crate::types::{
    CentralStatus, FederationConfig, FederationStatus, ShardConfig, ShardStatus,
};

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/fleet/federation")
}

fn default_targets_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleet/targets")
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("/etc/fleet/rules")
}

fn default_collector_binary() -> PathBuf {
    PathBuf::from("/usr/bin/prometheus")
}

fn default_service_user() -> String {
    "prometheus".to_string()
}

fn default_collector_host() -> String {
    "localhost".to_string()
}

/// Where deploy writes its artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployLayout {
    /// Collector configs (removed by `disable`)
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Service-discovery target files
    #[serde(default = "default_targets_dir")]
    pub targets_dir: PathBuf,
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
    #[serde(default = "default_collector_binary")]
    pub collector_binary: PathBuf,
    #[serde(default = "default_service_user")]
    pub service_user: String,
    /// Host the collectors listen on, for status probes
    #[serde(default = "default_collector_host")]
    pub collector_host: String,
}

impl Default for DeployLayout {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            targets_dir: default_targets_dir(),
            unit_dir: default_unit_dir(),
            rules_dir: default_rules_dir(),
            collector_binary: default_collector_binary(),
            service_user: default_service_user(),
            collector_host: default_collector_host(),
        }
    }
}

impl DeployLayout {
    /// Default layout re-rooted under `root`
    pub fn rooted(root: &Path) -> Self {
        let under = |p: PathBuf| root.join(p.strip_prefix("/").unwrap_or(p.as_path()));
        let defaults = Self::default();
        Self {
            config_dir: under(defaults.config_dir),
            targets_dir: under(defaults.targets_dir),
            unit_dir: under(defaults.unit_dir),
            rules_dir: under(defaults.rules_dir),
            ..defaults
        }
    }

    pub fn shard_config_path(&self, shard: &str) -> PathBuf {
        self.config_dir.join(render::shard_config_file(shard))
    }

    pub fn central_config_path(&self) -> PathBuf {
        self.config_dir.join(render::CENTRAL_CONFIG_FILE)
    }

    pub fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", unit))
    }
}

/// Files written by a deploy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub files: Vec<PathBuf>,
}

/// Units that did or did not stop during `disable`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisableReport {
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Drives a federation plan against the local machine
pub struct FederationManager {
    cluster_name: String,
    config: FederationConfig,
    nodes: Vec<Node>,
    layout: DeployLayout,
    services: Arc<dyn ServiceManager>,
}

impl std::fmt::Debug for FederationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationManager")
            .field("cluster_name", &self.cluster_name)
            .field("shards", &self.config.shards.len())
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl FederationManager {
    pub fn new(cluster_name: impl Into<String>, config: FederationConfig, nodes: Vec<Node>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            config,
            nodes,
            layout: DeployLayout::default(),
            services: Arc::new(Systemctl),
        }
    }

    pub fn with_layout(mut self, layout: DeployLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_service_manager(mut self, services: Arc<dyn ServiceManager>) -> Self {
        self.services = services;
        self
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn layout(&self) -> &DeployLayout {
        &self.layout
    }

    pub fn set_shards(&mut self, shards: Vec<ShardConfig>) {
        self.config.shards = shards;
    }

    /// Write every artifact for the current plan
    ///
    /// The plan is validated first. The first failing shard aborts the rest;
    /// files already written stay in place.
    pub async fn deploy(&self) -> Result<DeployReport, FederationError> {
        if self.config.shards.is_empty() {
            return Err(FederationError::NoShards);
        }
        self.config.validate()?;

        self.create_directories().await?;

        let mut report = DeployReport::default();
        for shard in &self.config.shards {
            let files = self.deploy_shard(shard).await.map_err(|e| {
                FederationError::ShardDeploy {
                    shard: shard.name.clone(),
                    source: Box::new(e),
                }
            })?;
            info!(shard = %shard.name, nodes = shard.nodes.len(), "Deployed shard");
            report.files.extend(files);
        }

        let files = self
            .deploy_central()
            .await
            .map_err(|e| FederationError::CentralDeploy(Box::new(e)))?;
        report.files.extend(files);

        if let Err(e) = self.services.daemon_reload().await {
            warn!("Service manager reload failed: {}", e);
        }

        info!(
            shards = self.config.shards.len(),
            files = report.files.len(),
            "Federation deployed"
        );
        Ok(report)
    }

    async fn create_directories(&self) -> Result<(), FederationError> {
        let dirs = [
            &self.layout.config_dir,
            &self.layout.targets_dir,
            &self.layout.unit_dir,
            &self.layout.rules_dir,
        ];
        for dir in dirs {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    async fn deploy_shard(&self, shard: &ShardConfig) -> Result<Vec<PathBuf>, FederationError> {
        fs::create_dir_all(&shard.collector.storage_path).await?;

        let config_path = self.layout.shard_config_path(&shard.name);
        let config =
            render::shard_collector_config(shard, &self.cluster_name, &self.layout.targets_dir)?;
        fs::write(&config_path, config).await?;

        let node_targets_path = self
            .layout
            .targets_dir
            .join(render::node_targets_file(&shard.name));
        let node_targets = render::exporter_targets(shard, &self.nodes, render::NODE_EXPORTER_PORT);
        fs::write(&node_targets_path, render::targets_json(&node_targets)?).await?;

        let gpu_targets_path = self
            .layout
            .targets_dir
            .join(render::gpu_targets_file(&shard.name));
        let gpu_targets = render::exporter_targets(shard, &self.nodes, render::GPU_EXPORTER_PORT);
        fs::write(&gpu_targets_path, render::targets_json(&gpu_targets)?).await?;

        let unit = shard_unit(&shard.name);
        let unit_path = self.layout.unit_path(&unit);
        let spec = UnitSpec {
            description: format!("Fleet collector shard - {}", shard.name),
            syslog_identifier: unit.clone(),
            binary: self.layout.collector_binary.clone(),
            user: self.layout.service_user.clone(),
            config_path: config_path.clone(),
            storage_path: shard.collector.storage_path.clone(),
            retention: shard.collector.retention.clone(),
            port: shard.collector.port,
        };
        fs::write(&unit_path, render::collector_unit(&spec)).await?;

        Ok(vec![config_path, node_targets_path, gpu_targets_path, unit_path])
    }

    async fn deploy_central(&self) -> Result<Vec<PathBuf>, FederationError> {
        let central = &self.config.central;
        fs::create_dir_all(&central.storage_path).await?;

        let config_path = self.layout.central_config_path();
        let config = render::central_collector_config(
            &self.config.shards,
            central,
            &self.cluster_name,
            &self.layout.rules_dir,
        )?;
        fs::write(&config_path, config).await?;

        let rules_path = self.layout.rules_dir.join(render::RULES_FILE);
        fs::write(&rules_path, render::recording_rules()?).await?;

        let unit = central_unit();
        let unit_path = self.layout.unit_path(&unit);
        let spec = UnitSpec {
            description: "Fleet collector central - federation aggregator".to_string(),
            syslog_identifier: unit.clone(),
            binary: self.layout.collector_binary.clone(),
            user: self.layout.service_user.clone(),
            config_path: config_path.clone(),
            storage_path: central.storage_path.clone(),
            retention: central.retention_raw.clone(),
            port: central.effective_port(),
        };
        fs::write(&unit_path, render::collector_unit(&spec)).await?;

        Ok(vec![config_path, rules_path, unit_path])
    }

    /// Probe every shard collector and the central collector concurrently
    ///
    /// A collector still being probed when `cancel` fires is reported
    /// unhealthy with a cancelled error.
    pub async fn status(&self, cancel: &CancellationToken) -> FederationStatus {
        let host = self.layout.collector_host.clone();
        let targets: Vec<_> = self
            .config
            .shards
            .iter()
            .map(|s| (s.name.clone(), (host.clone(), s.collector.port)))
            .collect();

        let central_port = self.config.central.effective_port();
        let central_probe = tokio::spawn(probe(host.clone(), central_port, cancel.clone()));
        let cancel = cancel.clone();
        let probes = scatter(targets, move |(host, port)| probe(host, port, cancel.clone())).await;

        let shards: Vec<ShardStatus> = self
            .config
            .shards
            .iter()
            .zip(probes)
            .map(|(shard, (_, outcome))| {
                let endpoint = format!("{}:{}", host, shard.collector.port);
                let result = outcome.unwrap_or_else(|e| Probe::failed(e.to_string()));
                ShardStatus {
                    name: shard.name.clone(),
                    endpoint,
                    node_count: shard.nodes.len(),
                    healthy: result.healthy,
                    metric_count: result.metric_count,
                    error: result.error,
                }
            })
            .collect();

        let central = central_probe
            .await
            .unwrap_or_else(|e| Probe::failed(e.to_string()));

        FederationStatus {
            enabled: self.config.enabled,
            backend: self.config.backend,
            shard_count: shards.len(),
            total_nodes: shards.iter().map(|s| s.node_count).sum(),
            healthy_count: shards.iter().filter(|s| s.healthy).count(),
            shards,
            central: CentralStatus {
                endpoint: format!("{}:{}", host, central_port),
                healthy: central.healthy,
                metric_count: central.metric_count,
                error: central.error,
            },
            checked_at: chrono::Utc::now(),
        }
    }

    /// Stop every collector unit and remove the generated configs
    ///
    /// A unit that fails to stop is reported, not fatal.
    pub async fn disable(&self) -> Result<DisableReport, FederationError> {
        let mut report = DisableReport::default();
        let units = self
            .config
            .shards
            .iter()
            .map(|s| shard_unit(&s.name))
            .chain(std::iter::once(central_unit()));

        for unit in units {
            match self.services.stop(&unit).await {
                Ok(()) => report.stopped.push(unit),
                Err(e) => {
                    warn!("Failed to stop {}: {}", unit, e);
                    report.failed.push((unit, e.to_string()));
                }
            }
        }

        if fs::try_exists(&self.layout.config_dir).await? {
            fs::remove_dir_all(&self.layout.config_dir).await?;
            info!("Removed {}", self.layout.config_dir.display());
        }
        Ok(report)
    }
}

struct Probe {
    healthy: bool,
    metric_count: i64,
    error: Option<String>,
}

impl Probe {
    fn failed(error: String) -> Self {
        Self {
            healthy: false,
            metric_count: 0,
            error: Some(error),
        }
    }
}

async fn probe(host: String, port: u32, cancel: CancellationToken) -> Probe {
    let client = match CollectorClient::new(&host, port, PROBE_TIMEOUT) {
        Ok(client) => client,
        Err(e) => return Probe::failed(e.to_string()),
    };

    let healthy = match client.healthy(&cancel).await {
        Ok(healthy) => healthy,
        Err(e) => return Probe::failed(e.to_string()),
    };

    let metric_count = match client.tsdb_stats(&cancel).await {
        Ok(stats) => stats.head_stats.num_series,
        Err(CollectorError::Cancelled) => return Probe::failed(CollectorError::Cancelled.to_string()),
        Err(_) => 0,
    };

    Probe {
        healthy,
        metric_count,
        error: None,
    }
}
