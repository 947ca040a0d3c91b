//! Federation artifact rendering
//!
//! Collector configs and rule files are built from typed structs and
//! serialized, so every generated file is valid YAML/JSON by construction.
//! Service units are plain text.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use fleet_core::Node;
use serde::Serialize;
use tracing::debug;

use crate::error::FederationError;
use crate::types::{CentralConfig, ShardConfig};

/// Node exporter port on every node
pub const NODE_EXPORTER_PORT: u16 = 9100;
/// GPU exporter port on every node
pub const GPU_EXPORTER_PORT: u16 = 9400;
/// Alertmanager address used by the central collector
pub const ALERTMANAGER_TARGET: &str = "localhost:9093";

const GENERATED_HEADER: &str = "# Generated by fleetctl - do not edit manually\n";

/// Series pulled from every shard by the central collector
pub const FEDERATE_MATCHERS: [&str; 4] = [
    r#"{__name__=~"DCGM.*"}"#,
    r#"{__name__=~"node.*"}"#,
    r#"{__name__=~"up"}"#,
    r#"{job=~".+"}"#,
];

#[derive(Debug, Serialize)]
struct CollectorConfigFile {
    global: GlobalSection,
    scrape_configs: Vec<ScrapeConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rule_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alerting: Option<AlertingSection>,
}

#[derive(Debug, Serialize)]
struct GlobalSection {
    scrape_interval: String,
    evaluation_interval: String,
    external_labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ScrapeConfig {
    job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    honor_labels: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_path: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    file_sd_configs: Vec<FileSdConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    static_configs: Vec<TargetGroup>,
}

impl ScrapeConfig {
    fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            honor_labels: None,
            metrics_path: None,
            params: BTreeMap::new(),
            file_sd_configs: Vec::new(),
            static_configs: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FileSdConfig {
    files: Vec<String>,
    refresh_interval: String,
}

#[derive(Debug, Serialize)]
struct AlertingSection {
    alertmanagers: Vec<AlertmanagerConfig>,
}

#[derive(Debug, Serialize)]
struct AlertmanagerConfig {
    static_configs: Vec<TargetGroup>,
}

/// A service-discovery target group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Target file for a shard's node exporters
pub fn node_targets_file(shard: &str) -> String {
    format!("{}-nodes.json", shard)
}

/// Target file for a shard's GPU exporters
pub fn gpu_targets_file(shard: &str) -> String {
    format!("{}-gpu.json", shard)
}

/// Config file name for a shard collector
pub fn shard_config_file(shard: &str) -> String {
    format!("collector-{}.yaml", shard)
}

pub const CENTRAL_CONFIG_FILE: &str = "collector-central.yaml";
pub const RULES_FILE: &str = "federation.yaml";

fn to_yaml<T: Serialize>(value: &T, title: &str) -> Result<String, FederationError> {
    let body = serde_yaml::to_string(value)?;
    Ok(format!("# {}\n{}\n{}", title, GENERATED_HEADER, body))
}

/// Collector config scraping only one shard's nodes via its target files
pub fn shard_collector_config(
    shard: &ShardConfig,
    cluster_name: &str,
    targets_dir: &Path,
) -> Result<String, FederationError> {
    let file_sd = |file: String| FileSdConfig {
        files: vec![targets_dir.join(file).display().to_string()],
        refresh_interval: "30s".to_string(),
    };

    let mut node_job = ScrapeConfig::new("node-exporter");
    node_job.file_sd_configs.push(file_sd(node_targets_file(&shard.name)));
    let mut gpu_job = ScrapeConfig::new("gpu-exporter");
    gpu_job.file_sd_configs.push(file_sd(gpu_targets_file(&shard.name)));

    let config = CollectorConfigFile {
        global: GlobalSection {
            scrape_interval: "15s".to_string(),
            evaluation_interval: "15s".to_string(),
            external_labels: BTreeMap::from([
                ("cluster".to_string(), cluster_name.to_string()),
                ("shard".to_string(), shard.name.clone()),
            ]),
        },
        scrape_configs: vec![node_job, gpu_job],
        rule_files: Vec::new(),
        alerting: None,
    };
    to_yaml(&config, &format!("Collector configuration for shard: {}", shard.name))
}

/// Exporter targets for the shard's nodes on `port`
///
/// Names with no matching node are skipped.
pub fn exporter_targets(shard: &ShardConfig, nodes: &[Node], port: u16) -> Vec<TargetGroup> {
    let by_name: HashMap<&str, &Node> = nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    shard
        .nodes
        .iter()
        .filter_map(|name| match by_name.get(name.as_str()) {
            Some(node) => Some(TargetGroup {
                targets: vec![format!("{}:{}", node.host, port)],
                labels: BTreeMap::from([
                    ("node".to_string(), node.name.clone()),
                    ("shard".to_string(), shard.name.clone()),
                ]),
            }),
            None => {
                debug!(shard = %shard.name, "Skipping unknown node {}", name);
                None
            }
        })
        .collect()
}

/// Serialized service-discovery file
pub fn targets_json(groups: &[TargetGroup]) -> Result<String, FederationError> {
    Ok(serde_json::to_string_pretty(groups)?)
}

/// Central collector config federating from every shard
pub fn central_collector_config(
    shards: &[ShardConfig],
    central: &CentralConfig,
    cluster_name: &str,
    rules_dir: &Path,
) -> Result<String, FederationError> {
    let mut federate = ScrapeConfig::new("federation");
    federate.honor_labels = Some(true);
    federate.metrics_path = Some("/federate".to_string());
    federate.params.insert(
        "match[]".to_string(),
        FEDERATE_MATCHERS.iter().map(|m| m.to_string()).collect(),
    );
    federate.static_configs = shards
        .iter()
        .map(|shard| TargetGroup {
            targets: vec![format!("localhost:{}", shard.collector.port)],
            labels: BTreeMap::from([("shard".to_string(), shard.name.clone())]),
        })
        .collect();

    let config = CollectorConfigFile {
        global: GlobalSection {
            scrape_interval: central.federate_interval.clone(),
            evaluation_interval: central.federate_interval.clone(),
            external_labels: BTreeMap::from([
                ("cluster".to_string(), cluster_name.to_string()),
                ("role".to_string(), "central".to_string()),
            ]),
        },
        scrape_configs: vec![federate],
        rule_files: vec![rules_dir.join("*.yaml").display().to_string()],
        alerting: Some(AlertingSection {
            alertmanagers: vec![AlertmanagerConfig {
                static_configs: vec![TargetGroup {
                    targets: vec![ALERTMANAGER_TARGET.to_string()],
                    labels: BTreeMap::new(),
                }],
            }],
        }),
    };
    to_yaml(&config, "Central collector - federation aggregator")
}

/// Inputs to a collector service unit
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub description: String,
    pub syslog_identifier: String,
    pub binary: PathBuf,
    pub user: String,
    pub config_path: PathBuf,
    pub storage_path: PathBuf,
    pub retention: String,
    pub port: u32,
}

/// systemd unit launching one collector
pub fn collector_unit(spec: &UnitSpec) -> String {
    format!(
        "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User={user}
Group={user}
ExecReload=/bin/kill -HUP $MAINPID
ExecStart={binary} \\
    --config.file={config} \\
    --storage.tsdb.path={storage} \\
    --storage.tsdb.retention.time={retention} \\
    --web.listen-address=:{port} \\
    --web.enable-lifecycle \\
    --web.enable-admin-api

SyslogIdentifier={syslog}
Restart=always
RestartSec=5

[Install]
WantedBy=multi-user.target
",
        description = spec.description,
        user = spec.user,
        binary = spec.binary.display(),
        config = spec.config_path.display(),
        storage = spec.storage_path.display(),
        retention = spec.retention,
        port = spec.port,
        syslog = spec.syslog_identifier,
    )
}

#[derive(Debug, Serialize)]
struct RuleFile {
    groups: Vec<RuleGroup>,
}

#[derive(Debug, Serialize)]
struct RuleGroup {
    name: String,
    interval: String,
    rules: Vec<RecordingRule>,
}

#[derive(Debug, Serialize)]
struct RecordingRule {
    record: String,
    expr: String,
}

/// Per-shard and cluster-wide GPU aggregates
const AGGREGATES: [(&str, &str); 5] = [
    ("avg", "DCGM_FI_DEV_GPU_UTIL"),
    ("sum", "DCGM_FI_DEV_FB_USED"),
    ("max", "DCGM_FI_DEV_GPU_TEMP"),
    ("sum", "DCGM_FI_DEV_POWER_USAGE"),
    ("count", "DCGM_FI_DEV_GPU_UTIL"),
];

fn aggregate_rules(level: &str, by: Option<&str>) -> Vec<RecordingRule> {
    let mut rules: Vec<_> = AGGREGATES
        .iter()
        .map(|(op, metric)| {
            let record = if *op == "count" {
                format!("{}:gpu:count", level)
            } else {
                format!("{}:{}:{}", level, metric, op)
            };
            let expr = match by {
                Some(label) => format!("{} by ({}) ({})", op, label, metric),
                None => format!("{}({})", op, metric),
            };
            RecordingRule { record, expr }
        })
        .collect();

    if let Some(label) = by {
        rules.push(RecordingRule {
            record: format!("{}:DCGM_FI_DEV_ECC_DBE_VOL_TOTAL:sum", level),
            expr: format!("sum by ({}) (DCGM_FI_DEV_ECC_DBE_VOL_TOTAL)", label),
        });
    }
    rules
}

/// Recording rules evaluated by the central collector
pub fn recording_rules() -> Result<String, FederationError> {
    let file = RuleFile {
        groups: vec![
            RuleGroup {
                name: "federation_aggregations".to_string(),
                interval: "60s".to_string(),
                rules: aggregate_rules("shard", Some("shard")),
            },
            RuleGroup {
                name: "cluster_aggregations".to_string(),
                interval: "60s".to_string(),
                rules: aggregate_rules("cluster", None),
            },
        ],
    };
    to_yaml(&file, "Recording rules for federation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CollectorSettings;

    fn shard(name: &str, port: u32, nodes: &[&str]) -> ShardConfig {
        ShardConfig {
            name: name.to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            racks: Vec::new(),
            collector: CollectorSettings {
                port,
                storage_path: format!("/data/{}", name).into(),
                retention: "7d".to_string(),
            },
        }
    }

    #[test]
    fn test_shard_config_is_scoped_to_shard() {
        let text =
            shard_collector_config(&shard("shard-2", 9092, &["a"]), "prod", Path::new("/t")).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();

        assert_eq!(parsed["global"]["external_labels"]["shard"], "shard-2");
        assert_eq!(parsed["global"]["external_labels"]["cluster"], "prod");
        let jobs = parsed["scrape_configs"].as_sequence().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs[0]["file_sd_configs"][0]["files"][0],
            "/t/shard-2-nodes.json"
        );
        assert_eq!(jobs[1]["file_sd_configs"][0]["files"][0], "/t/shard-2-gpu.json");
        assert!(text.starts_with("# Collector configuration for shard: shard-2\n"));
    }

    #[test]
    fn test_exporter_targets_skip_unknown_nodes() {
        let nodes = vec![
            Node::new("a", "10.0.0.1", "root", "/k"),
            Node::new("b", "10.0.0.2", "root", "/k"),
        ];
        let groups = exporter_targets(&shard("s", 9091, &["b", "ghost", "a"]), &nodes, 9400);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].targets, vec!["10.0.0.2:9400".to_string()]);
        assert_eq!(groups[0].labels["node"], "b");
        assert_eq!(groups[1].labels["shard"], "s");

        let json = targets_json(&groups).unwrap();
        let back: Vec<TargetGroup> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, groups);
    }

    #[test]
    fn test_central_config_federates_every_shard() {
        let shards = vec![shard("shard-1", 9091, &["a"]), shard("shard-2", 9092, &["b"])];
        let text = central_collector_config(
            &shards,
            &CentralConfig::default(),
            "prod",
            Path::new("/etc/fleet/rules"),
        )
        .unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();

        let job = &parsed["scrape_configs"][0];
        assert_eq!(job["metrics_path"], "/federate");
        assert_eq!(job["honor_labels"], true);
        assert_eq!(job["params"]["match[]"].as_sequence().unwrap().len(), 4);
        let statics = job["static_configs"].as_sequence().unwrap();
        assert_eq!(statics.len(), 2);
        assert_eq!(statics[1]["targets"][0], "localhost:9092");
        assert_eq!(statics[1]["labels"]["shard"], "shard-2");
        assert_eq!(parsed["global"]["scrape_interval"], "60s");
        assert_eq!(parsed["rule_files"][0], "/etc/fleet/rules/*.yaml");
    }

    #[test]
    fn test_collector_unit() {
        let unit = collector_unit(&UnitSpec {
            description: "Fleet collector shard-1".into(),
            syslog_identifier: "collector-shard-1".into(),
            binary: "/usr/bin/prometheus".into(),
            user: "prometheus".into(),
            config_path: "/etc/fleet/federation/collector-shard-1.yaml".into(),
            storage_path: "/data/shard-1".into(),
            retention: "7d".into(),
            port: 9091,
        });
        assert!(unit.contains("--web.listen-address=:9091"));
        assert!(unit.contains("--config.file=/etc/fleet/federation/collector-shard-1.yaml"));
        assert!(unit.contains("ExecStart=/usr/bin/prometheus \\\n"));
    }

    #[test]
    fn test_recording_rules() {
        let text = recording_rules().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        let groups = parsed["groups"].as_sequence().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["rules"].as_sequence().unwrap().len(), 6);
        assert_eq!(groups[1]["rules"].as_sequence().unwrap().len(), 5);
        assert_eq!(groups[0]["rules"][0]["record"], "shard:DCGM_FI_DEV_GPU_UTIL:avg");
        assert_eq!(
            groups[0]["rules"][0]["expr"],
            "avg by (shard) (DCGM_FI_DEV_GPU_UTIL)"
        );
        assert_eq!(groups[1]["rules"][4]["record"], "cluster:gpu:count");
    }
}
