//! Cluster registry entries and the snapshots fetched from remote clusters

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered remote cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Client certificate (PEM) for mutual TLS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
    /// Extra CA bundle (PEM) trusted for this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<String>,
    /// Lab use only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_tls_verify: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).map(String::as_str) == Some(value)
    }
}

/// Coarse cluster state shown in summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Healthy,
    Warning,
    Critical,
    Offline,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Healthy => write!(f, "healthy"),
            ClusterState::Warning => write!(f, "warning"),
            ClusterState::Critical => write!(f, "critical"),
            ClusterState::Offline => write!(f, "offline"),
        }
    }
}

/// `GET /api/v1/status`
///
/// `name`, `endpoint`, `connected` and `last_sync` are stamped by the client,
/// not trusted from the remote body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStatus {
    pub name: String,
    pub endpoint: String,
    pub nodes: u32,
    pub healthy_nodes: u32,
    pub total_gpus: u32,
    pub healthy_gpus: u32,
    pub health_score: f64,
    pub connected: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub alerts_active: u32,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClusterStatus {
    /// Placeholder for a cluster that could not be queried
    pub fn disconnected(name: &str, endpoint: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            connected: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn state(&self) -> ClusterState {
        if !self.connected {
            ClusterState::Offline
        } else if self.health_score >= 90.0 {
            ClusterState::Healthy
        } else if self.health_score >= 70.0 {
            ClusterState::Warning
        } else {
            ClusterState::Critical
        }
    }

    /// `offline`, `healthy` (score >= 90), `warning` (>= 70) or `critical`
    pub fn status_string(&self) -> String {
        self.state().to_string()
    }

    pub fn to_summary(&self) -> ClusterSummary {
        ClusterSummary {
            name: self.name.clone(),
            nodes: self.nodes,
            gpus: self.total_gpus,
            health_score: self.health_score,
            alerts: self.alerts_active,
            status: self.state(),
        }
    }

    pub fn to_metrics(&self) -> ClusterMetrics {
        ClusterMetrics {
            nodes: self.nodes,
            healthy_nodes: self.healthy_nodes,
            gpus: self.total_gpus,
            healthy_gpus: self.healthy_gpus,
            health_score: self.health_score,
            alert_count: self.alerts_active,
            connected: self.connected,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Firing,
    Pending,
    Resolved,
}

/// Rank used to order alerts: critical, warning, info, then anything else
pub fn severity_rank(severity: &str) -> u8 {
    match severity {
        "critical" => 0,
        "warning" => 1,
        "info" => 2,
        _ => 3,
    }
}

/// An alert from any cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAlert {
    #[serde(default)]
    pub cluster: String,
    pub alert_name: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub fired_at: DateTime<Utc>,
    #[serde(default)]
    pub state: AlertState,
}

/// Identity used to recognise an alert across polls
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub cluster: String,
    pub alert_name: String,
    pub node: String,
}

impl GlobalAlert {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            cluster: self.cluster.clone(),
            alert_name: self.alert_name.clone(),
            node: self.node.clone(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == "critical"
    }

    /// Severity rank, then newest first; ties broken by cluster and name
    pub fn merge_order(a: &GlobalAlert, b: &GlobalAlert) -> Ordering {
        severity_rank(&a.severity)
            .cmp(&severity_rank(&b.severity))
            .then_with(|| b.fired_at.cmp(&a.fired_at))
            .then_with(|| a.cluster.cmp(&b.cluster))
            .then_with(|| a.alert_name.cmp(&b.alert_name))
    }
}

/// An event in a cluster (node down, GPU error, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    #[serde(default)]
    pub cluster: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl ClusterEvent {
    /// Newest first; ties broken by cluster
    pub fn merge_order(a: &ClusterEvent, b: &ClusterEvent) -> Ordering {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.cluster.cmp(&b.cluster))
    }
}

/// `GET /api/v1/health`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterHealth {
    pub status: ClusterStatus,
    pub top_issues: Vec<ClusterIssue>,
    pub recent_alerts: Vec<GlobalAlert>,
    pub trends: ClusterTrends,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIssue {
    pub severity: String,
    /// `gpu`, `node`, `network`, ...
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_nodes: Vec<String>,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterTrends {
    /// `improving`, `stable` or `degrading`
    pub health_trend: String,
    /// `increasing`, `stable` or `decreasing`
    pub alert_trend: String,
    pub node_change: i32,
    pub gpu_change: i32,
}

/// `GET /api/v1/metrics`, also the per-cluster entry of `AggregatedMetrics`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterMetrics {
    pub nodes: u32,
    pub healthy_nodes: u32,
    pub gpus: u32,
    pub healthy_gpus: u32,
    pub health_score: f64,
    pub alert_count: u32,
    pub connected: bool,
}

/// Rollup across every registered cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_nodes: u32,
    pub healthy_nodes: u32,
    pub total_gpus: u32,
    pub healthy_gpus: u32,
    /// Mean health score of connected clusters only
    pub average_health: f64,
    pub active_alerts: u32,
    pub cluster_count: usize,
    pub connected_count: usize,
    pub cluster_breakdown: BTreeMap<String, ClusterMetrics>,
}

impl AggregatedMetrics {
    pub fn from_statuses(statuses: &[ClusterStatus]) -> Self {
        let mut metrics = AggregatedMetrics {
            timestamp: Utc::now(),
            total_nodes: 0,
            healthy_nodes: 0,
            total_gpus: 0,
            healthy_gpus: 0,
            average_health: 0.0,
            active_alerts: 0,
            cluster_count: statuses.len(),
            connected_count: 0,
            cluster_breakdown: BTreeMap::new(),
        };

        let mut health_sum = 0.0;
        for status in statuses {
            // Remote-supplied counts saturate instead of wrapping
            metrics.total_nodes = metrics.total_nodes.saturating_add(status.nodes);
            metrics.healthy_nodes = metrics.healthy_nodes.saturating_add(status.healthy_nodes);
            metrics.total_gpus = metrics.total_gpus.saturating_add(status.total_gpus);
            metrics.healthy_gpus = metrics.healthy_gpus.saturating_add(status.healthy_gpus);
            metrics.active_alerts = metrics.active_alerts.saturating_add(status.alerts_active);
            if status.connected {
                metrics.connected_count += 1;
                health_sum += status.health_score;
            }
            metrics
                .cluster_breakdown
                .insert(status.name.clone(), status.to_metrics());
        }

        if metrics.connected_count > 0 {
            metrics.average_health = health_sum / metrics.connected_count as f64;
        }
        metrics
    }
}

/// One line of `clusters status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub name: String,
    pub nodes: u32,
    pub gpus: u32,
    pub health_score: f64,
    pub alerts: u32,
    pub status: ClusterState,
}

/// `GET /api/v1/nodes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub health_score: f64,
    #[serde(default)]
    pub status: String,
}
