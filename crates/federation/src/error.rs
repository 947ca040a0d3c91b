//! Federation errors

use std::path::PathBuf;

use crate::collector::CollectorError;
use crate::validator::ValidationIssue;

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("manual sharding takes a hand-written plan; nothing to compute")]
    ManualStrategy,
    #[error("federation plan has no shards")]
    NoShards,
    #[error("invalid shard plan: {}", format_issues(.0))]
    Invalid(Vec<ValidationIssue>),
    #[error("invalid move {node} {from} -> {to}: {reason}")]
    InvalidMove {
        node: String,
        from: String,
        to: String,
        reason: String,
    },
    #[error("deploy shard {shard}: {source}")]
    ShardDeploy {
        shard: String,
        #[source]
        source: Box<FederationError>,
    },
    #[error("deploy central: {0}")]
    CentralDeploy(#[source] Box<FederationError>),
    #[error("service {unit}: {reason}")]
    Service { unit: String, reason: String },
    #[error("collector: {0}")]
    Collector(#[from] CollectorError),
}

impl FederationError {
    /// Validation issues, if this is a validation failure
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            FederationError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

impl From<serde_yaml::Error> for FederationError {
    fn from(e: serde_yaml::Error) -> Self {
        FederationError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(e: serde_json::Error) -> Self {
        FederationError::Serialization(e.to_string())
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
