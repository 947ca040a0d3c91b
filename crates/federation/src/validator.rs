//! Shard plan validation
//!
//! Every problem is collected; nothing fails fast.

use std::collections::{HashMap, HashSet};

use crate::error::FederationError;
use crate::types::{FederationConfig, ShardConfig};

/// One problem found in a shard plan
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("shard name is required")]
    MissingName,
    #[error("shard {shard} has no nodes assigned")]
    NoNodes { shard: String },
    #[error("shard {shard} has invalid port: {port}")]
    InvalidPort { shard: String, port: u32 },
    #[error("shard {shard} has no storage path")]
    MissingStoragePath { shard: String },
    #[error("duplicate shard name: {shard}")]
    DuplicateName { shard: String },
    #[error("port {port} used by both {first} and {second}")]
    PortConflict {
        port: u32,
        first: String,
        second: String,
    },
    #[error("node {node} assigned to both {first} and {second}")]
    NodeConflict {
        node: String,
        first: String,
        second: String,
    },
}

/// Shard plan validator
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardValidator;

impl ShardValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check a single shard in isolation
    pub fn validate(&self, shard: &ShardConfig) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if shard.name.is_empty() {
            issues.push(ValidationIssue::MissingName);
        }
        if shard.nodes.is_empty() {
            issues.push(ValidationIssue::NoNodes {
                shard: shard.name.clone(),
            });
        }
        if shard.collector.port == 0 || shard.collector.port > u16::MAX as u32 {
            issues.push(ValidationIssue::InvalidPort {
                shard: shard.name.clone(),
                port: shard.collector.port,
            });
        }
        if shard.collector.storage_path.as_os_str().is_empty() {
            issues.push(ValidationIssue::MissingStoragePath {
                shard: shard.name.clone(),
            });
        }

        issues
    }

    /// Check every shard, then cross-check names, ports and node assignments
    pub fn validate_all(&self, shards: &[ShardConfig]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut names: HashSet<&str> = HashSet::new();
        let mut ports: HashMap<u32, &str> = HashMap::new();
        let mut nodes: HashMap<&str, &str> = HashMap::new();

        for shard in shards {
            issues.extend(self.validate(shard));

            if !names.insert(shard.name.as_str()) {
                issues.push(ValidationIssue::DuplicateName {
                    shard: shard.name.clone(),
                });
            }

            match ports.get(&shard.collector.port) {
                Some(first) => issues.push(ValidationIssue::PortConflict {
                    port: shard.collector.port,
                    first: first.to_string(),
                    second: shard.name.clone(),
                }),
                None => {
                    ports.insert(shard.collector.port, shard.name.as_str());
                }
            }

            for node in &shard.nodes {
                match nodes.get(node.as_str()) {
                    Some(first) => issues.push(ValidationIssue::NodeConflict {
                        node: node.clone(),
                        first: first.to_string(),
                        second: shard.name.clone(),
                    }),
                    None => {
                        nodes.insert(node.as_str(), shard.name.as_str());
                    }
                }
            }
        }

        issues
    }
}

impl FederationConfig {
    /// Validate the shard plan, reporting every issue at once
    pub fn validate(&self) -> Result<(), FederationError> {
        let issues = ShardValidator::new().validate_all(&self.shards);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(FederationError::Invalid(issues))
        }
    }
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
    fn test_valid_plan() {
        let shards = vec![
            shard("shard-1", 9091, &["a", "b"]),
            shard("shard-2", 9092, &["c"]),
        ];
        assert!(ShardValidator::new().validate_all(&shards).is_empty());
    }

    #[test]
    fn test_single_shard_problems_all_reported() {
        let mut bad = shard("", 70000, &[]);
        bad.collector.storage_path = Default::default();

        let issues = ShardValidator::new().validate(&bad);
        assert_eq!(issues.len(), 4);
        assert!(issues.contains(&ValidationIssue::MissingName));
        assert!(issues.contains(&ValidationIssue::InvalidPort {
            shard: String::new(),
            port: 70000
        }));
    }

    #[test]
    fn test_port_conflict_names_both_shards() {
        let shards = vec![
            shard("shard-a", 9091, &["a"]),
            shard("shard-b", 9091, &["b"]),
        ];
        let issues = ShardValidator::new().validate_all(&shards);

        assert_eq!(
            issues,
            vec![ValidationIssue::PortConflict {
                port: 9091,
                first: "shard-a".into(),
                second: "shard-b".into(),
            }]
        );
        let message = issues[0].to_string();
        assert!(message.contains("shard-a") && message.contains("shard-b"));
    }

    #[test]
    fn test_node_conflict_names_node_and_shards() {
        let shards = vec![
            shard("shard-1", 9091, &["gpu-01", "gpu-02"]),
            shard("shard-2", 9092, &["gpu-02"]),
        ];
        let issues = ShardValidator::new().validate_all(&shards);

        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].to_string(),
            "node gpu-02 assigned to both shard-1 and shard-2"
        );
    }

    #[test]
    fn test_all_conflicts_collected_in_one_pass() {
        let shards = vec![
            shard("dup", 9091, &["n1"]),
            shard("dup", 9091, &["n1"]),
            shard("other", 0, &["n2"]),
        ];
        let issues = ShardValidator::new().validate_all(&shards);

        assert!(issues.contains(&ValidationIssue::DuplicateName { shard: "dup".into() }));
        assert!(issues.iter().any(|i| matches!(i, ValidationIssue::PortConflict { .. })));
        assert!(issues.iter().any(|i| matches!(i, ValidationIssue::NodeConflict { .. })));
        assert!(issues.iter().any(|i| matches!(i, ValidationIssue::InvalidPort { .. })));
        assert_eq!(issues.len(), 4);

        let config = FederationConfig {
            shards,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.issues().len(), 4);
        assert!(err.to_string().starts_with("invalid shard plan: "));
    }
}
