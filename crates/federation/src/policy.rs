//! Sharding policy
//!
//! The node-count heuristic and shard defaults, as an explicit value the
//! caller owns rather than module-level tables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Clusters with fewer than `below` nodes get `shards` shards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardThreshold {
    pub below: usize,
    pub shards: usize,
}

fn default_thresholds() -> Vec<ShardThreshold> {
    [(100, 1), (300, 2), (500, 3), (1000, 5)]
        .into_iter()
        .map(|(below, shards)| ShardThreshold { below, shards })
        .collect()
}

fn default_nodes_per_shard() -> usize {
    200
}

fn default_base_port() -> u32 {
    9091
}

fn default_retention() -> String {
    "7d".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleet")
}

/// Inputs to shard allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingPolicy {
    /// Ascending node-count thresholds
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ShardThreshold>,
    /// Target shard size past the last threshold
    #[serde(default = "default_nodes_per_shard")]
    pub nodes_per_shard: usize,
    /// Listen port of the first shard; later shards count up from here
    #[serde(default = "default_base_port")]
    pub base_port: u32,
    #[serde(default = "default_retention")]
    pub retention: String,
    /// Parent of per-shard storage directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ShardingPolicy {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            nodes_per_shard: default_nodes_per_shard(),
            base_port: default_base_port(),
            retention: default_retention(),
            data_dir: default_data_dir(),
        }
    }
}

impl ShardingPolicy {
    /// Shard count for a cluster of `node_count` nodes
    pub fn recommended_shard_count(&self, node_count: usize) -> usize {
        if node_count == 0 {
            return 0;
        }
        if let Some(t) = self.thresholds.iter().find(|t| node_count < t.below) {
            return t.shards.max(1);
        }
        node_count.div_ceil(self.nodes_per_shard.max(1))
    }

    /// Port for the shard at `index` (0-based)
    pub fn port_for(&self, index: usize) -> u32 {
        self.base_port + index as u32
    }

    /// Storage directory for a shard identified by `suffix`
    pub fn storage_path(&self, suffix: &str) -> PathBuf {
        self.data_dir.join(format!("collector-shard-{}", suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommended_shard_count() {
        let policy = ShardingPolicy::default();
        assert_eq!(policy.recommended_shard_count(0), 0);
        assert_eq!(policy.recommended_shard_count(10), 1);
        assert_eq!(policy.recommended_shard_count(99), 1);
        assert_eq!(policy.recommended_shard_count(100), 2);
        assert_eq!(policy.recommended_shard_count(299), 2);
        assert_eq!(policy.recommended_shard_count(300), 3);
        assert_eq!(policy.recommended_shard_count(999), 5);
        assert_eq!(policy.recommended_shard_count(1000), 5);
        assert_eq!(policy.recommended_shard_count(1001), 6);
        assert_eq!(policy.recommended_shard_count(2400), 12);
    }

    #[test]
    fn test_custom_policy_from_yaml() {
        let yaml = "nodes_per_shard: 50\nbase_port: 19091\n";
        let policy: ShardingPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.thresholds, default_thresholds());
        assert_eq!(policy.recommended_shard_count(1010), 21);
        assert_eq!(policy.port_for(2), 19093);
        assert_eq!(
            policy.storage_path("3"),
            PathBuf::from("/var/lib/fleet/collector-shard-3")
        );
    }
}
