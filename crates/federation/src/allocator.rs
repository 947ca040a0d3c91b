//! Shard allocation
//!
//! Pure function of the node list, the strategy and the policy.

use std::collections::BTreeMap;

use fleet_core::Node;
use tracing::debug;

use crate::error::FederationError;
use crate::policy::ShardingPolicy;
use crate::types::{CollectorSettings, ShardConfig, ShardingStrategy};

/// Computes shard plans
#[derive(Debug, Clone, Default)]
pub struct ShardAllocator {
    policy: ShardingPolicy,
}

impl ShardAllocator {
    pub fn new(policy: ShardingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ShardingPolicy {
        &self.policy
    }

    /// Partition `nodes` into shards
    ///
    /// `shard_count` only applies to the even-split strategies; `None` or 0
    /// picks a count from the policy. An empty node list yields an empty plan.
    pub fn calculate_shards(
        &self,
        nodes: &[Node],
        strategy: ShardingStrategy,
        shard_count: Option<usize>,
    ) -> Result<Vec<ShardConfig>, FederationError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let shards = match strategy {
            ShardingStrategy::Auto | ShardingStrategy::Count => self.by_count(nodes, shard_count),
            ShardingStrategy::Rack => self.by_rack(nodes),
            ShardingStrategy::Manual => return Err(FederationError::ManualStrategy),
        };

        debug!(
            strategy = %strategy,
            nodes = nodes.len(),
            shards = shards.len(),
            "Calculated shard plan"
        );
        Ok(shards)
    }

    fn collector(&self, index: usize, suffix: &str) -> CollectorSettings {
        CollectorSettings {
            port: self.policy.port_for(index),
            storage_path: self.policy.storage_path(suffix),
            retention: self.policy.retention.clone(),
        }
    }

    /// Even split: sizes differ by at most one, larger shards first
    fn by_count(&self, nodes: &[Node], shard_count: Option<usize>) -> Vec<ShardConfig> {
        let requested = shard_count
            .filter(|&c| c > 0)
            .unwrap_or_else(|| self.policy.recommended_shard_count(nodes.len()));
        let count = requested.clamp(1, nodes.len());

        let base = nodes.len() / count;
        let remainder = nodes.len() % count;

        let mut remaining = nodes.iter();
        (0..count)
            .map(|i| {
                let size = base + usize::from(i < remainder);
                let suffix = (i + 1).to_string();
                ShardConfig {
                    name: format!("shard-{}", suffix),
                    nodes: remaining.by_ref().take(size).map(|n| n.name.clone()).collect(),
                    racks: Vec::new(),
                    collector: self.collector(i, &suffix),
                }
            })
            .collect()
    }

    /// One shard per rack label, in rack-name order
    fn by_rack(&self, nodes: &[Node]) -> Vec<ShardConfig> {
        let mut racks: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for node in nodes {
            racks.entry(node.rack()).or_default().push(node.name.clone());
        }

        racks
            .into_iter()
            .enumerate()
            .map(|(i, (rack, members))| ShardConfig {
                name: format!("shard-{}", rack),
                nodes: members,
                racks: vec![rack.to_string()],
                collector: self.collector(i, rack),
            })
            .collect()
    }
}
