//! Shard rebalancing
//!
//! Suggesting moves and applying them are separate steps. Planners only read
//! the plan; `apply_moves` is the one place that mutates it.

use std::collections::HashSet;

use tracing::debug;

use crate::error::FederationError;
use crate::types::{NodeMove, ShardConfig};

/// `(max - min) / max` over shard sizes; 0 is perfectly balanced
pub fn imbalance(shards: &[ShardConfig]) -> f64 {
    let sizes = shards.iter().map(ShardConfig::node_count);
    let (Some(min), Some(max)) = (sizes.clone().min(), sizes.max()) else {
        return 0.0;
    };
    if max == 0 {
        return 0.0;
    }
    (max - min) as f64 / max as f64
}

/// Produces suggested moves for a shard plan
pub trait RebalancePlanner: Send + Sync {
    fn plan(&self, shards: &[ShardConfig]) -> Vec<NodeMove>;
}

/// Greedy excess-to-deficit planner
///
/// Target size is `total / shard_count`. Shards above target give nodes from
/// the tail of their list to shards below target, one at a time, until one
/// side is satisfied. Simulated sizes are tracked so no shard is overfilled and
/// no node moves twice. Not optimal for three or more unbalanced shards.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyPlanner;

impl RebalancePlanner for GreedyPlanner {
    fn plan(&self, shards: &[ShardConfig]) -> Vec<NodeMove> {
        if shards.len() <= 1 {
            return Vec::new();
        }

        let total: usize = shards.iter().map(ShardConfig::node_count).sum();
        let target = total / shards.len();
        let mut sizes: Vec<usize> = shards.iter().map(ShardConfig::node_count).collect();
        let mut moves = Vec::new();

        for (i, source) in shards.iter().enumerate() {
            let mut donors = source.nodes.iter().rev();

            for j in 0..shards.len() {
                if i == j || sizes[i] <= target {
                    continue;
                }
                while sizes[j] < target && sizes[i] > target {
                    let Some(node) = donors.next() else { break };
                    moves.push(NodeMove {
                        node: node.clone(),
                        from_shard: source.name.clone(),
                        to_shard: shards[j].name.clone(),
                    });
                    sizes[i] -= 1;
                    sizes[j] += 1;
                }
            }
        }

        moves
    }
}

/// Imbalance metric plus a pluggable move planner
pub struct ShardRebalancer {
    planner: Box<dyn RebalancePlanner>,
}

impl Default for ShardRebalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShardRebalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRebalancer").finish_non_exhaustive()
    }
}

impl ShardRebalancer {
    pub fn new() -> Self {
        Self::with_planner(GreedyPlanner)
    }

    pub fn with_planner(planner: impl RebalancePlanner + 'static) -> Self {
        Self {
            planner: Box::new(planner),
        }
    }

    pub fn imbalance(&self, shards: &[ShardConfig]) -> f64 {
        imbalance(shards)
    }

    /// Suggested moves; `shards` is not modified
    pub fn suggest_rebalance(&self, shards: &[ShardConfig]) -> Vec<NodeMove> {
        let moves = self.planner.plan(shards);
        debug!(
            shards = shards.len(),
            moves = moves.len(),
            imbalance = imbalance(shards),
            "Suggested rebalance"
        );
        moves
    }
}

/// Apply `moves` to `shards`
///
/// All moves are checked before any is applied; an invalid move leaves the
/// plan untouched.
pub fn apply_moves(shards: &mut [ShardConfig], moves: &[NodeMove]) -> Result<(), FederationError> {
    let invalid = |m: &NodeMove, reason: &str| FederationError::InvalidMove {
        node: m.node.clone(),
        from: m.from_shard.clone(),
        to: m.to_shard.clone(),
        reason: reason.to_string(),
    };

    let mut moved = HashSet::new();
    for m in moves {
        let from = shards
            .iter()
            .find(|s| s.name == m.from_shard)
            .ok_or_else(|| invalid(m, "unknown source shard"))?;
        if !shards.iter().any(|s| s.name == m.to_shard) {
            return Err(invalid(m, "unknown target shard"));
        }
        if !from.nodes.contains(&m.node) {
            return Err(invalid(m, "node not in source shard"));
        }
        if !moved.insert(m.node.as_str()) {
            return Err(invalid(m, "node moved more than once"));
        }
    }

    for m in moves {
        if let Some(from) = shards.iter_mut().find(|s| s.name == m.from_shard) {
            from.nodes.retain(|n| n != &m.node);
        }
        if let Some(to) = shards.iter_mut().find(|s| s.name == m.to_shard) {
            to.nodes.push(m.node.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(name: &str, size: usize) -> ShardConfig {
        ShardConfig {
            name: name.to_string(),
            nodes: (0..size).map(|i| format!("{}-n{}", name, i)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_imbalance() {
        assert_eq!(imbalance(&[shard("a", 5), shard("b", 5), shard("c", 5)]), 0.0);
        assert!((imbalance(&[shard("a", 10), shard("b", 2)]) - 0.8).abs() < 1e-9);
        assert_eq!(imbalance(&[]), 0.0);
        assert_eq!(imbalance(&[shard("a", 0), shard("b", 0)]), 0.0);
    }

    #[test]
    fn test_two_shard_rebalance() {
        let mut shards = vec![shard("a", 10), shard("b", 2)];
        let moves = ShardRebalancer::new().suggest_rebalance(&shards);

        assert_eq!(moves.len(), 4);
        assert!(moves.iter().all(|m| m.from_shard == "a" && m.to_shard == "b"));
        assert_eq!(moves[0].node, "a-n9");
        // Suggestion does not mutate
        assert_eq!(shards[0].nodes.len(), 10);

        apply_moves(&mut shards, &moves).unwrap();
        assert_eq!(shards[0].nodes.len(), 6);
        assert_eq!(shards[1].nodes.len(), 6);
        assert_eq!(imbalance(&shards), 0.0);
    }

    #[test]
    fn test_three_shard_rebalance_never_overfills() {
        let mut shards = vec![shard("a", 7), shard("b", 7), shard("c", 1)];
        let moves = GreedyPlanner.plan(&shards);

        assert_eq!(moves.len(), 4);
        let nodes: HashSet<_> = moves.iter().map(|m| m.node.as_str()).collect();
        assert_eq!(nodes.len(), 4);

        apply_moves(&mut shards, &moves).unwrap();
        let sizes: Vec<_> = shards.iter().map(|s| s.nodes.len()).collect();
        assert_eq!(sizes, vec![5, 5, 5]);
    }

    #[test]
    fn test_balanced_and_single_shard_plans_are_empty() {
        assert!(GreedyPlanner.plan(&[shard("a", 4), shard("b", 4)]).is_empty());
        assert!(GreedyPlanner.plan(&[shard("a", 9)]).is_empty());
        // Remainder nodes stay where they are
        assert!(GreedyPlanner.plan(&[shard("a", 4), shard("b", 3), shard("c", 3)]).is_empty());
    }

    #[test]
    fn test_custom_planner() {
        struct Nothing;
        impl RebalancePlanner for Nothing {
            fn plan(&self, _: &[ShardConfig]) -> Vec<NodeMove> {
                Vec::new()
            }
        }
        let rebalancer = ShardRebalancer::with_planner(Nothing);
        assert!(rebalancer
            .suggest_rebalance(&[shard("a", 10), shard("b", 0)])
            .is_empty());
        assert_eq!(rebalancer.imbalance(&[shard("a", 10), shard("b", 0)]), 1.0);
    }

    #[test]
    fn test_invalid_move_leaves_plan_untouched() {
        let mut shards = vec![shard("a", 3), shard("b", 1)];
        let moves = vec![
            NodeMove {
                node: "a-n0".into(),
                from_shard: "a".into(),
                to_shard: "b".into(),
            },
            NodeMove {
                node: "ghost".into(),
                from_shard: "a".into(),
                to_shard: "b".into(),
            },
        ];

        let err = apply_moves(&mut shards, &moves).unwrap_err();
        assert!(matches!(err, FederationError::InvalidMove { ref node, .. } if node == "ghost"));
        assert_eq!(shards[0].nodes.len(), 3);
        assert_eq!(shards[1].nodes.len(), 1);
    }
}
