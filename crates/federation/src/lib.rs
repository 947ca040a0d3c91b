//! Fleet federation - monitoring shard engine
//!
//! Partitions nodes across metrics-collector shards and federates them into a
//! central collector.
//!
//! # Modules
//! - `allocator`: compute a shard plan from a node list (count or rack strategy)
//! - `validator`: collect every conflict in a plan in one pass
//! - `rebalance`: imbalance metric and pluggable move planners
//! - `render`: collector configs, target files, units, recording rules
//! - `deploy`: write artifacts, probe collectors, tear down
//! - `collector`: HTTP client for one collector
//! - `store`: YAML persistence of the current plan

pub mod allocator;
pub mod collector;
pub mod deploy;
pub mod error;
pub mod policy;
pub mod rebalance;
pub mod render;
pub mod service;
pub mod store;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use allocator::ShardAllocator;
pub use collector::{CollectorClient, CollectorError};
pub use deploy::{DeployLayout, DeployReport, DisableReport, FederationManager};
pub use error::FederationError;
pub use policy::{ShardThreshold, ShardingPolicy};
pub use rebalance::{apply_moves, imbalance, GreedyPlanner, RebalancePlanner, ShardRebalancer};
pub use service::{ServiceManager, Systemctl};
pub use store::FederationStore;
pub use types::{
    CentralConfig, CentralStatus, CollectorSettings, FederationBackend, FederationConfig,
    FederationStatus, NodeMove, ShardConfig, ShardStatus, ShardingStrategy,
};
pub use validator::{ShardValidator, ValidationIssue};
