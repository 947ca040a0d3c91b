//! Fleet multi-cluster aggregation
//!
//! Treats independently operated fleet clusters as peers: a registry lists
//! them, one REST client talks to each, and the aggregator merges their
//! status, alerts and events into a single view.

pub mod aggregator;
pub mod client;
pub mod error;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use aggregator::{Aggregator, AggregatorOptions, ReconcileReport};
pub use client::ClusterClient;
pub use error::{ClientError, RegistryError};
pub use registry::{ClusterSource, Registry, RegistryFile};
pub use types::{
    severity_rank, AggregatedMetrics, AlertKey, AlertState, ClusterConfig, ClusterEvent,
    ClusterHealth, ClusterIssue, ClusterMetrics, ClusterState, ClusterStatus, ClusterSummary,
    ClusterTrends, GlobalAlert, RemoteNode,
};
