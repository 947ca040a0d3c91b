//! Fleet core primitives
//!
//! Shared building blocks used by the execution engine, the shard engine and
//! the multi-cluster aggregator:
//! - `Node`: identity of a monitored machine reachable by remote shell
//! - `fanout`: scatter one operation to many named targets and merge results
//! - `cancel`: deadline-derived cancellation tokens

pub mod cancel;
pub mod fanout;
pub mod node;

// Re-export commonly used types
pub use cancel::{deadline, sleep_or_cancel, with_deadline, Interrupted};
pub use fanout::{scatter, scatter_merge, Gathered, TargetFailure, TaskError};
pub use node::{duplicate_names, Node, DEFAULT_RACK, DEFAULT_SSH_PORT};
pub use tokio_util::sync::CancellationToken;
