//! Fleet exec - remote command execution engine
//!
//! Runs shell commands on cluster nodes over SSH.
//!
//! # Features
//! - One fresh authenticated connection per run, bounded by connect and command timeouts
//! - Retry with capped exponential backoff for transient failures only
//! - Bounded parallel fan-out over a node list, results in input order
//! - Streaming per-node callbacks and success/failure summaries
//!
//! # Usage Example
//! ```ignore
//! use fleet_exec::{Executor, ExecutorConfig};
//! use fleet_core::{CancellationToken, Node};
//!
//! let executor = Executor::new(ExecutorConfig::default());
//! let cancel = CancellationToken::new();
//! let results = executor.run_parallel(&nodes, "nvidia-smi -L", &cancel).await;
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod ssh;
pub mod transport;

// Re-export commonly used types
pub use config::ExecutorConfig;
pub use error::{ErrorClass, ExecError};
pub use executor::{ExecutionResult, ExecutionSummary, Executor};
pub use ssh::{HostKeyPolicy, SshConnector};
pub use transport::{CommandOutput, Connector, RemoteSession};
