//! Remote shell transport seam
//!
//! The executor only sees these traits. `SshConnector` is the production
//! implementation; tests plug in instrumented connectors.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::Node;

use crate::error::ExecError;

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr
    pub output: String,
    /// Exit status reported by the remote side, if any
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_status: Some(0),
        }
    }

    pub fn exited(output: impl Into<String>, code: u32) -> Self {
        Self {
            output: output.into(),
            exit_status: Some(code),
        }
    }
}

/// An authenticated connection to one node
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command` on a fresh session channel and wait for it to finish
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Tear down the connection, abandoning anything still running on it
    async fn close(self: Box<Self>);
}

/// Opens authenticated connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Read credentials, dial and authenticate within `connect_timeout`
    async fn connect(
        &self,
        node: &Node,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError>;
}
