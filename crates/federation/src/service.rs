//! Collector service control

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::FederationError;

/// Unit name prefix for collector services
pub const UNIT_PREFIX: &str = "fleet-collector";

/// Unit name for a shard collector
pub fn shard_unit(shard: &str) -> String {
    format!("{}-{}", UNIT_PREFIX, shard)
}

/// Unit name for the central collector
pub fn central_unit() -> String {
    format!("{}-central", UNIT_PREFIX)
}

/// Starts and stops collector services
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn start(&self, unit: &str) -> Result<(), FederationError>;
    async fn stop(&self, unit: &str) -> Result<(), FederationError>;
    async fn restart(&self, unit: &str) -> Result<(), FederationError>;
    /// Pick up changed unit files
    async fn daemon_reload(&self) -> Result<(), FederationError>;
}

/// `ServiceManager` backed by the `systemctl` binary
#[derive(Debug, Clone, Default)]
pub struct Systemctl;

impl Systemctl {
    async fn run(&self, args: &[&str], unit: &str) -> Result<(), FederationError> {
        debug!("systemctl {}", args.join(" "));
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .await
            .map_err(|e| FederationError::Service {
                unit: unit.to_string(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(FederationError::Service {
                unit: unit.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn start(&self, unit: &str) -> Result<(), FederationError> {
        self.run(&["start", unit], unit).await?;
        info!("Started {}", unit);
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), FederationError> {
        self.run(&["stop", unit], unit).await?;
        info!("Stopped {}", unit);
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<(), FederationError> {
        self.run(&["restart", unit], unit).await?;
        info!("Restarted {}", unit);
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<(), FederationError> {
        self.run(&["daemon-reload"], "daemon").await
    }
}
