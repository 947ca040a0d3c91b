//! Federation plan persistence
//!
//! Stores the current `FederationConfig` as YAML next to the generated
//! artifacts so `status`, `rebalance` and `disable` see the deployed plan.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::FederationError;
use crate::types::FederationConfig;

pub const PLAN_FILE: &str = "federation.yaml";

/// File-backed plan store
#[derive(Debug, Clone)]
pub struct FederationStore {
    dir: PathBuf,
    plan_path: PathBuf,
}

impl FederationStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let plan_path = dir.join(PLAN_FILE);
        Self { dir, plan_path }
    }

    pub fn path(&self) -> &Path {
        &self.plan_path
    }

    /// Load the stored plan, `None` if nothing was saved yet
    pub async fn load(&self) -> Result<Option<FederationConfig>, FederationError> {
        if !fs::try_exists(&self.plan_path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.plan_path).await?;
        let config: FederationConfig = serde_yaml::from_str(&content)?;
        info!(
            "Loaded federation plan: {} shards, {} nodes",
            config.shards.len(),
            config.total_nodes()
        );
        Ok(Some(config))
    }

    pub async fn load_or_default(&self) -> Result<FederationConfig, FederationError> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Save the plan via temp file and rename
    pub async fn save(&self, config: &FederationConfig) -> Result<(), FederationError> {
        fs::create_dir_all(&self.dir).await?;

        let temp_path = self.plan_path.with_extension("yaml.tmp");
        let content = serde_yaml::to_string(config)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.plan_path).await?;

        info!("Saved federation plan with {} shards", config.shards.len());
        Ok(())
    }

    /// Copy the current plan to a timestamped backup
    pub async fn backup(&self) -> Result<PathBuf, FederationError> {
        if !fs::try_exists(&self.plan_path).await? {
            return Err(FederationError::NotFound(self.plan_path.clone()));
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = self.dir.join(format!("federation_{}.yaml.bak", timestamp));
        fs::copy(&self.plan_path, &backup_path).await?;
        info!("Backed up federation plan to {}", backup_path.display());
        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectorSettings, ShardConfig};

    #[tokio::test]
    async fn test_save_load_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FederationStore::new(dir.path().join("federation"));

        assert!(store.load().await.unwrap().is_none());
        assert!(matches!(
            store.backup().await,
            Err(FederationError::NotFound(_))
        ));
        assert_eq!(store.load_or_default().await.unwrap(), FederationConfig::default());

        let config = FederationConfig {
            enabled: true,
            shards: vec![ShardConfig {
                name: "shard-1".into(),
                nodes: vec!["gpu-01".into()],
                racks: Vec::new(),
                collector: CollectorSettings {
                    port: 9091,
                    storage_path: "/data/shard-1".into(),
                    retention: "7d".into(),
                },
            }],
            ..Default::default()
        };
        store.save(&config).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(config));
        assert!(!store.path().with_extension("yaml.tmp").exists());

        let backup = store.backup().await.unwrap();
        assert!(backup.exists());
    }
}
