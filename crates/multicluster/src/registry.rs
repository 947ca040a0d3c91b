//! Cluster registry
//!
//! The persisted list of remote clusters the aggregator fans out to. Stored as
//! YAML with owner-only permissions since entries carry API keys.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::types::ClusterConfig;

/// Anything that can list the clusters to aggregate over
pub trait ClusterSource: Send + Sync {
    /// Registered clusters, sorted by name
    fn clusters(&self) -> Vec<ClusterConfig>;
}

impl ClusterSource for Vec<ClusterConfig> {
    fn clusters(&self) -> Vec<ClusterConfig> {
        let mut list = self.clone();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// On-disk registry format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

/// File-backed cluster registry; every mutation is written through
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    clusters: RwLock<BTreeMap<String, ClusterConfig>>,
}

impl Registry {
    /// Empty registry bound to `path`; call `load` to read existing entries
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            clusters: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open and load in one step
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let registry = Self::new(path);
        registry.load()?;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory entries with the file contents; a missing file is an empty registry
    pub fn load(&self) -> Result<(), RegistryError> {
        if !self.path.exists() {
            debug!("No cluster registry at {}", self.path.display());
            return Ok(());
        }

        let content = fs::read_to_string(&self.path)?;
        let file: RegistryFile = serde_yaml::from_str(&content)?;

        let mut clusters = self.clusters.write();
        clusters.clear();
        for cluster in file.clusters {
            if clusters.contains_key(&cluster.name) {
                warn!("Duplicate cluster {} in registry, keeping the last entry", cluster.name);
            }
            clusters.insert(cluster.name.clone(), cluster);
        }
        info!("Loaded {} clusters from {}", clusters.len(), self.path.display());
        Ok(())
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        let clusters = self.clusters.read();
        self.write_file(&clusters)
    }

    /// Write via temp file and rename, mode 0600
    fn write_file(&self, clusters: &BTreeMap<String, ClusterConfig>) -> Result<(), RegistryError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = RegistryFile {
            clusters: clusters.values().cloned().collect(),
        };
        let content = serde_yaml::to_string(&file)?;

        let temp_path = self.path.with_extension("yaml.tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut temp = options.open(&temp_path)?;
        temp.write_all(content.as_bytes())?;
        temp.sync_all()?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Apply `f` under the write lock and persist if it succeeds
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, ClusterConfig>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut clusters = self.clusters.write();
        let mut next = clusters.clone();
        let value = f(&mut next)?;
        self.write_file(&next)?;
        *clusters = next;
        Ok(value)
    }

    /// Register a new cluster
    pub fn add(&self, cluster: ClusterConfig) -> Result<(), RegistryError> {
        if cluster.name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        if cluster.endpoint.is_empty() {
            return Err(RegistryError::MissingEndpoint);
        }

        self.mutate(|clusters| {
            if clusters.contains_key(&cluster.name) {
                return Err(RegistryError::AlreadyExists(cluster.name.clone()));
            }
            info!("Registered cluster {} at {}", cluster.name, cluster.endpoint);
            clusters.insert(cluster.name.clone(), cluster);
            Ok(())
        })
    }

    /// Replace an existing cluster's entry
    pub fn update(&self, cluster: ClusterConfig) -> Result<(), RegistryError> {
        self.mutate(|clusters| match clusters.get_mut(&cluster.name) {
            Some(existing) => {
                *existing = cluster;
                Ok(())
            }
            None => Err(RegistryError::NotFound(cluster.name.clone())),
        })
    }

    pub fn remove(&self, name: &str) -> Result<ClusterConfig, RegistryError> {
        self.mutate(|clusters| {
            clusters
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))
        })
    }

    pub fn get(&self, name: &str) -> Option<ClusterConfig> {
        self.clusters.read().get(name).cloned()
    }

    /// All clusters sorted by name
    pub fn list(&self) -> Vec<ClusterConfig> {
        self.clusters.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.clusters.read().contains_key(name)
    }

    pub fn by_label(&self, key: &str, value: &str) -> Vec<ClusterConfig> {
        self.clusters
            .read()
            .values()
            .filter(|c| c.has_label(key, value))
            .cloned()
            .collect()
    }

    pub fn set_label(&self, name: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        self.mutate(|clusters| {
            let cluster = clusters
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            cluster.labels.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    pub fn remove_label(&self, name: &str, key: &str) -> Result<(), RegistryError> {
        self.mutate(|clusters| {
            let cluster = clusters
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            cluster.labels.remove(key);
            Ok(())
        })
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<(), RegistryError> {
        if new_name.is_empty() {
            return Err(RegistryError::MissingName);
        }

        self.mutate(|clusters| {
            if clusters.contains_key(new_name) {
                return Err(RegistryError::AlreadyExists(new_name.to_string()));
            }
            let mut cluster = clusters
                .remove(old_name)
                .ok_or_else(|| RegistryError::NotFound(old_name.to_string()))?;
            cluster.name = new_name.to_string();
            clusters.insert(new_name.to_string(), cluster);
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        self.mutate(|clusters| {
            clusters.clear();
            Ok(())
        })
    }

    /// Add or overwrite entries in bulk; entries without a name or endpoint are skipped
    ///
    /// Returns the number of entries imported.
    pub fn import(&self, entries: Vec<ClusterConfig>) -> Result<usize, RegistryError> {
        self.mutate(|clusters| {
            let mut imported = 0;
            for cluster in entries {
                if cluster.name.is_empty() || cluster.endpoint.is_empty() {
                    warn!("Skipping incomplete cluster entry {:?}", cluster.name);
                    continue;
                }
                clusters.insert(cluster.name.clone(), cluster);
                imported += 1;
            }
            Ok(imported)
        })
    }

    pub fn export(&self) -> RegistryFile {
        RegistryFile {
            clusters: self.list(),
        }
    }
}

impl ClusterSource for Registry {
    fn clusters(&self) -> Vec<ClusterConfig> {
        self.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("fleet/clusters.yaml"));
        (dir, registry)
    }

    #[test]
    fn test_add_and_reload() {
        let (_dir, registry) = registry();
        assert!(registry.load().is_ok());
        assert_eq!(registry.count(), 0);

        registry
            .add(ClusterConfig::new("west", "https://west:8443").with_api_key("secret"))
            .unwrap();
        registry.add(ClusterConfig::new("east", "https://east:8443")).unwrap();

        let reopened = Registry::open(registry.path()).unwrap();
        let names: Vec<_> = reopened.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["east", "west"]);
        assert_eq!(reopened.get("west").unwrap().api_key.as_deref(), Some("secret"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, registry) = registry();
        registry.add(ClusterConfig::new("east", "https://east:8443")).unwrap();
        let mode = fs::metadata(registry.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_add_rejects_incomplete_and_duplicate() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.add(ClusterConfig::new("", "https://x")),
            Err(RegistryError::MissingName)
        ));
        assert!(matches!(
            registry.add(ClusterConfig::new("x", "")),
            Err(RegistryError::MissingEndpoint)
        ));
        registry.add(ClusterConfig::new("x", "https://x")).unwrap();
        assert!(matches!(
            registry.add(ClusterConfig::new("x", "https://y")),
            Err(RegistryError::AlreadyExists(_))
        ));
        assert_eq!(registry.get("x").unwrap().endpoint, "https://x");
    }

    #[test]
    fn test_update_remove_and_not_found() {
        let (_dir, registry) = registry();
        registry.add(ClusterConfig::new("x", "https://x")).unwrap();

        registry.update(ClusterConfig::new("x", "https://x2")).unwrap();
        assert_eq!(registry.get("x").unwrap().endpoint, "https://x2");
        assert!(matches!(
            registry.update(ClusterConfig::new("y", "https://y")),
            Err(RegistryError::NotFound(_))
        ));

        let removed = registry.remove("x").unwrap();
        assert_eq!(removed.endpoint, "https://x2");
        assert!(!registry.exists("x"));
        assert!(matches!(registry.remove("x"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_labels_and_rename() {
        let (_dir, registry) = registry();
        registry.add(ClusterConfig::new("a", "https://a")).unwrap();
        registry.add(ClusterConfig::new("b", "https://b")).unwrap();

        registry.set_label("a", "env", "prod").unwrap();
        registry.set_label("b", "env", "lab").unwrap();
        let prod: Vec<_> = registry.by_label("env", "prod").into_iter().map(|c| c.name).collect();
        assert_eq!(prod, vec!["a"]);

        registry.remove_label("a", "env").unwrap();
        assert!(registry.by_label("env", "prod").is_empty());

        assert!(matches!(
            registry.rename("a", "b"),
            Err(RegistryError::AlreadyExists(_))
        ));
        registry.rename("b", "c").unwrap();
        assert!(!registry.exists("b"));
        assert!(registry.get("c").unwrap().has_label("env", "lab"));
    }

    #[test]
    fn test_import_skips_incomplete_entries() {
        let (_dir, registry) = registry();
        registry.add(ClusterConfig::new("a", "https://old")).unwrap();

        let imported = registry
            .import(vec![
                ClusterConfig::new("a", "https://new"),
                ClusterConfig::new("", "https://anon"),
                ClusterConfig::new("b", ""),
                ClusterConfig::new("c", "https://c"),
            ])
            .unwrap();

        assert_eq!(imported, 2);
        assert_eq!(registry.get("a").unwrap().endpoint, "https://new");
        assert_eq!(registry.export().clusters.len(), 2);

        registry.clear().unwrap();
        assert_eq!(Registry::open(registry.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_mutation_leaves_state_untouched() {
        let (_dir, registry) = registry();
        registry.add(ClusterConfig::new("a", "https://a")).unwrap();
        assert!(registry.set_label("missing", "k", "v").is_err());
        assert_eq!(registry.count(), 1);
    }
}
