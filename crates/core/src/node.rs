//! Node identity definitions

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Default remote-shell port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Rack bucket for nodes without a `rack` label
pub const DEFAULT_RACK: &str = "default";

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A monitored machine
///
/// Supplied fresh by the caller for every call; nothing in the core keeps a
/// node registry of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node name
    pub name: String,
    /// Hostname or IP address
    #[serde(alias = "ip")]
    pub host: String,
    /// Remote-shell port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    #[serde(default)]
    pub user: String,
    /// Private key used for public-key authentication
    #[serde(default, alias = "ssh_key")]
    pub key_path: PathBuf,
    /// Free-form labels (`rack` drives rack-aware sharding)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl Node {
    /// Create a node on the default port
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            key_path: key_path.into(),
            labels: HashMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Port to dial, treating 0 as unset
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.port
        }
    }

    /// `host:port` dial address; IPv6 literals are bracketed
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.effective_port())
        } else {
            format!("{}:{}", self.host, self.effective_port())
        }
    }

    /// Rack label, falling back to the default bucket
    pub fn rack(&self) -> &str {
        self.labels
            .get("rack")
            .map(String::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_RACK)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.user, self.addr())
    }
}

/// Names that occur more than once in `nodes`, in first-seen order
pub fn duplicate_names(nodes: &[Node]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for node in nodes {
        if !seen.insert(node.name.as_str()) && reported.insert(node.name.as_str()) {
            duplicates.push(node.name.clone());
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_defaults_port() {
        let mut node = Node::new("gpu-01", "10.0.0.1", "root", "/root/.ssh/id_ed25519");
        assert_eq!(node.addr(), "10.0.0.1:22");

        node.port = 0;
        assert_eq!(node.addr(), "10.0.0.1:22");

        let node = node.with_port(2222);
        assert_eq!(node.addr(), "10.0.0.1:2222");
    }

    #[test]
    fn test_addr_brackets_ipv6() {
        let node = Node::new("gpu-01", "fe80::1", "root", "/k");
        assert_eq!(node.addr(), "[fe80::1]:22");
        assert!(node.addr().parse::<std::net::SocketAddr>().is_ok());

        let node = Node::new("gpu-02", "[::1]", "root", "/k").with_port(2222);
        assert_eq!(node.addr(), "[::1]:2222");
    }

    #[test]
    fn test_rack_label() {
        let node = Node::new("gpu-01", "10.0.0.1", "root", "/k");
        assert_eq!(node.rack(), DEFAULT_RACK);

        let node = node.with_label("rack", "r12");
        assert_eq!(node.rack(), "r12");
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let yaml = "name: gpu-01\nip: 10.0.0.1\nuser: admin\nssh_key: /keys/id\n";
        let node: Node = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.host, "10.0.0.1");
        assert_eq!(node.port, 22);
        assert_eq!(node.key_path, PathBuf::from("/keys/id"));
        assert!(node.labels.is_empty());
    }

    #[test]
    fn test_duplicate_names() {
        let nodes = vec![
            Node::new("a", "h1", "u", "/k"),
            Node::new("b", "h2", "u", "/k"),
            Node::new("a", "h3", "u", "/k"),
            Node::new("a", "h4", "u", "/k"),
        ];
        assert_eq!(duplicate_names(&nodes), vec!["a".to_string()]);
    }
}
