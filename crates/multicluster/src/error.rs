use std::path::PathBuf;

use std::time::Duration;

use fleet_core::{Interrupted, TaskError};

/// Failure talking to one remote cluster
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("TLS material {}: {reason}", .path.display())]
    Tls { path: PathBuf, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// The client for this cluster could not be built
    #[error("client unavailable: {0}")]
    Unavailable(String),

    #[error("connection failed: {0}")]
    Disconnected(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<Interrupted> for ClientError {
    fn from(e: Interrupted) -> Self {
        match e {
            Interrupted::Cancelled => ClientError::Cancelled,
            Interrupted::TimedOut(after) => ClientError::TimedOut(after),
        }
    }
}

/// Cluster registry error
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("cluster name is required")]
    MissingName,

    #[error("cluster endpoint is required")]
    MissingEndpoint,

    #[error("cluster already exists: {0}")]
    AlreadyExists(String),

    #[error("cluster not found: {0}")]
    NotFound(String),
}
