//! REST client for one remote cluster
//!
//! Every call is a single HTTP request with no retry. A cluster that does not
//! answer shows up as a disconnected status instead.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use fleet_core::{with_deadline, CancellationToken};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::types::{
    ClusterConfig, ClusterEvent, ClusterHealth, ClusterMetrics, ClusterStatus, GlobalAlert,
    RemoteNode,
};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_IDLE_PER_HOST: usize = 10;
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Deserialize)]
struct VersionBody {
    version: String,
}

/// Client for one registered cluster
///
/// Cheap to clone; clones share the connection pool. Every request runs under
/// the caller's token and the client timeout, whichever fires first.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    config: ClusterConfig,
    base_url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl ClusterClient {
    pub fn new(config: ClusterConfig) -> Result<Self, ClientError> {
        Self::with_timeout(config, DEFAULT_TIMEOUT)
    }

    /// Build the HTTP client, loading any TLS material the config names
    pub fn with_timeout(config: ClusterConfig, timeout: Duration) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT);

        if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
            let mut pem = read_pem(Path::new(cert))?;
            pem.extend(read_pem(Path::new(key))?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| ClientError::Tls {
                path: cert.into(),
                reason: e.to_string(),
            })?;
            builder = builder.identity(identity);
        }

        if let Some(ca) = &config.tls_ca_cert {
            let pem = read_pem(Path::new(ca))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ClientError::Tls {
                path: ca.into(),
                reason: e.to_string(),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            config,
            timeout,
            http_client: builder.build()?,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// GET `path` and return the body of a 2xx answer
    async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<u8>, ClientError> {
        with_deadline(cancel, self.timeout, self.get(path)).await?
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let mut request = self
            .http_client
            .get(format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError> {
        let body = self.fetch(path, cancel).await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
            what,
            reason: e.to_string(),
        })
    }

    /// Decode a JSON array, dropping entries that do not fit `T`
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, ClientError> {
        let entries: Vec<serde_json::Value> = self.get_json(path, what, cancel).await?;
        let total = entries.len();
        let items: Vec<T> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    debug!(cluster = %self.config.name, "Skipping malformed {} entry: {}", what, e);
                    None
                }
            })
            .collect();
        if items.len() < total {
            warn!(
                cluster = %self.config.name,
                skipped = total - items.len(),
                "Dropped malformed {} entries",
                what
            );
        }
        Ok(items)
    }

    /// `GET /api/v1/ping`
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.fetch("/api/v1/ping", cancel).await?;
        Ok(())
    }

    /// `GET /api/v1/status`, stamped with this cluster's identity
    pub async fn status(&self, cancel: &CancellationToken) -> Result<ClusterStatus, ClientError> {
        let mut status: ClusterStatus = self.get_json("/api/v1/status", "status", cancel).await?;
        status.name = self.config.name.clone();
        status.endpoint = self.config.endpoint.clone();
        status.connected = true;
        status.last_sync = Some(Utc::now());
        status.error = None;
        Ok(status)
    }

    /// Like `status`, but any failure becomes a disconnected entry
    pub async fn status_or_disconnected(&self, cancel: &CancellationToken) -> ClusterStatus {
        match self.status(cancel).await {
            Ok(status) => status,
            Err(e) => {
                debug!(cluster = %self.config.name, "Status query failed: {}", e);
                ClusterStatus::disconnected(&self.config.name, &self.config.endpoint, e.to_string())
            }
        }
    }

    pub async fn health(&self, cancel: &CancellationToken) -> Result<ClusterHealth, ClientError> {
        self.get_json("/api/v1/health", "health", cancel).await
    }

    pub async fn metrics(&self, cancel: &CancellationToken) -> Result<ClusterMetrics, ClientError> {
        self.get_json("/api/v1/metrics", "metrics", cancel).await
    }

    /// Active alerts, tagged with this cluster's name
    pub async fn alerts(&self, cancel: &CancellationToken) -> Result<Vec<GlobalAlert>, ClientError> {
        let mut alerts: Vec<GlobalAlert> = self.get_list("/api/v1/alerts", "alerts", cancel).await?;
        for alert in &mut alerts {
            alert.cluster = self.config.name.clone();
        }
        Ok(alerts)
    }

    pub async fn nodes(&self, cancel: &CancellationToken) -> Result<Vec<RemoteNode>, ClientError> {
        self.get_list("/api/v1/nodes", "nodes", cancel).await
    }

    /// Recent events, tagged with this cluster's name; `limit` 0 asks for the server default
    pub async fn events(
        &self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClusterEvent>, ClientError> {
        let path = if limit > 0 {
            format!("/api/v1/events?limit={}", limit)
        } else {
            "/api/v1/events".to_string()
        };
        let mut events: Vec<ClusterEvent> = self.get_list(&path, "events", cancel).await?;
        for event in &mut events {
            event.cluster = self.config.name.clone();
        }
        Ok(events)
    }

    pub async fn version(&self, cancel: &CancellationToken) -> Result<String, ClientError> {
        let body: VersionBody = self.get_json("/api/v1/version", "version", cancel).await?;
        Ok(body.version)
    }

    /// Ping, falling back to a status query for clusters without `/ping`
    pub async fn test_connection(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        match self.ping(cancel).await {
            Ok(()) => return Ok(()),
            Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
            Err(_) => {}
        }
        match self.status(cancel).await {
            Ok(_) => Ok(()),
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            Err(e) => Err(ClientError::Disconnected(e.to_string())),
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|e| ClientError::Tls {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
