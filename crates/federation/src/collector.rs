//! Collector HTTP client
//!
//! Talks to one metrics collector (shard or central) over its HTTP API:
//! liveness, TSDB stats, runtime info, targets, live reload and TSDB admin.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_core::{with_deadline, CancellationToken, Interrupted};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for status probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Collector client error
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<Interrupted> for CollectorError {
    fn from(e: Interrupted) -> Self {
        match e {
            Interrupted::Cancelled => CollectorError::Cancelled,
            Interrupted::TimedOut(after) => CollectorError::TimedOut(after),
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    #[allow(dead_code)]
    status: String,
    data: T,
}

/// TSDB head statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadStats {
    #[serde(default)]
    pub num_series: i64,
    #[serde(default)]
    pub num_label_pairs: i64,
    #[serde(default)]
    pub chunk_count: i64,
    #[serde(default)]
    pub min_time: i64,
    #[serde(default)]
    pub max_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCount {
    pub name: String,
    pub value: i64,
}

/// `GET /api/v1/status/tsdb`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsdbStats {
    #[serde(default)]
    pub head_stats: HeadStats,
    #[serde(default)]
    pub series_count_by_metric_name: Vec<SeriesCount>,
}

/// `GET /api/v1/status/runtimeinfo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub start_time: DateTime<Utc>,
    #[serde(default, rename = "CWD")]
    pub cwd: String,
    #[serde(default)]
    pub reload_config_success: bool,
    pub last_config_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub corruption_count: i64,
    #[serde(default)]
    pub goroutine_count: i64,
    #[serde(default)]
    pub storage_retention: String,
}

/// One active scrape target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub scrape_url: String,
    #[serde(default)]
    pub health: String,
    pub last_scrape: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub scrape_pool: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    #[serde(default)]
    active_targets: Vec<TargetInfo>,
}

#[derive(Deserialize)]
struct SnapshotData {
    name: String,
}

/// Client for one collector
///
/// Every call takes the caller's token; a request gives up when it fires or
/// when the client timeout elapses, whichever comes first.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl CollectorClient {
    /// Client for `http://{host}:{port}`
    pub fn new(host: &str, port: u32, timeout: Duration) -> Result<Self, CollectorError> {
        Self::with_base_url(format!("http://{}:{}", host, port), timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollectorError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn bounded<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T, CollectorError>
    where
        F: Future<Output = Result<T, CollectorError>>,
    {
        with_deadline(cancel, self.timeout, fut).await?
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, CollectorError> {
        self.bounded(cancel, async {
            let resp = self.http_client.get(self.url(path)).send().await?;
            let resp = check_status(resp).await?;
            let body: ApiResponse<T> = resp.json().await?;
            Ok::<_, CollectorError>(body.data)
        })
        .await
    }

    async fn post(&self, path: &str) -> Result<reqwest::Response, CollectorError> {
        let resp = self.http_client.post(self.url(path)).send().await?;
        check_status(resp).await
    }

    /// `GET /-/healthy`; a transport error is an `Err`, a non-200 answer is `Ok(false)`
    pub async fn healthy(&self, cancel: &CancellationToken) -> Result<bool, CollectorError> {
        self.bounded(cancel, async {
            let resp = self.http_client.get(self.url("/-/healthy")).send().await?;
            Ok::<_, CollectorError>(resp.status() == reqwest::StatusCode::OK)
        })
        .await
    }

    pub async fn tsdb_stats(&self, cancel: &CancellationToken) -> Result<TsdbStats, CollectorError> {
        self.get_data("/api/v1/status/tsdb", cancel).await
    }

    pub async fn runtime_info(&self, cancel: &CancellationToken) -> Result<RuntimeInfo, CollectorError> {
        self.get_data("/api/v1/status/runtimeinfo", cancel).await
    }

    pub async fn targets(&self, cancel: &CancellationToken) -> Result<Vec<TargetInfo>, CollectorError> {
        let data: TargetsData = self.get_data("/api/v1/targets", cancel).await?;
        Ok(data.active_targets)
    }

    /// `POST /-/reload`
    pub async fn reload(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        self.bounded(cancel, self.post("/-/reload")).await?;
        debug!("Reloaded collector at {}", self.base_url);
        Ok(())
    }

    /// Take a TSDB snapshot; returns its directory under `storage_path`
    pub async fn snapshot(
        &self,
        storage_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, CollectorError> {
        let body: ApiResponse<SnapshotData> = self
            .bounded(cancel, async {
                let resp = self.post("/api/v1/admin/tsdb/snapshot").await?;
                Ok::<_, CollectorError>(resp.json().await?)
            })
            .await?;
        Ok(storage_path.join("snapshots").join(body.data.name))
    }

    pub async fn clean_tombstones(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        self.bounded(cancel, self.post("/api/v1/admin/tsdb/clean_tombstones"))
            .await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, CollectorError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CollectorError::Api {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsdb_stats_decode() {
        let json = r#"{"status":"success","data":{"headStats":{"numSeries":1234,"chunkCount":9},
            "seriesCountByMetricName":[{"name":"DCGM_FI_DEV_GPU_UTIL","value":64}]}}"#;
        let resp: ApiResponse<TsdbStats> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.head_stats.num_series, 1234);
        assert_eq!(resp.data.series_count_by_metric_name[0].value, 64);
    }

    #[test]
    fn test_base_url_normalized() {
        let client = CollectorClient::with_base_url("http://localhost:9091/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9091");
        assert_eq!(client.url("/-/healthy"), "http://localhost:9091/-/healthy");
    }
}
