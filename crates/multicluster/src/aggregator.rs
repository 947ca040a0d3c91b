//! Multi-cluster aggregator
//!
//! Keeps one client per registered cluster and fans read queries out to all
//! of them concurrently. A cluster that fails never disappears from the
//! output: statuses become disconnected entries and alert/event queries list
//! it under `failures`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{scatter, scatter_merge, CancellationToken, Gathered};
use parking_lot::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{ClusterClient, DEFAULT_TIMEOUT};
use crate::error::ClientError;
use crate::registry::ClusterSource;
use crate::types::{
    AggregatedMetrics, AlertKey, ClusterConfig, ClusterEvent, ClusterStatus, ClusterSummary,
    GlobalAlert,
};

/// Aggregator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorOptions {
    /// Per-request timeout of every cluster client
    pub request_timeout: Duration,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// What a reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub rebuilt: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Clusters whose client could not be built, with the reason
    pub broken: Vec<(String, String)>,
}

/// A cluster's entry in the client map
///
/// A client that failed to build is kept with its error so the cluster still
/// reports as disconnected.
#[derive(Debug, Clone)]
struct Slot {
    config: ClusterConfig,
    client: Result<ClusterClient, String>,
}

impl Slot {
    fn client(&self) -> Result<&ClusterClient, ClientError> {
        self.client
            .as_ref()
            .map_err(|e| ClientError::Unavailable(e.clone()))
    }
}

pub struct Aggregator {
    source: Arc<dyn ClusterSource>,
    options: AggregatorOptions,
    slots: RwLock<BTreeMap<String, Slot>>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("options", &self.options)
            .field("clusters", &self.slots.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Aggregator over `source`; no clients exist until `initialize`
    pub fn new(source: Arc<dyn ClusterSource>) -> Self {
        Self::with_options(source, AggregatorOptions::default())
    }

    pub fn with_options(source: Arc<dyn ClusterSource>, options: AggregatorOptions) -> Self {
        Self {
            source,
            options,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    fn build_slot(&self, config: ClusterConfig) -> Slot {
        let client = ClusterClient::with_timeout(config.clone(), self.options.request_timeout)
            .map_err(|e| {
                warn!(cluster = %config.name, "Failed to build client: {}", e);
                e.to_string()
            });
        Slot { config, client }
    }

    /// Drop every client and build fresh ones from the source
    pub fn initialize(&self) -> ReconcileReport {
        let mut slots = self.slots.write();
        let mut report = ReconcileReport {
            removed: slots.keys().cloned().collect(),
            ..Default::default()
        };
        slots.clear();

        for config in self.source.clusters() {
            let name = config.name.clone();
            let slot = self.build_slot(config);
            if let Err(e) = &slot.client {
                report.broken.push((name.clone(), e.clone()));
            }
            report.removed.retain(|n| n != &name);
            report.added.push(name.clone());
            slots.insert(name, slot);
        }

        info!(
            clusters = slots.len(),
            broken = report.broken.len(),
            "Initialized cluster clients"
        );
        report
    }

    /// Reconcile the client map with the source
    ///
    /// Unchanged clusters keep their client, changed ones are rebuilt, and
    /// clusters no longer listed are dropped.
    pub fn refresh(&self) -> ReconcileReport {
        let configs = self.source.clusters();
        let mut slots = self.slots.write();
        let mut report = ReconcileReport::default();

        let wanted: HashSet<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        slots.retain(|name, _| {
            let keep = wanted.contains(name.as_str());
            if !keep {
                report.removed.push(name.clone());
            }
            keep
        });

        for config in configs {
            let name = config.name.clone();
            match slots.get(&name) {
                Some(slot) if slot.config == config => {
                    report.unchanged.push(name);
                    continue;
                }
                Some(_) => report.rebuilt.push(name.clone()),
                None => report.added.push(name.clone()),
            }
            let slot = self.build_slot(config);
            if let Err(e) = &slot.client {
                report.broken.push((name.clone(), e.clone()));
            }
            slots.insert(name, slot);
        }

        if !report.added.is_empty() || !report.rebuilt.is_empty() || !report.removed.is_empty() {
            info!(
                added = report.added.len(),
                rebuilt = report.rebuilt.len(),
                removed = report.removed.len(),
                "Refreshed cluster clients"
            );
        }
        report
    }

    /// Drop every client
    pub fn close(&self) {
        let mut slots = self.slots.write();
        debug!("Closing {} cluster clients", slots.len());
        slots.clear();
    }

    /// Client for one cluster; `None` if unknown or its client failed to build
    pub fn client(&self, name: &str) -> Option<ClusterClient> {
        self.slots.read().get(name)?.client.as_ref().ok().cloned()
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Copy of the slots, so no lock is held across requests
    fn snapshot(&self) -> Vec<(String, Slot)> {
        self.slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect()
    }

    /// Status of every cluster, sorted by name; failures are disconnected entries
    ///
    /// When `cancel` fires, clusters still in flight are reported as
    /// disconnected with a cancelled error; clusters that already answered
    /// keep their status.
    pub async fn aggregated_status(&self, cancel: &CancellationToken) -> Vec<ClusterStatus> {
        let slots = self.snapshot();
        let endpoints: BTreeMap<String, String> = slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.config.endpoint.clone()))
            .collect();

        let cancel = cancel.clone();
        let results = scatter(slots, move |slot| {
            let cancel = cancel.clone();
            async move {
                match slot.client() {
                    Ok(client) => client.status_or_disconnected(&cancel).await,
                    Err(e) => ClusterStatus::disconnected(&slot.config.name, &slot.config.endpoint, e.to_string()),
                }
            }
        })
        .await;

        let mut statuses: Vec<ClusterStatus> = results
            .into_iter()
            .map(|(name, outcome)| {
                outcome.unwrap_or_else(|e| {
                    let endpoint = endpoints.get(&name).map(String::as_str).unwrap_or_default();
                    ClusterStatus::disconnected(&name, endpoint, e.to_string())
                })
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));

        let connected = statuses.iter().filter(|s| s.connected).count();
        debug!(clusters = statuses.len(), connected, "Aggregated cluster status");
        statuses
    }

    /// Rollup derived from a single status pass
    pub async fn aggregated_metrics(&self, cancel: &CancellationToken) -> AggregatedMetrics {
        AggregatedMetrics::from_statuses(&self.aggregated_status(cancel).await)
    }

    /// Alerts from every cluster: critical, warning, info, other; newest first within a severity
    pub async fn all_alerts(&self, cancel: &CancellationToken) -> Gathered<GlobalAlert, ClientError> {
        let cancel = cancel.clone();
        let gathered = scatter_merge(
            self.snapshot(),
            move |slot| {
                let cancel = cancel.clone();
                async move { slot.client()?.alerts(&cancel).await }
            },
            GlobalAlert::merge_order,
        )
        .await;
        log_failures("alerts", &gathered);
        gathered
    }

    pub async fn critical_alerts(&self, cancel: &CancellationToken) -> Gathered<GlobalAlert, ClientError> {
        let mut gathered = self.all_alerts(cancel).await;
        gathered.items.retain(GlobalAlert::is_critical);
        gathered
    }

    /// Events from every cluster, newest first, truncated to `limit` (0 = unlimited)
    pub async fn all_events(
        &self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Gathered<ClusterEvent, ClientError> {
        let cancel = cancel.clone();
        let mut gathered = scatter_merge(
            self.snapshot(),
            move |slot| {
                let cancel = cancel.clone();
                async move { slot.client()?.events(limit, &cancel).await }
            },
            ClusterEvent::merge_order,
        )
        .await;
        if limit > 0 {
            gathered.items.truncate(limit);
        }
        log_failures("events", &gathered);
        gathered
    }

    pub async fn cluster_summaries(&self, cancel: &CancellationToken) -> Vec<ClusterSummary> {
        self.aggregated_status(cancel)
            .await
            .iter()
            .map(ClusterStatus::to_summary)
            .collect()
    }

    /// Connected clusters whose health score is below `threshold`
    pub async fn unhealthy_clusters(&self, threshold: f64, cancel: &CancellationToken) -> Vec<ClusterStatus> {
        self.aggregated_status(cancel)
            .await
            .into_iter()
            .filter(|s| s.connected && s.health_score < threshold)
            .collect()
    }

    pub async fn disconnected_clusters(&self, cancel: &CancellationToken) -> Vec<ClusterStatus> {
        self.aggregated_status(cancel)
            .await
            .into_iter()
            .filter(|s| !s.connected)
            .collect()
    }

    /// Probe every cluster; the map holds only the clusters that failed
    pub async fn test_all_connections(&self, cancel: &CancellationToken) -> BTreeMap<String, ClientError> {
        let cancel = cancel.clone();
        let results = scatter(self.snapshot(), move |slot| {
            let cancel = cancel.clone();
            async move { slot.client()?.test_connection(&cancel).await }
        })
        .await;

        results
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some((name, e)),
                Err(e) => Some((name, ClientError::from(e))),
            })
            .collect()
    }

    /// Poll alerts every `interval` and hand newly seen ones to `callback`
    ///
    /// An alert is identified by cluster, name and node. Identities that
    /// disappear from a cluster that answered are forgotten, so an alert that
    /// fires again is reported again. Returns when `cancel` fires, including
    /// in the middle of a poll.
    pub async fn watch_alerts<F>(&self, interval: Duration, cancel: &CancellationToken, mut callback: F)
    where
        F: FnMut(Vec<GlobalAlert>),
    {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seen: HashSet<AlertKey> = HashSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Alert watch cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let gathered = self.all_alerts(cancel).await;
            if cancel.is_cancelled() {
                debug!("Alert watch cancelled during poll");
                return;
            }

            let failed: HashSet<&str> = gathered.failures.iter().map(|f| f.target.as_str()).collect();
            let current: HashSet<AlertKey> = gathered.items.iter().map(GlobalAlert::key).collect();
            seen.retain(|key| failed.contains(key.cluster.as_str()) || current.contains(key));

            let fresh: Vec<GlobalAlert> = gathered
                .items
                .into_iter()
                .filter(|alert| seen.insert(alert.key()))
                .collect();

            if !fresh.is_empty() {
                debug!("{} new alerts", fresh.len());
                callback(fresh);
            }
        }
    }
}

fn log_failures<T>(what: &str, gathered: &Gathered<T, ClientError>) {
    for failure in &gathered.failures {
        warn!(cluster = %failure.target, "Failed to fetch {}: {}", what, failure.error);
    }
}
