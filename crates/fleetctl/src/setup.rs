//! Engines built from a `FleetConfig`

use std::sync::Arc;

use fleet_exec::{Executor, SshConnector};
use fleet_federation::{
    FederationConfig, FederationError, FederationManager, FederationStore, ShardAllocator,
};
use fleet_multicluster::{Aggregator, Registry, RegistryError};
use tracing::info;

use crate::config::FleetConfig;

pub fn executor(config: &FleetConfig) -> Executor {
    let connector = SshConnector::new(config.executor.host_key_policy());
    Executor::with_connector(config.executor.executor_config(), Arc::new(connector))
}

pub fn allocator(config: &FleetConfig) -> ShardAllocator {
    ShardAllocator::new(config.federation.policy.clone())
}

pub fn plan_store(config: &FleetConfig) -> FederationStore {
    FederationStore::new(&config.federation.state_dir)
}

/// Compute a fresh plan for the configured nodes and strategy
pub fn plan_shards(config: &FleetConfig) -> Result<FederationConfig, FederationError> {
    let shards = allocator(config).calculate_shards(
        &config.nodes,
        config.federation.strategy,
        config.federation.shard_count,
    )?;

    let mut plan = FederationConfig {
        enabled: true,
        shards,
        ..Default::default()
    };
    plan.central.storage_path = config.federation.policy.data_dir.join("collector-central");
    info!(
        strategy = %config.federation.strategy,
        shards = plan.shards.len(),
        nodes = plan.total_nodes(),
        "Computed shard plan"
    );
    Ok(plan)
}

pub fn federation_manager(config: &FleetConfig, plan: FederationConfig) -> FederationManager {
    FederationManager::new(config.cluster_name.clone(), plan, config.nodes.clone())
        .with_layout(config.federation.layout.clone())
}

pub fn registry(config: &FleetConfig) -> Result<Arc<Registry>, RegistryError> {
    Ok(Arc::new(Registry::open(&config.multicluster.registry_path)?))
}

/// Aggregator over the registry, clients already built
pub fn aggregator(config: &FleetConfig, registry: Arc<Registry>) -> Aggregator {
    let aggregator = Aggregator::with_options(registry, config.multicluster.aggregator_options());
    aggregator.initialize();
    aggregator
}
