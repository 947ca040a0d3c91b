//! fleetctl entry point

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use fleet_core::CancellationToken;
use fleet_federation::{apply_moves, ShardRebalancer, ShardingStrategy};
use fleet_multicluster::ClusterConfig;
use serde::Serialize;
use tracing::{info, warn};

use fleetctl::{logging, setup, FleetConfig};

/// fleetctl - GPU fleet command and control
#[derive(Parser, Debug)]
#[command(name = "fleetctl")]
#[command(about = "Run commands across GPU nodes, manage monitoring shards and query remote clusters")]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = "/etc/fleet/fleet.yaml")]
    config: PathBuf,

    /// Files layered over the config file in order; values left at their defaults don't apply
    #[arg(long)]
    overlay: Vec<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a shell command on nodes
    Exec(ExecArgs),
    /// Monitoring shard plan and deployment
    #[command(subcommand)]
    Shards(ShardsCommand),
    /// Remote cluster registry and aggregated views
    #[command(subcommand)]
    Clusters(ClustersCommand),
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Target nodes (default: all)
    #[arg(short, long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Only check that each node accepts a connection
    #[arg(long)]
    probe: bool,

    /// Command to run
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum ShardsCommand {
    /// Compute a plan for the configured nodes
    Plan {
        #[arg(long)]
        strategy: Option<ShardingStrategy>,
        /// Shard count for the count strategy
        #[arg(long)]
        count: Option<usize>,
        /// Store the plan as the current one
        #[arg(long)]
        save: bool,
    },
    /// Check the stored plan for conflicts
    Validate,
    /// Suggest node moves that even out the stored plan
    Rebalance {
        /// Apply the moves and store the result
        #[arg(long)]
        apply: bool,
    },
    /// Write collector configs, target files and units for the stored plan
    Deploy,
    /// Probe every shard collector and the central collector
    Status,
    /// Stop the collectors and remove their configs
    Disable,
}

#[derive(Subcommand, Debug)]
enum ClustersCommand {
    /// Registered clusters
    List,
    /// Register a cluster
    Add {
        name: String,
        endpoint: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        tls_cert: Option<String>,
        #[arg(long)]
        tls_key: Option<String>,
        #[arg(long)]
        tls_ca_cert: Option<String>,
        #[arg(long)]
        skip_tls_verify: bool,
        /// key=value
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },
    /// Unregister a cluster
    Remove { name: String },
    /// Status of every cluster
    Status,
    /// Rollup across clusters
    Metrics,
    /// Alerts from every cluster
    Alerts {
        #[arg(long)]
        critical: bool,
    },
    /// Recent events from every cluster
    Events {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Print new alerts as they fire
    Watch {
        /// Poll interval in seconds (overrides the config file)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Check connectivity to every cluster
    Test,
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {}", s)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = if cli.config.exists() {
        FleetConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        FleetConfig::default()
    };
    for path in &cli.overlay {
        let overlay = FleetConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
        config.merge(overlay);
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    logging::init(&config.log.level)?;

    if !cli.config.exists() {
        warn!("Config file {} not found, using defaults", cli.config.display());
    }

    // Ctrl-C cancels in-flight work
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Exec(args) => exec(&config, args, &cancel, cli.json).await,
        Command::Shards(cmd) => shards(config, cmd, &cancel, cli.json).await,
        Command::Clusters(cmd) => clusters(&config, cmd, &cancel, cli.json).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ExecLine<'a> {
    node: &'a str,
    success: bool,
    attempts: u32,
    duration_ms: u64,
    output: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn exec(
    config: &FleetConfig,
    args: ExecArgs,
    cancel: &CancellationToken,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let nodes = config.select_nodes(&args.nodes)?;
    if nodes.is_empty() {
        bail!("no nodes configured");
    }
    let executor = setup::executor(config);

    if args.probe {
        let mut failed = 0;
        for node in &nodes {
            match executor.test_connection(node, cancel).await {
                Ok(()) => println!("{:<24} ok", node.name),
                Err(e) => {
                    failed += 1;
                    println!("{:<24} FAILED ({}): {}", node.name, e.class(), e);
                }
            }
        }
        return Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    if args.command.is_empty() {
        bail!("no command given");
    }
    let command = args.command.join(" ");

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = failed.clone();
    executor
        .run_parallel_with_callback(&nodes, &command, cancel, move |result| {
            if !result.is_success() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            if json {
                let line = ExecLine {
                    node: &result.node,
                    success: result.is_success(),
                    attempts: result.attempts,
                    duration_ms: result.duration.as_millis() as u64,
                    output: &result.output,
                    error: result.error.as_ref().map(|e| e.to_string()),
                };
                if let Ok(text) = serde_json::to_string(&line) {
                    println!("{}", text);
                }
                return;
            }
            match &result.error {
                None => println!("=== {} ({:?})\n{}", result.node, result.duration, result.output.trim_end()),
                Some(e) => println!(
                    "=== {} FAILED after {} attempt(s): {}\n{}",
                    result.node,
                    result.attempts,
                    e,
                    result.output.trim_end()
                ),
            }
        })
        .await;

    let failed = failed.load(Ordering::Relaxed);
    if failed > 0 {
        warn!("{} of {} nodes failed", failed, nodes.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn shards(
    mut config: FleetConfig,
    cmd: ShardsCommand,
    cancel: &CancellationToken,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let store = setup::plan_store(&config);

    match cmd {
        ShardsCommand::Plan { strategy, count, save } => {
            if let Some(strategy) = strategy {
                config.federation.strategy = strategy;
            }
            if count.is_some() {
                config.federation.shard_count = count;
            }
            let plan = setup::plan_shards(&config)?;
            if json {
                print_json(&plan)?;
            } else {
                for shard in &plan.shards {
                    println!(
                        "{:<16} port {:<6} {:>5} nodes  {}",
                        shard.name,
                        shard.collector.port,
                        shard.nodes.len(),
                        shard.collector.storage_path.display()
                    );
                }
            }
            if save {
                plan.validate()?;
                store.save(&plan).await?;
                println!("saved to {}", store.path().display());
            }
        }
        ShardsCommand::Validate => {
            let plan = store.load_or_default().await?;
            if let Err(e) = plan.validate() {
                for issue in e.issues() {
                    println!("{}", issue);
                }
                return Ok(ExitCode::FAILURE);
            }
            println!("plan ok: {} shards, {} nodes", plan.shards.len(), plan.total_nodes());
        }
        ShardsCommand::Rebalance { apply } => {
            let mut plan = store.load_or_default().await?;
            let rebalancer = ShardRebalancer::new();
            let moves = rebalancer.suggest_rebalance(&plan.shards);
            if json {
                print_json(&moves)?;
            } else {
                println!("imbalance: {:.2}", rebalancer.imbalance(&plan.shards));
                for m in &moves {
                    println!("{}", m);
                }
            }
            if apply && !moves.is_empty() {
                store.backup().await?;
                apply_moves(&mut plan.shards, &moves)?;
                store.save(&plan).await?;
                println!("applied {} moves, imbalance now {:.2}", moves.len(), rebalancer.imbalance(&plan.shards));
            }
        }
        ShardsCommand::Deploy => {
            let plan = store.load_or_default().await?;
            let report = setup::federation_manager(&config, plan).deploy().await?;
            for file in &report.files {
                println!("wrote {}", file.display());
            }
        }
        ShardsCommand::Status => {
            let plan = store.load_or_default().await?;
            let status = setup::federation_manager(&config, plan).status(cancel).await;
            if json {
                print_json(&status)?;
            } else {
                for shard in &status.shards {
                    let health = if shard.healthy { "healthy" } else { "DOWN" };
                    println!(
                        "{:<16} {:<22} {:>5} nodes {:>10} series  {}",
                        shard.name, shard.endpoint, shard.node_count, shard.metric_count, health
                    );
                }
                let health = if status.central.healthy { "healthy" } else { "DOWN" };
                println!(
                    "{:<16} {:<22} {:>10} series  {}",
                    "central", status.central.endpoint, status.central.metric_count, health
                );
            }
            if status.healthy_count < status.shard_count || !status.central.healthy {
                return Ok(ExitCode::FAILURE);
            }
        }
        ShardsCommand::Disable => {
            let plan = store.load_or_default().await?;
            let report = setup::federation_manager(&config, plan).disable().await?;
            for unit in &report.stopped {
                println!("stopped {}", unit);
            }
            for (unit, reason) in &report.failed {
                println!("failed to stop {}: {}", unit, reason);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn clusters(
    config: &FleetConfig,
    cmd: ClustersCommand,
    cancel: &CancellationToken,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let registry = setup::registry(config)?;

    match cmd {
        ClustersCommand::List => {
            let clusters = registry.list();
            if json {
                print_json(&clusters)?;
            } else {
                for c in &clusters {
                    let labels: Vec<_> = c.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    println!("{:<20} {:<40} {}", c.name, c.endpoint, labels.join(","));
                }
            }
        }
        ClustersCommand::Add {
            name,
            endpoint,
            api_key,
            tls_cert,
            tls_key,
            tls_ca_cert,
            skip_tls_verify,
            labels,
        } => {
            let cluster = ClusterConfig {
                name,
                endpoint,
                api_key,
                tls_cert,
                tls_key,
                tls_ca_cert,
                skip_tls_verify,
                labels: labels.into_iter().collect(),
            };
            let name = cluster.name.clone();
            registry.add(cluster)?;
            println!("added {}", name);
        }
        ClustersCommand::Remove { name } => {
            registry.remove(&name)?;
            println!("removed {}", name);
        }
        ClustersCommand::Status => {
            let aggregator = setup::aggregator(config, registry);
            let summaries = aggregator.cluster_summaries(cancel).await;
            if json {
                print_json(&summaries)?;
            } else {
                for s in &summaries {
                    println!(
                        "{:<20} {:>5} nodes {:>6} gpus {:>6.1} health {:>4} alerts  {}",
                        s.name, s.nodes, s.gpus, s.health_score, s.alerts, s.status
                    );
                }
            }
        }
        ClustersCommand::Metrics => {
            let aggregator = setup::aggregator(config, registry);
            let metrics = aggregator.aggregated_metrics(cancel).await;
            if json {
                print_json(&metrics)?;
            } else {
                println!(
                    "clusters {}/{} connected, nodes {}/{} healthy, gpus {}/{} healthy, avg health {:.1}, alerts {}",
                    metrics.connected_count,
                    metrics.cluster_count,
                    metrics.healthy_nodes,
                    metrics.total_nodes,
                    metrics.healthy_gpus,
                    metrics.total_gpus,
                    metrics.average_health,
                    metrics.active_alerts
                );
            }
            let unhealthy = aggregator
                .unhealthy_clusters(config.multicluster.unhealthy_threshold, cancel)
                .await;
            for s in &unhealthy {
                warn!(cluster = %s.name, "Health score {:.1} below threshold", s.health_score);
            }
        }
        ClustersCommand::Alerts { critical } => {
            let aggregator = setup::aggregator(config, registry);
            let gathered = if critical {
                aggregator.critical_alerts(cancel).await
            } else {
                aggregator.all_alerts(cancel).await
            };
            if json {
                print_json(&gathered.items)?;
            } else {
                for a in &gathered.items {
                    println!(
                        "{:<9} {:<16} {:<24} {:<16} {}",
                        a.severity, a.cluster, a.alert_name, a.node, a.description
                    );
                }
            }
            for failure in &gathered.failures {
                eprintln!("{}: {}", failure.target, failure.error);
            }
        }
        ClustersCommand::Events { limit } => {
            let aggregator = setup::aggregator(config, registry);
            let gathered = aggregator.all_events(limit, cancel).await;
            if json {
                print_json(&gathered.items)?;
            } else {
                for e in &gathered.items {
                    println!(
                        "{} {:<16} {:<12} {:<9} {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.cluster,
                        e.event_type,
                        e.severity,
                        e.message
                    );
                }
            }
            for failure in &gathered.failures {
                eprintln!("{}: {}", failure.target, failure.error);
            }
        }
        ClustersCommand::Watch { interval } => {
            let aggregator = setup::aggregator(config, registry);
            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.multicluster.watch_interval());
            info!("Watching alerts every {:?}", interval);
            aggregator
                .watch_alerts(interval, cancel, |alerts| {
                    for a in alerts {
                        if json {
                            if let Ok(text) = serde_json::to_string(&a) {
                                println!("{}", text);
                            }
                        } else {
                            println!("[{}] {} {} {} {}", a.severity, a.cluster, a.alert_name, a.node, a.description);
                        }
                    }
                })
                .await;
        }
        ClustersCommand::Test => {
            let aggregator = setup::aggregator(config, registry);
            let failures = aggregator.test_all_connections(cancel).await;
            for name in aggregator.cluster_names() {
                match failures.get(&name) {
                    None => println!("{:<20} ok", name),
                    Some(e) => println!("{:<20} FAILED: {}", name, e),
                }
            }
            if !failures.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
