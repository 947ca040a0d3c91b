// In-memory stand-in for the SSH transport.
// Scripted per-node behaviour plus counters for concurrency and session hygiene.
use async_trait::async_trait;
use fleet_core::Node;
use fleet_exec::{CommandOutput, Connector, ExecError, RemoteSession};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a single attempt against a node does
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Command exits 0 with this output
    Ok(String),
    /// Command exits with this status
    Exit(u32),
    /// Dial fails (transient)
    ConnectError,
    /// Server rejects the key (terminal)
    AuthRejected,
    /// Channel closes without an exit status (transient)
    Dropped,
    /// Command never finishes
    Hang,
}

#[derive(Debug, Clone)]
pub struct MockConnectorConfig {
    /// Base command latency (milliseconds)
    pub base_latency_ms: u64,
    /// Maximum additional random latency (milliseconds)
    pub jitter_max_ms: u64,
    pub seed: u64,
}

impl Default for MockConnectorConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 0,
            jitter_max_ms: 0,
            seed: 7,
        }
    }
}

#[derive(Default)]
pub struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connects: AtomicUsize,
    closed: AtomicUsize,
}

pub struct MockConnector {
    config: MockConnectorConfig,
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    fallback: Behavior,
    rng: Mutex<StdRng>,
    counters: Arc<Counters>,
}

impl MockConnector {
    pub fn new(config: MockConnectorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            scripts: Mutex::new(HashMap::new()),
            fallback: Behavior::Ok("ok".to_string()),
            rng: Mutex::new(rng),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Behaviour for nodes (or attempts) without a script
    pub fn with_fallback(mut self, behavior: Behavior) -> Self {
        self.fallback = behavior;
        self
    }

    /// Queue per-attempt behaviours for `node`; the fallback applies once drained
    pub fn script(&self, node: &str, behaviors: Vec<Behavior>) {
        self.scripts
            .lock()
            .insert(node.to_string(), behaviors.into_iter().collect());
    }

    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, node: &str) -> Behavior {
        self.scripts
            .lock()
            .get_mut(node)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn latency(&self) -> Duration {
        let jitter = if self.config.jitter_max_ms > 0 {
            self.rng.lock().gen_range(0..=self.config.jitter_max_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.base_latency_ms + jitter)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        node: &Node,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = self.next_behavior(&node.name);
        match behavior {
            Behavior::ConnectError => {
                return Err(ExecError::Connect {
                    addr: node.addr(),
                    reason: "connection refused".to_string(),
                })
            }
            Behavior::AuthRejected => {
                return Err(ExecError::AuthRejected {
                    user: node.user.clone(),
                    addr: node.addr(),
                })
            }
            _ => {}
        }

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            behavior,
            latency: self.latency(),
            counters: self.counters.clone(),
        }))
    }
}

struct MockSession {
    behavior: Behavior,
    latency: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, _command: &str) -> Result<CommandOutput, ExecError> {
        tokio::time::sleep(self.latency).await;
        match &self.behavior {
            Behavior::Ok(output) => Ok(CommandOutput::success(output.clone())),
            Behavior::Exit(code) => Ok(CommandOutput::exited("failed\n", *code)),
            Behavior::Dropped => Ok(CommandOutput {
                output: "partial".to_string(),
                exit_status: None,
            }),
            Behavior::Hang => std::future::pending().await,
            Behavior::ConnectError | Behavior::AuthRejected => unreachable!(),
        }
    }

    async fn close(self: Box<Self>) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
