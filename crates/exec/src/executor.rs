//! Remote command executor
//!
//! `run` is a single attempt over a fresh connection. `run_with_retry` wraps it
//! with capped exponential backoff for transient failures. The parallel
//! variants fan a command out over a node list behind a semaphore sized to
//! `max_parallel`.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{sleep_or_cancel, CancellationToken, Node};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ErrorClass, ExecError};
use crate::ssh::SshConnector;
use crate::transport::{CommandOutput, Connector};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_COMMAND: &str = "echo ok";

/// Outcome of running one command on one node
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub node: String,
    /// Combined stdout and stderr (may be partial on failure)
    pub output: String,
    pub error: Option<ExecError>,
    /// Wall time from first attempt to final outcome, backoff included
    pub duration: Duration,
    /// Attempts made; 0 if the node never got a slot
    pub attempts: u32,
}

impl ExecutionResult {
    fn not_attempted(node: &str, error: ExecError) -> Self {
        Self {
            node: node.to_string(),
            output: String::new(),
            error: Some(error),
            duration: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error.as_ref().map(ExecError::class)
    }
}

/// Batch outcome with success/failure counts
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-node results in input order
    pub results: Vec<ExecutionResult>,
}

impl ExecutionSummary {
    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl From<Vec<ExecutionResult>> for ExecutionSummary {
    fn from(results: Vec<ExecutionResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// Runs commands on nodes
///
/// Cheap to clone; clones share the connector.
#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Executor over SSH with the default host key policy
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_connector(config, Arc::new(SshConnector::default()))
    }

    pub fn with_connector(config: ExecutorConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: config.normalized(),
            connector,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Single attempt: connect, run, capture output, close
    ///
    /// The session is closed on every path, including timeout and
    /// cancellation, so the remote command is abandoned rather than leaked.
    pub async fn run(&self, node: &Node, command: &str, cancel: &CancellationToken) -> ExecutionResult {
        let start = Instant::now();
        let finish = |output: String, error: Option<ExecError>| ExecutionResult {
            node: node.name.clone(),
            output,
            error,
            duration: start.elapsed(),
            attempts: 1,
        };

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            connected = self.connector.connect(node, self.config.connect_timeout) => connected,
        };
        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                debug!(node = %node.name, "Connect failed: {}", e);
                return finish(String::new(), Some(e));
            }
        };

        let timeout = self.config.command_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(ExecError::CommandTimeout { timeout }),
            out = session.exec(command) => out,
        };

        if tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
            debug!(node = %node.name, "Session close timed out");
        }

        match outcome {
            Ok(CommandOutput {
                output,
                exit_status: Some(0),
            }) => finish(output, None),
            Ok(CommandOutput {
                output,
                exit_status: Some(code),
            }) => finish(output, Some(ExecError::NonZeroExit { code })),
            Ok(CommandOutput {
                output,
                exit_status: None,
            }) => finish(
                output,
                Some(ExecError::Session("channel closed without exit status".into())),
            ),
            Err(e) => finish(String::new(), Some(e)),
        }
    }

    /// `run` with retry on transient failures
    ///
    /// Stops at the first success, the first terminal error, or after
    /// `max_retries` attempts. Cancellation during backoff ends the loop.
    pub async fn run_with_retry(
        &self,
        node: &Node,
        command: &str,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let start = Instant::now();
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0;

        loop {
            if attempts > 0 {
                let delay = self.config.backoff(attempts);
                debug!(
                    node = %node.name,
                    attempt = attempts + 1,
                    "Retrying in {:?}",
                    delay
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return ExecutionResult {
                        node: node.name.clone(),
                        output: String::new(),
                        error: Some(ExecError::Cancelled),
                        duration: start.elapsed(),
                        attempts,
                    };
                }
            }

            let mut result = self.run(node, command, cancel).await;
            attempts += 1;
            result.attempts = attempts;
            result.duration = start.elapsed();

            let error = match &result.error {
                None => return result,
                Some(e) => e,
            };
            if error.is_terminal() {
                debug!(node = %node.name, "Not retrying terminal error: {}", error);
                return result;
            }
            if attempts >= max_attempts {
                warn!(
                    node = %node.name,
                    attempts,
                    "Giving up after transient failures: {}",
                    error
                );
                return result;
            }
            debug!(node = %node.name, attempt = attempts, "Transient failure: {}", error);
        }
    }

    /// Run on every node with at most `max_parallel` in flight
    ///
    /// One result per node, in input order. Nodes still waiting for a slot when
    /// `cancel` fires get a `Cancelled` result with zero attempts.
    pub async fn run_parallel(
        &self,
        nodes: &[Node],
        command: &str,
        cancel: &CancellationToken,
    ) -> Vec<ExecutionResult> {
        info!(
            nodes = nodes.len(),
            max_parallel = self.config.max_parallel,
            "Running command on nodes"
        );
        let gate = Arc::new(Semaphore::new(self.config.max_parallel));
        let command: Arc<str> = Arc::from(command);

        let handles: Vec<_> = nodes
            .iter()
            .map(|node| {
                let worker = self.clone().run_gated(
                    node.clone(),
                    command.clone(),
                    gate.clone(),
                    cancel.clone(),
                );
                (node.name.as_str(), tokio::spawn(worker))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            results.push(join_result(name, handle.await));
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            succeeded = results.len() - failed,
            failed,
            "Parallel execution finished"
        );
        results
    }

    /// Like `run_parallel`, but hands each result to `callback` as it completes
    ///
    /// The callback is invoked exactly once per node, from worker tasks, so it
    /// may run concurrently with itself. Returns after every node finished.
    pub async fn run_parallel_with_callback<F>(
        &self,
        nodes: &[Node],
        command: &str,
        cancel: &CancellationToken,
        callback: F,
    ) where
        F: Fn(ExecutionResult) + Send + Sync + 'static,
    {
        let gate = Arc::new(Semaphore::new(self.config.max_parallel));
        let command: Arc<str> = Arc::from(command);
        let callback = Arc::new(callback);

        let mut workers = Vec::with_capacity(nodes.len());
        for node in nodes {
            let name = node.name.clone();
            let run = tokio::spawn(self.clone().run_gated(
                node.clone(),
                command.clone(),
                gate.clone(),
                cancel.clone(),
            ));
            let callback = callback.clone();
            workers.push(tokio::spawn(async move {
                callback(join_result(&name, run.await));
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Progress callback failed: {}", e);
            }
        }
    }

    /// `run_parallel` plus success/failure counts
    pub async fn run_parallel_with_summary(
        &self,
        nodes: &[Node],
        command: &str,
        cancel: &CancellationToken,
    ) -> ExecutionSummary {
        self.run_parallel(nodes, command, cancel).await.into()
    }

    /// Single `echo ok` attempt without retry
    pub async fn test_connection(&self, node: &Node, cancel: &CancellationToken) -> Result<(), ExecError> {
        match self.run(node, PROBE_COMMAND, cancel).await.error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn run_gated(
        self,
        node: Node,
        command: Arc<str>,
        gate: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ExecutionResult::not_attempted(&node.name, ExecError::Cancelled);
            }
            permit = gate.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return ExecutionResult::not_attempted(&node.name, ExecError::Cancelled);
                }
            },
        };
        self.run_with_retry(&node, &command, &cancel).await
    }
}

fn join_result(node: &str, joined: Result<ExecutionResult, JoinError>) -> ExecutionResult {
    joined.unwrap_or_else(|e| {
        warn!(node = %node, "Execution worker failed: {}", e);
        ExecutionResult::not_attempted(node, ExecError::Internal(format!("worker failed: {}", e)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(node: &str, error: Option<ExecError>) -> ExecutionResult {
        ExecutionResult {
            node: node.to_string(),
            output: String::new(),
            error,
            duration: Duration::ZERO,
            attempts: 1,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = ExecutionSummary::from(vec![
            result("a", None),
            result("b", Some(ExecError::NonZeroExit { code: 2 })),
            result("c", None),
        ]);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_succeeded());
        let failed: Vec<_> = summary.failures().map(|r| r.node.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
    }

    #[test]
    fn test_empty_summary() {
        let summary = ExecutionSummary::from(Vec::new());
        assert_eq!(summary.total, 0);
        assert!(summary.all_succeeded());
    }

    #[test]
    fn test_config_is_normalized() {
        let executor = Executor::with_connector(
            ExecutorConfig {
                max_parallel: 0,
                ..Default::default()
            },
            Arc::new(SshConnector::default()),
        );
        assert_eq!(executor.config().max_parallel, 50);
    }
}
