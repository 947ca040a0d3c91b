//! Scatter/gather over named targets
//!
//! One spawned task per target, per-target error isolation, and a merge step
//! with a caller-supplied ordering. Every multi-target read in the workspace
//! (cluster status/alerts/events, shard health probes) goes through here.

use std::cmp::Ordering;
use std::future::Future;

use tracing::warn;

/// Failure of the worker task itself (not of the operation it ran)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("worker for {0} panicked")]
    Panicked(String),
    #[error("worker for {0} was aborted")]
    Aborted(String),
}

/// A target that produced an error instead of items
#[derive(Debug, Clone)]
pub struct TargetFailure<E> {
    pub target: String,
    pub error: E,
}

/// Merged output of a fan-out
#[derive(Debug, Clone)]
pub struct Gathered<T, E> {
    /// Items from every successful target, sorted by the merge comparator
    pub items: Vec<T>,
    /// Failed targets, sorted by target name
    pub failures: Vec<TargetFailure<E>>,
}

impl<T, E> Gathered<T, E> {
    /// Whether every target answered
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_targets(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.target.as_str()).collect()
    }
}

impl<T, E> Default for Gathered<T, E> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Run `op` concurrently for every `(name, input)` pair
///
/// Results are paired with the target name. A worker that panics only affects
/// its own entry.
pub async fn scatter<I, T, F, Fut>(targets: Vec<(String, I)>, op: F) -> Vec<(String, Result<T, TaskError>)>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let handles: Vec<_> = targets
        .into_iter()
        .map(|(name, input)| (name, tokio::spawn(op(input))))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let outcome = match handle.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => {
                warn!(target_name = %name, "Fan-out worker panicked");
                Err(TaskError::Panicked(name.clone()))
            }
            Err(_) => Err(TaskError::Aborted(name.clone())),
        };
        results.push((name, outcome));
    }
    results
}

/// Scatter, then flatten successes and sort them with `compare`
pub async fn scatter_merge<I, T, E, F, Fut, C>(
    targets: Vec<(String, I)>,
    op: F,
    compare: C,
) -> Gathered<T, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: From<TaskError> + Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>> + Send + 'static,
    C: FnMut(&T, &T) -> Ordering,
{
    let mut gathered = Gathered::default();

    for (target, outcome) in scatter(targets, op).await {
        match outcome.map_err(E::from).and_then(|r| r) {
            Ok(items) => gathered.items.extend(items),
            Err(error) => gathered.failures.push(TargetFailure { target, error }),
        }
    }

    gathered.items.sort_by(compare);
    gathered.failures.sort_by(|a, b| a.target.cmp(&b.target));
    gathered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum ProbeError {
        Down,
        Task(TaskError),
    }

    impl From<TaskError> for ProbeError {
        fn from(e: TaskError) -> Self {
            ProbeError::Task(e)
        }
    }

    fn targets(names: &[&str]) -> Vec<(String, String)> {
        names.iter().map(|n| (n.to_string(), n.to_string())).collect()
    }

    #[tokio::test]
    async fn test_scatter_pairs_results_with_targets() {
        let results = scatter(targets(&["a", "b", "c"]), |name| async move {
            // Reverse completion order
            let delay = match name.as_str() {
                "a" => 30,
                "b" => 20,
                _ => 10,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            name.to_uppercase()
        })
        .await;

        assert_eq!(results.len(), 3);
        for (name, value) in results {
            assert_eq!(value.unwrap(), name.to_uppercase());
        }
    }

    #[tokio::test]
    async fn test_scatter_isolates_panics() {
        let results = scatter(targets(&["ok", "boom"]), |name| async move {
            if name == "boom" {
                panic!("probe exploded");
            }
            1
        })
        .await;

        let boom = results.iter().find(|(n, _)| n == "boom").unwrap();
        assert_eq!(boom.1, Err(TaskError::Panicked("boom".to_string())));
        let ok = results.iter().find(|(n, _)| n == "ok").unwrap();
        assert_eq!(ok.1, Ok(1));
    }

    #[tokio::test]
    async fn test_scatter_merge_sorts_and_collects_failures() {
        let gathered: Gathered<u32, ProbeError> = scatter_merge(
            targets(&["c", "a", "down", "b"]),
            |name| async move {
                match name.as_str() {
                    "a" => Ok(vec![3, 1]),
                    "b" => Ok(vec![2]),
                    "c" => Ok(vec![]),
                    _ => Err(ProbeError::Down),
                }
            },
            |x, y| x.cmp(y),
        )
        .await;

        assert_eq!(gathered.items, vec![1, 2, 3]);
        assert!(!gathered.is_complete());
        assert_eq!(gathered.failed_targets(), vec!["down"]);
        assert_eq!(gathered.failures[0].error, ProbeError::Down);
    }

    #[tokio::test]
    async fn test_scatter_merge_empty() {
        let gathered: Gathered<u32, ProbeError> =
            scatter_merge(Vec::<(String, ())>::new(), |_| async { Ok(vec![1]) }, |a, b| a.cmp(b)).await;
        assert!(gathered.items.is_empty());
        assert!(gathered.is_complete());
    }
}
