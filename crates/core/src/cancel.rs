//! Cancellation helpers
//!
//! Every blocking operation in the workspace takes a `CancellationToken`.
//! Deadlines are expressed as tokens that fire on their own.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Child of `parent` that is also cancelled once `after` elapses
///
/// Must be called from within a tokio runtime.
pub fn deadline(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(after) => timer.cancel(),
        }
    });
    token
}

/// Why `with_deadline` gave up on its future
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Drive `fut` until it completes, `parent` fires, or `after` elapses
///
/// The future is dropped as soon as the deadline token fires.
pub async fn with_deadline<F: Future>(
    parent: &CancellationToken,
    after: Duration,
    fut: F,
) -> Result<F::Output, Interrupted> {
    let token = deadline(parent, after);
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            if parent.is_cancelled() {
                Err(Interrupted::Cancelled)
            } else {
                Err(Interrupted::TimedOut(after))
            }
        }
        out = fut => Ok(out),
    };
    // Stops the timer task; the parent is untouched
    token.cancel();
    outcome
}

/// Sleep for `duration` unless `token` fires first
///
/// Returns `false` if the sleep was interrupted.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let parent = CancellationToken::new();
        let token = deadline(&parent, Duration::from_secs(5));
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_follows_parent() {
        let parent = CancellationToken::new();
        let token = deadline(&parent, Duration::from_secs(60));
        parent.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_completes() {
        let parent = CancellationToken::new();
        let out = with_deadline(&parent, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            7
        })
        .await;
        assert_eq!(out, Ok(7));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let parent = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let out = with_deadline(&parent, Duration::from_secs(5), std::future::pending::<()>()).await;
        assert_eq!(out, Err(Interrupted::TimedOut(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(6));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_follows_parent() {
        let parent = CancellationToken::new();
        let trigger = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let out = with_deadline(&parent, Duration::from_secs(30), std::future::pending::<()>()).await;
        assert_eq!(out, Err(Interrupted::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(1), &token).await);

        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(1), &token).await);
    }
}
