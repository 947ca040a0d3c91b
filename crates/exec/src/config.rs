//! Executor tuning

use std::time::Duration;

pub const DEFAULT_MAX_PARALLEL: usize = 50;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Executor configuration
///
/// Immutable for the lifetime of an `Executor`. Zero values mean "unset" and
/// are replaced by the defaults in `normalized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum concurrent in-flight executions per batch
    pub max_parallel: usize,
    /// Dial + handshake + authentication deadline
    pub connect_timeout: Duration,
    /// Deadline for a single command
    pub command_timeout: Duration,
    /// Total attempts per node (first try included)
    pub max_retries: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Upper bound for any single backoff delay
    pub backoff_max: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl ExecutorConfig {
    /// Build from whole-second values as found in config files
    pub fn from_secs(
        max_parallel: usize,
        connect_timeout: u64,
        command_timeout: u64,
        max_retries: u32,
        backoff_base: u64,
        backoff_max: u64,
    ) -> Self {
        Self {
            max_parallel,
            connect_timeout: Duration::from_secs(connect_timeout),
            command_timeout: Duration::from_secs(command_timeout),
            max_retries,
            backoff_base: Duration::from_secs(backoff_base),
            backoff_max: Duration::from_secs(backoff_max),
        }
        .normalized()
    }

    /// Replace unset (zero) values with defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_parallel == 0 {
            self.max_parallel = defaults.max_parallel;
        }
        if self.connect_timeout.is_zero() {
            self.connect_timeout = defaults.connect_timeout;
        }
        if self.command_timeout.is_zero() {
            self.command_timeout = defaults.command_timeout;
        }
        if self.max_retries == 0 {
            self.max_retries = defaults.max_retries;
        }
        if self.backoff_base.is_zero() {
            self.backoff_base = defaults.backoff_base;
        }
        if self.backoff_max.is_zero() {
            self.backoff_max = defaults.backoff_max;
        }
        self
    }

    /// Delay before retry number `retry` (1 = first retry)
    ///
    /// `backoff_base * 2^(retry - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_fills_unset_values() {
        let config = ExecutorConfig {
            max_parallel: 0,
            connect_timeout: Duration::ZERO,
            command_timeout: Duration::from_secs(60),
            max_retries: 0,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
        .normalized();

        assert_eq!(config.max_parallel, 50);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, Duration::from_secs(2));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_schedule() {
        let config = ExecutorConfig {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5),
            ..Default::default()
        };

        assert_eq!(config.backoff(0), Duration::ZERO);
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(4), Duration::from_secs(5));
        assert_eq!(config.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_from_secs() {
        let config = ExecutorConfig::from_secs(8, 0, 120, 5, 1, 10);
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.command_timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff(2), Duration::from_secs(2));
    }
}
