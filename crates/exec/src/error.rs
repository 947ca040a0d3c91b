//! Execution error taxonomy

use std::path::PathBuf;
use std::time::Duration;

/// Retry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on another attempt (network blip, timeout)
    Transient,
    /// Retrying cannot help (auth rejected, non-zero exit, cancelled)
    Terminal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Terminal => write!(f, "terminal"),
        }
    }
}

/// Failure of a single remote execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("read key {}: {reason}", .path.display())]
    KeyUnreadable { path: PathBuf, reason: String },
    #[error("parse key {}: {reason}", .path.display())]
    KeyInvalid { path: PathBuf, reason: String },
    #[error("connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("host key for {addr} rejected")]
    HostKeyRejected { addr: String },
    #[error("unable to authenticate {user}@{addr}")]
    AuthRejected { user: String, addr: String },
    #[error("command timed out after {timeout:?}")]
    CommandTimeout { timeout: Duration },
    #[error("process exited with status {code}")]
    NonZeroExit { code: u32 },
    #[error("session: {0}")]
    Session(String),
    #[error("cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

impl ExecError {
    /// Structural retry classification
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecError::Connect { .. }
            | ExecError::ConnectTimeout { .. }
            | ExecError::CommandTimeout { .. }
            | ExecError::Session(_) => ErrorClass::Transient,
            ExecError::KeyUnreadable { .. }
            | ExecError::KeyInvalid { .. }
            | ExecError::HostKeyRejected { .. }
            | ExecError::AuthRejected { .. }
            | ExecError::NonZeroExit { .. }
            | ExecError::Cancelled
            | ExecError::Internal(_) => ErrorClass::Terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::Terminal
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectTimeout { .. } | ExecError::CommandTimeout { .. }
        )
    }

    /// Failed before any command ran
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ExecError::KeyUnreadable { .. }
                | ExecError::KeyInvalid { .. }
                | ExecError::Connect { .. }
                | ExecError::ConnectTimeout { .. }
                | ExecError::HostKeyRejected { .. }
                | ExecError::AuthRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let transient = [
            ExecError::Connect {
                addr: "10.0.0.1:22".into(),
                reason: "connection refused".into(),
            },
            ExecError::ConnectTimeout {
                addr: "10.0.0.1:22".into(),
                timeout: Duration::from_secs(10),
            },
            ExecError::CommandTimeout {
                timeout: Duration::from_secs(300),
            },
            ExecError::Session("channel closed".into()),
        ];
        for e in &transient {
            assert_eq!(e.class(), ErrorClass::Transient, "{e}");
        }

        let terminal = [
            ExecError::AuthRejected {
                user: "root".into(),
                addr: "10.0.0.1:22".into(),
            },
            ExecError::NonZeroExit { code: 1 },
            ExecError::KeyUnreadable {
                path: "/missing".into(),
                reason: "not found".into(),
            },
            ExecError::Cancelled,
        ];
        for e in &terminal {
            assert!(e.is_terminal(), "{e}");
        }
    }

    #[test]
    fn test_display() {
        let e = ExecError::KeyInvalid {
            path: "/keys/id".into(),
            reason: "bad pem".into(),
        };
        assert_eq!(e.to_string(), "parse key /keys/id: bad pem");
        assert!(e.is_connection());
        assert!(!e.is_timeout());
    }
}
