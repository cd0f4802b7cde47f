//! Error taxonomy surfaced to callers.
//!
//! Every failure carries a kind, a message, and (for server-reported failures)
//! the structured issue list, so callers can log or assert on it without
//! parsing strings.
//!
//! # Propagation
//!
//! - Validation errors (`InvalidQuery`, `ParameterBinding`, `InvalidState`) are
//!   raised before any I/O.
//! - `Connectivity` and `Timeout` come from the transport unchanged.
//! - The core never retries; `is_retryable` is a hint for the caller's policy.

use std::time::Duration;

use crate::config::ConfigError;
use crate::proto::StatusCode;
use crate::types::issue::Issue;
use crate::types::value::ValueType;

/// Why a channel to the endpoint could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityKind {
    /// The endpoint could not be reached (refused, unresolvable, reset on connect).
    Unreachable,
    /// The connection opened but the protocol handshake failed.
    Handshake,
    /// The connect phase ran past its deadline.
    DeadlineExceeded,
    /// An established channel failed while a request was in flight.
    Broken,
}

impl ConnectivityKind {
    /// Whether a fresh attempt on a new connection may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Handshake)
    }
}

impl std::fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable => write!(f, "endpoint unreachable"),
            Self::Handshake => write!(f, "handshake failed"),
            Self::DeadlineExceeded => write!(f, "connect deadline exceeded"),
            Self::Broken => write!(f, "connection broken"),
        }
    }
}

/// Flat discriminant of [`ClientError`] for assertions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connectivity,
    Timeout,
    Cancelled,
    PoolExhausted,
    InvalidState,
    InvalidQuery,
    ParameterBinding,
    Decode,
    TypeMismatch,
    ColumnNotFound,
    Execution,
}

/// Error returned by every fallible client operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Configuration was missing or invalid.
    Config(ConfigError),
    /// The transport could not reach or keep a channel to the endpoint.
    Connectivity {
        kind: ConnectivityKind,
        message: String,
    },
    /// A request ran past its deadline.
    Timeout { operation: &'static str },
    /// The caller cancelled the operation.
    Cancelled { operation: &'static str },
    /// No session became available within the acquire timeout.
    PoolExhausted {
        max_sessions: usize,
        waited: Duration,
    },
    /// Transaction or session lifecycle misuse.
    InvalidState(String),
    /// The query text itself is unusable (e.g. empty).
    InvalidQuery(String),
    /// Parameters referenced by the query have no bound value.
    ParameterBinding { missing: Vec<String> },
    /// The wire payload was malformed or did not match the expected schema.
    Decode(String),
    /// A typed accessor did not match the column's declared type.
    TypeMismatch {
        column: String,
        expected: ValueType,
        actual: Option<ValueType>,
    },
    /// A row accessor referenced a column that does not exist.
    ColumnNotFound(String),
    /// The server reported a non-success status.
    Execution {
        status: StatusCode,
        issues: Vec<Issue>,
    },
}

impl ClientError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::ParameterBinding { .. } => ErrorKind::ParameterBinding,
            Self::Decode(_) => ErrorKind::Decode,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::ColumnNotFound(_) => ErrorKind::ColumnNotFound,
            Self::Execution { .. } => ErrorKind::Execution,
        }
    }

    /// Issues reported by the server, empty for client-side failures.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        match self {
            Self::Execution { issues, .. } => issues,
            _ => &[],
        }
    }

    /// Whether the failure left the session unusable.
    ///
    /// Connectivity loss, deadlines and cancellation abandon a request halfway,
    /// and `BadSession` means the server no longer knows the session.
    #[must_use]
    pub const fn poisons_session(&self) -> bool {
        match self {
            Self::Connectivity { .. } | Self::Timeout { .. } | Self::Cancelled { .. } => true,
            Self::Execution { status, .. } => matches!(status, StatusCode::BadSession),
            _ => false,
        }
    }

    /// Hint for a caller-side retry policy.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connectivity { kind, .. } => kind.is_retryable(),
            Self::Timeout { .. } | Self::PoolExhausted { .. } => true,
            Self::Execution { status, .. } => matches!(
                status,
                StatusCode::Aborted
                    | StatusCode::Unavailable
                    | StatusCode::Overloaded
                    | StatusCode::BadSession
                    | StatusCode::SessionBusy
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Connectivity { kind, message } => write!(f, "{kind}: {message}"),
            Self::Timeout { operation } => write!(f, "{operation} timed out"),
            Self::Cancelled { operation } => write!(f, "{operation} was cancelled"),
            Self::PoolExhausted {
                max_sessions,
                waited,
            } => write!(
                f,
                "no session available after {}ms ({max_sessions} sessions busy)",
                waited.as_millis()
            ),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::ParameterBinding { missing } => {
                write!(f, "unbound query parameters: {}", missing.join(", "))
            }
            Self::Decode(message) => write!(f, "decode error: {message}"),
            Self::TypeMismatch {
                column,
                expected,
                actual,
            } => match actual {
                Some(actual) => write!(
                    f,
                    "column '{column}' holds {actual}, requested {expected}"
                ),
                None => write!(f, "column '{column}' is null, requested {expected}"),
            },
            Self::ColumnNotFound(column) => write!(f, "no such column: {column}"),
            Self::Execution { status, issues } => {
                write!(f, "query failed with status {status:?}")?;
                for issue in issues {
                    write!(f, "; {issue}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let error = ClientError::ParameterBinding {
            missing: vec!["$id".to_string()],
        };
        assert_eq!(error.kind(), ErrorKind::ParameterBinding);
        assert_eq!(error.to_string(), "unbound query parameters: $id");
    }

    #[test]
    fn test_execution_error_exposes_issues() {
        let error = ClientError::Execution {
            status: StatusCode::GenericError,
            issues: vec![Issue::error("table not found")],
        };
        assert_eq!(error.issues().len(), 1);
        assert!(error.to_string().contains("table not found"));
        assert!(!error.poisons_session());
    }

    #[test]
    fn test_bad_session_poisons_session() {
        let error = ClientError::Execution {
            status: StatusCode::BadSession,
            issues: Vec::new(),
        };
        assert!(error.poisons_session());
        assert!(error.is_retryable());
    }

    #[test]
    fn test_handshake_failure_is_not_retryable() {
        let error = ClientError::Connectivity {
            kind: ConnectivityKind::Handshake,
            message: "wrong database".to_string(),
        };
        assert!(!error.is_retryable());
        assert!(error.poisons_session());

        let error = ClientError::Connectivity {
            kind: ConnectivityKind::Unreachable,
            message: "refused".to_string(),
        };
        assert!(error.is_retryable());
    }

    #[test]
    fn test_type_mismatch_display_null() {
        let error = ClientError::TypeMismatch {
            column: "column0".to_string(),
            expected: ValueType::Int32,
            actual: None,
        };
        assert_eq!(
            error.to_string(),
            "column 'column0' is null, requested Int32"
        );
    }
}
