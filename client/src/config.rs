//! Client configuration module.
//!
//! This module provides configuration loading for the Tabula client from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `TABULA_ENDPOINT`: Endpoint address, `host:port` or `grpc://host:port` (required)
//! - `TABULA_DATABASE`: Database path on the endpoint (required)
//! - `TABULA_MAX_SESSIONS`: Ceiling on concurrently open sessions (default: `50`)
//! - `TABULA_SESSION_ACQUIRE_TIMEOUT_MS`: How long `acquire` waits (default: `5000`)
//! - `TABULA_DEFAULT_TX_MODE`: `serializable-rw` or `snapshot-ro` (default: `serializable-rw`)
//! - `TABULA_CONNECT_TIMEOUT_MS`: Connect + handshake deadline (default: `5000`)
//! - `TABULA_REQUEST_TIMEOUT_MS`: Per-request deadline (default: `30000`)
//!
//! # Invariants
//!
//! - `endpoint_address` and `database_path` are non-empty
//! - `max_sessions` is between 1 and [`ClientConfig::MAX_SESSIONS_LIMIT`]
//! - all timeouts are non-zero and at most [`ClientConfig::MAX_TIMEOUT`]

use std::time::Duration;

use crate::transaction::TxMode;
use crate::types::endpoint::Endpoint;

/// Client configuration.
///
/// # Pre-conditions
///
/// When constructed via `from_env()`:
/// - `TABULA_ENDPOINT` and `TABULA_DATABASE` must be set and non-empty
/// - Optional values, when set, must parse
///
/// # Post-conditions
///
/// - `validate()` succeeds on the returned value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Endpoint address, `host:port` with an optional scheme.
    pub endpoint_address: String,
    /// Database path served by the endpoint.
    pub database_path: String,
    /// Ceiling on concurrently open sessions.
    pub max_sessions: usize,
    /// How long `acquire` waits for a free session.
    pub session_acquire_timeout: Duration,
    /// Mode used by operations that do not name one.
    pub default_tx_mode: TxMode,
    /// Deadline for opening a connection, including the handshake.
    pub connect_timeout: Duration,
    /// Deadline applied to each request when the caller gives none.
    pub request_timeout: Duration,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ClientConfig {
    /// Default session ceiling.
    pub const DEFAULT_MAX_SESSIONS: usize = 50;
    /// Default wait for a free session.
    pub const DEFAULT_SESSION_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default connect deadline.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default request deadline.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Largest accepted session ceiling.
    pub const MAX_SESSIONS_LIMIT: usize = 10_000;
    /// Largest accepted timeout; deadlines are computed as `now + timeout`.
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

    /// Configuration with defaults for everything but the endpoint and database.
    #[must_use]
    pub fn new(endpoint_address: impl Into<String>, database_path: impl Into<String>) -> Self {
        Self {
            endpoint_address: endpoint_address.into(),
            database_path: database_path.into(),
            max_sessions: Self::DEFAULT_MAX_SESSIONS,
            session_acquire_timeout: Self::DEFAULT_SESSION_ACQUIRE_TIMEOUT,
            default_tx_mode: TxMode::SerializableReadWrite,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `TABULA_ENDPOINT` or `TABULA_DATABASE` is not set or is empty
    /// - an optional variable is set but does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any name-to-value source.
    ///
    /// `from_env` is this function over the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint_address = Self::load_required(&lookup, "TABULA_ENDPOINT")?;
        let database_path = Self::load_required(&lookup, "TABULA_DATABASE")?;

        let mut config = Self::new(endpoint_address, database_path);
        if let Some(max_sessions) = Self::load_number(&lookup, "TABULA_MAX_SESSIONS")? {
            config.max_sessions = usize::try_from(max_sessions).map_err(|_| {
                ConfigError::InvalidValue {
                    name: "TABULA_MAX_SESSIONS".to_string(),
                    message: format!("{max_sessions} does not fit this platform"),
                }
            })?;
        }
        if let Some(ms) = Self::load_number(&lookup, "TABULA_SESSION_ACQUIRE_TIMEOUT_MS")? {
            config.session_acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = Self::load_number(&lookup, "TABULA_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = Self::load_number(&lookup, "TABULA_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(mode) = lookup("TABULA_DEFAULT_TX_MODE") {
            config.default_tx_mode = Self::parse_tx_mode(&mode)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants listed in the module docs.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as `ConfigError::InvalidValue`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &str, message: &str| ConfigError::InvalidValue {
            name: name.to_string(),
            message: message.to_string(),
        };

        if self.endpoint_address.trim().is_empty() {
            return Err(invalid("endpoint_address", "must not be empty"));
        }
        if self.database_path.trim().is_empty() {
            return Err(invalid("database_path", "must not be empty"));
        }
        if self.max_sessions == 0 {
            return Err(invalid("max_sessions", "must be at least 1"));
        }
        if self.max_sessions > Self::MAX_SESSIONS_LIMIT {
            return Err(invalid(
                "max_sessions",
                &format!("must be at most {}", Self::MAX_SESSIONS_LIMIT),
            ));
        }

        for (name, timeout) in [
            ("session_acquire_timeout", self.session_acquire_timeout),
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
        ] {
            if timeout.is_zero() {
                return Err(invalid(name, "must be non-zero"));
            }
            if timeout > Self::MAX_TIMEOUT {
                return Err(invalid(
                    name,
                    &format!("must be at most {}s", Self::MAX_TIMEOUT.as_secs()),
                ));
            }
        }
        Ok(())
    }

    /// Parse the endpoint address together with the database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not `host:port` or the database is empty.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.endpoint_address, &self.database_path)
    }

    fn load_required(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Result<String, ConfigError> {
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;

        if value.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(value)
    }

    fn load_number(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Result<Option<u64>, ConfigError> {
        match lookup(name) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("'{value}' is not a non-negative integer"),
                }),
            None => Ok(None),
        }
    }

    fn parse_tx_mode(value: &str) -> Result<TxMode, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serializable-rw" | "serializable_rw" | "serializablerw" => {
                Ok(TxMode::SerializableReadWrite)
            }
            "snapshot-ro" | "snapshot_ro" | "snapshotro" => Ok(TxMode::SnapshotReadOnly),
            _ => Err(ConfigError::InvalidValue {
                name: "TABULA_DEFAULT_TX_MODE".to_string(),
                message: format!("'{value}' must be serializable-rw or snapshot-ro"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(ClientConfig::DEFAULT_MAX_SESSIONS, 50);
        let config = ClientConfig::new("localhost:2136", "/local");
        assert_eq!(config.default_tx_mode, TxMode::SerializableReadWrite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_minimal() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "localhost:2136"),
            ("TABULA_DATABASE", "/local"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint_address, "localhost:2136");
        assert_eq!(config.database_path, "/local");
        assert_eq!(config.max_sessions, 50);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "grpc://db:2135"),
            ("TABULA_DATABASE", "/prod"),
            ("TABULA_MAX_SESSIONS", "4"),
            ("TABULA_SESSION_ACQUIRE_TIMEOUT_MS", "250"),
            ("TABULA_DEFAULT_TX_MODE", "snapshot-ro"),
        ]))
        .unwrap();
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.session_acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.default_tx_mode, TxMode::SnapshotReadOnly);
        assert_eq!(config.endpoint().unwrap().port(), 2135);
    }

    #[test]
    fn test_missing_endpoint_fails_fast() {
        let error =
            ClientConfig::from_lookup(lookup_from(&[("TABULA_DATABASE", "/local")])).unwrap_err();
        assert_eq!(
            error,
            ConfigError::MissingEnvVar("TABULA_ENDPOINT".to_string())
        );
    }

    #[test]
    fn test_empty_database_fails_fast() {
        let error = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "localhost:2136"),
            ("TABULA_DATABASE", ""),
        ]))
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { ref name, .. } if name == "TABULA_DATABASE"));
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let error = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "localhost:2136"),
            ("TABULA_DATABASE", "/local"),
            ("TABULA_MAX_SESSIONS", "0"),
        ]))
        .unwrap_err();
        assert!(error.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_session_ceiling_above_limit_rejected() {
        let error = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "localhost:2136"),
            ("TABULA_DATABASE", "/local"),
            ("TABULA_MAX_SESSIONS", "100000"),
        ]))
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { ref name, .. } if name == "max_sessions"));
    }

    #[test]
    fn test_huge_timeout_rejected() {
        let error = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "localhost:2136"),
            ("TABULA_DATABASE", "/local"),
            ("TABULA_REQUEST_TIMEOUT_MS", "18446744073709551615"),
        ]))
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { ref name, .. } if name == "request_timeout"));

        let mut config = ClientConfig::new("localhost:2136", "/local");
        config.session_acquire_timeout = ClientConfig::MAX_TIMEOUT + Duration::from_millis(1);
        assert!(config.validate().is_err());
        config.session_acquire_timeout = ClientConfig::MAX_TIMEOUT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_tx_mode_rejected() {
        let error = ClientConfig::from_lookup(lookup_from(&[
            ("TABULA_ENDPOINT", "localhost:2136"),
            ("TABULA_DATABASE", "/local"),
            ("TABULA_DEFAULT_TX_MODE", "eventual"),
        ]))
        .unwrap_err();
        assert!(error.to_string().contains("TABULA_DEFAULT_TX_MODE"));
    }

    #[test]
    fn test_config_error_display_missing() {
        let error = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: TEST_VAR"
        );
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
