//! Database endpoint address.

use crate::config::ConfigError;

/// Schemes accepted in front of `host:port` and stripped.
const ACCEPTED_SCHEMES: [&str; 3] = ["grpc://", "grpcs://", "tcp://"];

/// A named database behind a network address.
///
/// # Invariants
///
/// - `host` and `database` are non-empty
/// - `port` is non-zero
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    database: String,
}

impl Endpoint {
    /// Parse `address` (`host:port`, optionally prefixed with a scheme) and
    /// pair it with `database`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the address has no host or
    /// port, the port is not a number in 1-65535, or the database is empty.
    pub fn parse(address: &str, database: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            name: "endpoint".to_string(),
            message,
        };

        let trimmed = address.trim();
        let without_scheme = ACCEPTED_SCHEMES
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
            .unwrap_or(trimmed);
        let without_scheme = without_scheme.trim_end_matches('/');

        let Some((host, port)) = without_scheme.rsplit_once(':') else {
            return Err(invalid(format!("'{address}' must be host:port")));
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid(format!("'{address}' has an empty host")));
        }
        let port = match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => {
                return Err(invalid(format!(
                    "'{port}' is not a valid port number (must be 1-65535)"
                )));
            }
        };
        if database.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "database".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            database: database.trim().to_owned(),
        })
    }

    /// Endpoint of a database served inside this process.
    pub(crate) fn in_process(database: &str) -> Self {
        Self {
            host: "in-process".to_string(),
            port: 1,
            database: database.to_owned(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// `host:port`, bracketing IPv6 hosts, suitable for `TcpStream::connect`.
    #[must_use]
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.socket_address(), self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_address() {
        let endpoint = Endpoint::parse("localhost:2136", "/local").unwrap();
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 2136);
        assert_eq!(endpoint.database(), "/local");
        assert_eq!(endpoint.to_string(), "localhost:2136/local");
    }

    #[test]
    fn test_parse_strips_scheme() {
        let endpoint = Endpoint::parse("grpc://db.internal:2135/", "/prod").unwrap();
        assert_eq!(endpoint.host(), "db.internal");
        assert_eq!(endpoint.socket_address(), "db.internal:2135");
    }

    #[test]
    fn test_parse_ipv6() {
        let endpoint = Endpoint::parse("[::1]:2136", "/local").unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.socket_address(), "[::1]:2136");
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        assert!(Endpoint::parse("localhost", "/local").is_err());
        assert!(Endpoint::parse(":2136", "/local").is_err());
        assert!(Endpoint::parse("localhost:0", "/local").is_err());
        assert!(Endpoint::parse("localhost:http", "/local").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_database() {
        let error = Endpoint::parse("localhost:2136", "  ").unwrap_err();
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: "database".to_string(),
                message: "must not be empty".to_string(),
            }
        );
    }
}
