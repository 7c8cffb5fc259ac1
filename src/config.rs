//! Service configuration
//!
//! Listen address and timeout of the stub server.

use std::fmt;
use std::time::Duration;

use crate::error::{StubError, StubResult};

/// Port used when the listen address doesn't name one.
pub const DEFAULT_PORT: u16 = 17687;

/// Host used when the listen address doesn't name one.
pub const DEFAULT_HOST: &str = "localhost";

/// How long the server waits for a client before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const BOLT_PORT: u16 = 7687;

// ============================================================================
// Address - listen address
// ============================================================================

/// Interface and port to listen on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Interface, host name or IP
    pub host: String,
    /// Port
    pub port: u16,
}

impl Address {
    /// Create an address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `INTERFACE:PORT`.
    ///
    /// Either part may be left out; IPv6 interfaces are written in brackets
    /// (`[::1]:7687`). The port may also be given as the service name `bolt`.
    pub fn parse(s: &str) -> StubResult<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest
                .rsplit_once(']')
                .ok_or_else(|| StubError::config(format!("unterminated IPv6 address {:?}", s)))?;
            (host, port.trim_start_matches(':'))
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, port),
                None => (s, ""),
            }
        };
        let port = match port {
            "" => DEFAULT_PORT,
            "bolt" => BOLT_PORT,
            port => port
                .parse()
                .map_err(|_| StubError::config(format!("invalid port {:?}", port)))?,
        };
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        Ok(Self::new(host, port))
    }

    /// Host and port as accepted by `TcpListener::bind`.
    pub fn to_socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_socket_addr())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

// ============================================================================
// ServiceConfig - server settings
// ============================================================================

/// Settings of a stub service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on
    pub listen_addr: Address,
    /// How long to wait for the first client
    pub timeout: Duration,
}

impl ServiceConfig {
    /// Start a builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: Address::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ============================================================================
// ServiceConfigBuilder
// ============================================================================

/// Builder for [`ServiceConfig`].
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: Address) -> Self {
        self.config.listen_addr = addr;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the timeout in (fractional) seconds. Negative or non-finite
    /// values are rejected.
    pub fn with_timeout_secs(self, secs: f64) -> StubResult<Self> {
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|_| StubError::config(format!("invalid timeout {}", secs)))?;
        Ok(self.with_timeout(timeout))
    }

    /// Build the configuration.
    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "localhost", 17687)]
    #[case(":", "localhost", 17687)]
    #[case(":9001", "localhost", 9001)]
    #[case("0.0.0.0", "0.0.0.0", 17687)]
    #[case("0.0.0.0:", "0.0.0.0", 17687)]
    #[case("127.0.0.1:7777", "127.0.0.1", 7777)]
    #[case("example.com:bolt", "example.com", 7687)]
    #[case("[::1]:9001", "::1", 9001)]
    #[case("[::1]", "::1", 17687)]
    #[case("[]:9001", "localhost", 9001)]
    fn test_address_parse(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        assert_eq!(Address::parse(input).unwrap(), Address::new(host, port));
    }

    #[rstest]
    #[case("localhost:http")]
    #[case("localhost:99999")]
    #[case("[::1:9001")]
    fn test_address_parse_invalid(#[case] input: &str) {
        assert!(matches!(Address::parse(input), Err(StubError::Config(_))));
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::default().to_string(), "localhost:17687");
        assert_eq!(Address::new("::1", 80).to_string(), "[::1]:80");
    }

    #[test]
    fn test_config_builder() {
        let config = ServiceConfig::builder()
            .with_listen_addr(Address::new("0.0.0.0", 9000))
            .with_timeout_secs(1.5)
            .unwrap()
            .build();
        assert_eq!(config.listen_addr.port, 9000);
        assert_eq!(config.timeout, Duration::from_millis(1500));

        let default = ServiceConfig::default();
        assert_eq!(default.timeout, DEFAULT_TIMEOUT);
        assert_eq!(default.listen_addr, Address::default());
    }

    #[test]
    fn test_invalid_timeout() {
        assert!(ServiceConfig::builder().with_timeout_secs(-1.0).is_err());
        assert!(ServiceConfig::builder().with_timeout_secs(f64::NAN).is_err());
    }
}
