//! Centralized configuration for astview.
//!
//! Constant groups for the remoting transport, the connection broker, the
//! view-side reconnect loop and the view startup context.

use std::time::Duration;

/// Channel and framing limits.
pub struct RemotingConfig;

impl RemotingConfig {
    /// Largest accepted frame payload. Whole syntax trees travel in one frame.
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Connection broker defaults.
pub struct BrokerConfig;

impl BrokerConfig {
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 1235;
}

/// Reconnect loop defaults.
pub struct ReconnectConfig;

impl ReconnectConfig {
    pub const BASE_DELAY: Duration = Duration::from_millis(100);
    pub const MAX_DELAY: Duration = Duration::from_secs(5);
    pub const EXPONENTIAL_BASE: f64 = 2.0;
}

/// View process startup context.
pub struct ViewConfig;

impl ViewConfig {
    /// Query parameter on the view's load URL that carries the JSON address.
    pub const ADDRESS_QUERY_PARAM: &'static str = "address";
}

/// Runtime settings for binding a connection broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Host the broker binds to and advertises to views.
    pub host: String,
    /// Port to bind (0 = OS-assigned; the bound port is advertised).
    pub port: u16,
    /// Cap on simultaneous connections. `None` accepts every connection.
    pub max_connections: Option<usize>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: BrokerConfig::DEFAULT_HOST.to_string(),
            port: BrokerConfig::DEFAULT_PORT,
            max_connections: None,
        }
    }
}

impl BrokerSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_connections: None,
        }
    }

    pub fn with_max_connections(mut self, max: Option<usize>) -> Self {
        self.max_connections = max;
        self
    }

    /// Settings for an OS-assigned port on the loopback interface.
    pub fn ephemeral() -> Self {
        Self::new("127.0.0.1", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_well_known_address() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.port, 1235);
        assert_eq!(settings.max_connections, None);
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(RemotingConfig::CONNECT_TIMEOUT > Duration::ZERO);
        assert!(ReconnectConfig::MAX_DELAY >= ReconnectConfig::BASE_DELAY);
    }
}
