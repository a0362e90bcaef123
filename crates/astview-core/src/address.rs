//! Pairing address and view startup context.
//!
//! A view process learns whom to connect to from one opaque string: the
//! JSON-serialized [`Address`], conventionally carried in the `address` query
//! parameter of its launch URL.

use crate::config::ViewConfig;
use crate::{RemotingError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where a view connects and which pairing key it presents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub key: String,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            key: key.into(),
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serialize into the startup-context string.
    pub fn to_startup_context(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a startup-context string.
    pub fn from_startup_context(context: &str) -> Result<Self> {
        serde_json::from_str(context).map_err(|e| RemotingError::InvalidStartupContext {
            message: e.to_string(),
        })
    }

    /// Append the startup context to a view's base URL.
    pub fn launch_url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.query_pairs_mut()
            .append_pair(ViewConfig::ADDRESS_QUERY_PARAM, &self.to_startup_context()?);
        Ok(url)
    }

    /// Read the startup context from a launch URL.
    ///
    /// `Ok(None)` means the URL has no address parameter, i.e. the view was
    /// started standalone and should run offline.
    pub fn from_url(url: &str) -> Result<Option<Self>> {
        let url = Url::parse(url).map_err(|e| RemotingError::InvalidStartupContext {
            message: format!("invalid URL '{}': {}", url, e),
        })?;

        url.query_pairs()
            .find(|(name, _)| name == ViewConfig::ADDRESS_QUERY_PARAM)
            .map(|(_, value)| Self::from_startup_context(&value))
            .transpose()
    }

    /// Like [`Address::from_url`], but for a view that only runs connected.
    pub fn require_from_url(url: &str) -> Result<Self> {
        Self::from_url(url)?.ok_or(RemotingError::StartupContextMissing)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (key {})", self.host, self.port, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_context_shape() {
        let addr = Address::new("localhost", 1235, "3");
        let json = addr.to_startup_context().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, serde_json::json!({"host": "localhost", "port": 1235, "key": "3"}));
    }

    #[test]
    fn test_launch_url_roundtrip() {
        let addr = Address::new("localhost", 1235, "3");
        let base = Url::parse("astview://view/index.html").unwrap();
        let url = addr.launch_url(&base).unwrap();

        assert!(url.as_str().contains("address="));
        assert_eq!(Address::from_url(url.as_str()).unwrap(), Some(addr));
    }

    #[test]
    fn test_url_without_address_is_offline() {
        assert_eq!(Address::from_url("http://localhost/view?foo=bar").unwrap(), None);
        assert!(matches!(
            Address::require_from_url("http://localhost/view"),
            Err(RemotingError::StartupContextMissing)
        ));
    }

    #[test]
    fn test_malformed_address_is_rejected() {
        let result = Address::from_url("http://localhost/view?address=%7Bnope");
        assert!(matches!(
            result,
            Err(RemotingError::InvalidStartupContext { .. })
        ));
    }
}
