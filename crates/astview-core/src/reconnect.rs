//! View-side reconnect loop.
//!
//! Keeps a view connected to its host session across disconnects:
//!
//! ```text
//! Disconnected -> Connecting -> Registering -> Connected -> (closed) -> Disconnected -> ...
//! ```
//!
//! Failed attempts back off exponentially. With a failure limit set, the loop
//! ends in `PermanentlyDisconnected` once that many attempts in a row have
//! failed; a successful pairing resets the count. An attempt failing with a
//! non-retryable error (a contract mismatch with the host) ends the loop at
//! once.

use crate::address::Address;
use crate::cancel::CancellationToken;
use crate::config::{ReconnectConfig, RemotingConfig};
use crate::remoting::{Endpoint, ServiceDispatch, ServiceProxy};
use crate::services::RegistryProxy;
use crate::{RemotingError, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Observable connection state of a [`Reconnector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registering,
    Connected,
    /// Terminal: the failure limit was reached.
    PermanentlyDisconnected,
}

/// Backoff and give-up policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: None,
            base_delay: ReconnectConfig::BASE_DELAY,
            max_delay: ReconnectConfig::MAX_DELAY,
            exponential_base: ReconnectConfig::EXPONENTIAL_BASE,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_consecutive_failures(mut self, failures: Option<u32>) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Random factor between 0.5 and 1.5, still capped.
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    fn gives_up_after(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .map(|max| failures >= max)
            .unwrap_or(false)
    }
}

/// Opens the byte stream to the host.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn connect(&self, address: &Address) -> Result<Self::Stream>;
}

/// TCP connector with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            timeout: RemotingConfig::CONNECT_TIMEOUT,
        }
    }
}

impl TcpConnector {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, address: &Address) -> Result<TcpStream> {
        let addr = address.socket_addr();
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RemotingError::Connect {
                addr: addr.clone(),
                message: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| RemotingError::Connect {
                addr: addr.clone(),
                message: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

/// Keeps one view paired with its host session.
pub struct Reconnector<C: Connector = TcpConnector> {
    address: Address,
    connector: C,
    policy: ReconnectPolicy,
    local: Arc<dyn ServiceDispatch>,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl Reconnector<TcpConnector> {
    /// Reconnect over TCP, serving `local` on every connection.
    pub fn new(address: Address, local: Arc<dyn ServiceDispatch>) -> Self {
        Self::with_connector(address, local, TcpConnector::default())
    }
}

impl<C: Connector> Reconnector<C> {
    pub fn with_connector(address: Address, local: Arc<dyn ServiceDispatch>, connector: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            address,
            connector,
            policy: ReconnectPolicy::default(),
            local,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Token that stops [`Reconnector::run`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run the loop until cancelled or the failure limit is reached.
    ///
    /// `on_change` is called with `(Some(proxy), true)` after every successful
    /// pairing and with `(None, false)` when that connection goes away.
    ///
    /// Returns `Ok(())` when cancelled, `ReconnectExhausted` when giving up,
    /// and the error itself when it is not retryable.
    pub async fn run<P, F>(&self, mut on_change: F) -> Result<()>
    where
        P: ServiceProxy,
        F: FnMut(Option<P>, bool),
    {
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            match self.connect_once().await {
                Ok(endpoint) => {
                    failures = 0;
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to host at {}", self.address);
                    on_change(Some(endpoint.proxy::<P>()), true);

                    let cancelled = tokio::select! {
                        _ = endpoint.closed() => false,
                        _ = self.cancel.cancelled() => true,
                    };

                    endpoint.close();
                    self.set_state(ConnectionState::Disconnected);
                    on_change(None, false);

                    if cancelled {
                        return Ok(());
                    }
                    info!("Disconnected from host at {}", self.address);
                }
                Err(_) if self.cancel.is_cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    self.set_state(ConnectionState::Disconnected);
                    warn!(
                        "Connection attempt {} to {} failed: {}",
                        failures, self.address, e
                    );

                    if !e.is_retryable() {
                        self.set_state(ConnectionState::PermanentlyDisconnected);
                        error!("Not retrying {}: {}", self.address, e);
                        return Err(e);
                    }
                    if self.policy.gives_up_after(failures) {
                        self.set_state(ConnectionState::PermanentlyDisconnected);
                        error!(
                            "Giving up on {} after {} consecutive failures",
                            self.address, failures
                        );
                        return Err(RemotingError::ReconnectExhausted { attempts: failures });
                    }
                }
            }

            let delay = self.policy.calculate_delay(failures.saturating_sub(1));
            debug!("Reconnecting to {} in {:?}", self.address, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// One attempt: connect, serve the local contract, register the key.
    async fn connect_once(&self) -> Result<Endpoint> {
        self.set_state(ConnectionState::Connecting);
        debug!("Connecting to {}", self.address);

        let stream = tokio::select! {
            result = self.connector.connect(&self.address) => result?,
            _ = self.cancel.cancelled() => return Err(RemotingError::ChannelClosed),
        };

        let endpoint = Endpoint::open(stream);
        endpoint.register_implementation(self.local.clone())?;

        self.set_state(ConnectionState::Registering);
        let registry: RegistryProxy = endpoint.proxy();
        let registered = tokio::select! {
            result = registry.register(&self.address.key) => result,
            _ = self.cancel.cancelled() => Err(RemotingError::ChannelClosed),
        };

        match registered {
            Ok(()) => Ok(endpoint),
            Err(e) => {
                endpoint.close();
                Err(e)
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::PermanentlyDisconnected || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
