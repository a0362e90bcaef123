//! Connection broker for view processes.
//!
//! One broker per host process listens on a single address shared by every
//! view. Inbound connections are anonymous until they call
//! `Registry.register(key)`; the key selects the pending registration the
//! connection belongs to.
//!
//! # Lifecycle of a key
//!
//! 1. [`ConnectionBroker::issue_key`] hands out a fresh key.
//! 2. [`ConnectionBroker::register_pending`] parks an `on_ready` callback under
//!    it and returns a [`PairingHandle`].
//! 3. A connection presenting the key takes the entry out of the map (so a key
//!    pairs at most once), runs `on_ready` with its endpoint, and then resolves
//!    the handle.
//!
//! [`ConnectionBroker::cancel_pending`] drops an entry that never paired.

use crate::address::Address;
use crate::config::BrokerSettings;
use crate::remoting::Endpoint;
use crate::services::{Registry, RegistryDispatcher};
use crate::{RemotingError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

type OnReady = Box<dyn FnOnce(Endpoint) -> BoxFuture<'static, Result<()>> + Send>;

struct PendingRegistration {
    on_ready: OnReady,
    resolve: oneshot::Sender<Result<Endpoint>>,
}

/// Resolves once a connection has paired with the registration's key and its
/// `on_ready` callback has completed.
#[derive(Debug)]
pub struct PairingHandle {
    key: String,
    rx: oneshot::Receiver<Result<Endpoint>>,
}

impl PairingHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the pairing.
    ///
    /// Fails with `ChannelClosed` if the registration was cancelled or the
    /// broker went away, or with the error returned by `on_ready`.
    pub async fn paired(self) -> Result<Endpoint> {
        self.rx.await.unwrap_or(Err(RemotingError::ChannelClosed))
    }
}

/// Pairs anonymous inbound connections with pending registrations.
#[derive(Clone)]
pub struct ConnectionBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    host: String,
    port: u16,
    next_key: AtomicU64,
    pending: Mutex<HashMap<String, PendingRegistration>>,
}

impl std::fmt::Debug for ConnectionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBroker")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ConnectionBroker {
    /// Create a broker that advertises `host:port`.
    ///
    /// Does not listen by itself; see [`ConnectionBroker::bind`], or feed
    /// streams to [`ConnectionBroker::accept_connection`] directly.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                host: host.into(),
                port,
                next_key: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Listen on `settings` and serve connections in the background.
    ///
    /// With port 0 the OS picks the port; the broker advertises the bound one.
    /// Every connection is accepted unless `settings.max_connections` is set.
    pub async fn bind(settings: BrokerSettings) -> Result<BrokerHandle> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port))
            .await
            .map_err(|e| RemotingError::Io {
                message: format!("failed to bind {}:{}: {}", settings.host, settings.port, e),
                source: Some(e),
            })?;
        let addr = listener.local_addr()?;
        let max_connections = settings.max_connections;
        let broker = Self::new(settings.host, addr.port());

        info!("Connection broker listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            broker.clone(),
            shutdown_rx,
            conn_shutdown_rx,
            max_connections,
        ));

        Ok(BrokerHandle {
            addr,
            broker,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    /// A process-unique key. Keys are decimal strings counting up from "1".
    pub fn issue_key(&self) -> String {
        self.inner.next_key.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// The address a view must connect to in order to pair with `key`.
    pub fn address_for(&self, key: &str) -> Address {
        Address::new(self.inner.host.clone(), self.inner.port, key)
    }

    /// Expect a connection presenting `key`.
    ///
    /// `on_ready` runs with the connection's endpoint before the returned
    /// handle resolves; it is where the session installs its own contract
    /// implementation and builds its proxy to the view.
    pub fn register_pending<F, Fut>(&self, key: &str, on_ready: F) -> Result<PairingHandle>
    where
        F: FnOnce(Endpoint) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (resolve, rx) = oneshot::channel();
        let registration = PendingRegistration {
            on_ready: Box::new(move |endpoint| on_ready(endpoint).boxed()),
            resolve,
        };

        let mut pending = self.lock_pending()?;
        if pending.contains_key(key) {
            return Err(RemotingError::DuplicateKey {
                key: key.to_string(),
            });
        }
        pending.insert(key.to_string(), registration);
        debug!("Registration pending for key {}", key);

        Ok(PairingHandle {
            key: key.to_string(),
            rx,
        })
    }

    /// Drop a registration that has not paired yet. Returns whether one was
    /// pending. Its [`PairingHandle`] resolves with `ChannelClosed`.
    pub fn cancel_pending(&self, key: &str) -> bool {
        let removed = self
            .lock_pending()
            .map(|mut pending| pending.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            debug!("Registration for key {} cancelled", key);
        }
        removed
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.lock_pending()
            .map(|pending| pending.contains_key(key))
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().map(|pending| pending.len()).unwrap_or(0)
    }

    /// Serve one raw inbound connection.
    ///
    /// The returned endpoint serves only the `Registry` contract until a
    /// `register(key)` call pairs it.
    pub fn accept_connection<S>(&self, stream: S) -> Result<Endpoint>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let endpoint = Endpoint::open(stream);
        let handshake = Handshake {
            broker: self.clone(),
            endpoint: endpoint.clone(),
            state: Mutex::new(HandshakeState::AwaitingRegistration),
        };
        endpoint.register_implementation(Arc::new(RegistryDispatcher(Arc::new(handshake))))?;
        Ok(endpoint)
    }

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PendingRegistration>>> {
        self.inner
            .pending
            .lock()
            .map_err(|_| RemotingError::Other("pending registration lock poisoned".to_string()))
    }

    fn take_pending(&self, key: &str) -> Result<Option<PendingRegistration>> {
        Ok(self.lock_pending()?.remove(key))
    }

    async fn accept_loop(
        listener: TcpListener,
        broker: ConnectionBroker,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        max_connections: Option<usize>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Connection broker shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if let Some(max) = max_connections {
                                if active_connections.load(Ordering::Relaxed) >= max {
                                    warn!(
                                        "Rejecting connection from {}: at max capacity ({})",
                                        peer_addr, max
                                    );
                                    continue;
                                }
                            }

                            let _ = stream.set_nodelay(true);
                            let endpoint = match broker.accept_connection(stream) {
                                Ok(endpoint) => endpoint,
                                Err(e) => {
                                    error!("Failed to set up connection from {}: {}", peer_addr, e);
                                    continue;
                                }
                            };

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                tokio::select! {
                                    _ = endpoint.closed() => {}
                                    _ = conn_shutdown.wait_for(|stop| *stop) => endpoint.close(),
                                }
                                debug!("Connection from {} ended", peer_addr);
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }
}

/// Handle to a listening broker. Dropping shuts it down.
pub struct BrokerHandle {
    addr: SocketAddr,
    broker: ConnectionBroker,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn broker(&self) -> &ConnectionBroker {
        &self.broker
    }

    /// The socket address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HandshakeState {
    AwaitingRegistration,
    Paired { key: String },
}

/// Per-connection `Registry` implementation.
struct Handshake {
    broker: ConnectionBroker,
    endpoint: Endpoint,
    state: Mutex<HandshakeState>,
}

impl Handshake {
    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, HandshakeState>> {
        self.state
            .lock()
            .map_err(|_| RemotingError::Other("handshake state lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl Registry for Handshake {
    async fn register(&self, key: String) -> Result<()> {
        let registration = {
            let mut state = self.lock_state()?;
            if let HandshakeState::Paired { key: paired } = &*state {
                warn!(
                    "Connection already paired with key {} tried to register key {}",
                    paired, key
                );
                return Err(RemotingError::AlreadyPaired { key: paired.clone() });
            }

            let Some(registration) = self.broker.take_pending(&key)? else {
                warn!(key = %key, "Unexpected incoming connection: no pending registration");
                return Err(RemotingError::UnexpectedConnection { key });
            };

            *state = HandshakeState::Paired { key: key.clone() };
            registration
        };

        info!("Connection paired with key {}", key);

        let PendingRegistration { on_ready, resolve } = registration;
        match on_ready(self.endpoint.clone()).await {
            Ok(()) => {
                let _ = resolve.send(Ok(self.endpoint.clone()));
                Ok(())
            }
            Err(e) => {
                warn!("Session setup for key {} failed: {}", key, e);
                let reply = RemotingError::Other(format!("session setup failed: {}", e));
                let _ = resolve.send(Err(e));
                Err(reply)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remoting::ServiceProxy;
    use crate::services::RegistryProxy;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    fn ready(_: Endpoint) -> futures::future::Ready<Result<()>> {
        futures::future::ready(Ok(()))
    }

    fn view_side(broker: &ConnectionBroker) -> RegistryProxy {
        let (host_io, view_io) = tokio::io::duplex(64 * 1024);
        broker.accept_connection(host_io).unwrap();
        Endpoint::open(view_io).proxy()
    }

    #[test]
    fn test_keys_are_unique() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let keys: HashSet<String> = (0..1000).map(|_| broker.issue_key()).collect();
        assert_eq!(keys.len(), 1000);
        assert!(keys.contains("1"));
    }

    #[test]
    fn test_address_for_is_deterministic() {
        let broker = ConnectionBroker::new("localhost", 1235);
        assert_eq!(broker.address_for("3"), Address::new("localhost", 1235, "3"));
        assert_eq!(broker.address_for("3"), broker.address_for("3"));
    }

    #[tokio::test]
    async fn test_duplicate_pending_key_is_rejected() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let _first = broker.register_pending("1", ready).unwrap();
        let err = broker.register_pending("1", ready).unwrap_err();
        assert!(matches!(err, RemotingError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn test_cancel_pending_resolves_handle() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let handle = broker.register_pending("5", ready).unwrap();
        assert_eq!(handle.key(), "5");
        assert!(broker.cancel_pending("5"));
        assert!(!broker.cancel_pending("5"));
        assert!(matches!(handle.paired().await, Err(RemotingError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_register_runs_on_ready_then_resolves() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let ran = ran.clone();
            broker
                .register_pending("3", move |_| async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok::<(), RemotingError>(())
                })
                .unwrap()
        };

        view_side(&broker).register("3").await.unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert!(handle.paired().await.is_ok());
        assert!(!broker.is_pending("3"));
    }

    #[tokio::test]
    async fn test_second_register_on_same_connection_fails() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let _a = broker.register_pending("1", ready).unwrap();
        let _b = broker.register_pending("2", ready).unwrap();

        let registry = view_side(&broker);
        registry.register("1").await.unwrap();
        let err = registry.register("2").await.unwrap_err();
        assert!(matches!(err, RemotingError::AlreadyPaired { key } if key == "1"));
        assert!(broker.is_pending("2"));
    }

    #[tokio::test]
    async fn test_failed_setup_is_reported_to_both_sides() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let handle = broker
            .register_pending("1", |_| async { Err::<(), _>(RemotingError::Other("no editor".into())) })
            .unwrap();

        let err = view_side(&broker).register("1").await.unwrap_err();
        assert!(matches!(err, RemotingError::Remote { .. }));
        assert!(matches!(handle.paired().await, Err(RemotingError::Other(_))));
    }
}
