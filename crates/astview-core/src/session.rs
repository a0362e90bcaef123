//! Host-side view sessions.
//!
//! A session owns one pairing key for its whole lifetime. Whenever the view
//! paired with it disconnects, the session drops its proxy and re-arms a
//! pending registration under the same key, so a restarted view process can
//! pair again. At most one connection is paired with a key at a time.

use crate::address::Address;
use crate::broker::ConnectionBroker;
use crate::remoting::{Endpoint, ServiceDispatch};
use crate::services::FrontendProxy;
use crate::tree::SyntaxTreeNode;
use crate::{RemotingError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Starts the view process for a session.
pub trait ViewLauncher: Send + Sync {
    /// Launch a view that will connect to `address`.
    fn launch(&self, title: &str, address: &Address) -> Result<()>;
}

/// One opened view, as seen from the host.
#[derive(Clone)]
pub struct ViewSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    key: String,
    title: String,
    broker: ConnectionBroker,
    backend: Arc<dyn ServiceDispatch>,
    remote: watch::Sender<Option<FrontendProxy>>,
    endpoint: Mutex<Option<Endpoint>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ViewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewSession")
            .field("key", &self.inner.key)
            .field("title", &self.inner.title)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ViewSession {
    /// Issue a key, expect the view's connection and launch the view.
    ///
    /// `backend` is served on every connection paired with this session.
    pub fn open(
        broker: &ConnectionBroker,
        title: impl Into<String>,
        backend: Arc<dyn ServiceDispatch>,
        launcher: &dyn ViewLauncher,
    ) -> Result<Self> {
        let key = broker.issue_key();
        let (remote, _) = watch::channel(None);
        let session = Self {
            inner: Arc::new(SessionInner {
                key,
                title: title.into(),
                broker: broker.clone(),
                backend,
                remote,
                endpoint: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };

        SessionInner::arm(&session.inner)?;

        let address = session.address();
        info!("Opening view '{}' at {}", session.inner.title, address);
        if let Err(e) = launcher.launch(&session.inner.title, &address) {
            session.close();
            return Err(e);
        }

        Ok(session)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// The address handed to the view process.
    pub fn address(&self) -> Address {
        self.inner.broker.address_for(&self.inner.key)
    }

    /// Proxy to the paired view, if one is connected.
    pub fn remote(&self) -> Option<FrontendProxy> {
        self.inner.remote.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .remote
            .borrow()
            .as_ref()
            .map(FrontendProxy::is_connected)
            .unwrap_or(false)
    }

    /// Observe the proxy going `None -> Some -> None` as views come and go.
    pub fn subscribe(&self) -> watch::Receiver<Option<FrontendProxy>> {
        self.inner.remote.subscribe()
    }

    /// Show `tree` in the view, or clear it with `None`.
    ///
    /// Returns `false` when no view is connected.
    pub fn push_tree(&self, tree: Option<&SyntaxTreeNode>) -> Result<bool> {
        let Some(remote) = self.remote() else {
            return Ok(false);
        };
        match tree {
            Some(tree) => remote.set_sub_tree(&[], tree)?,
            None => remote.reset_tree()?,
        }
        Ok(true)
    }

    /// Forward the editor cursor. Returns `false` when no view is connected.
    pub fn push_cursor(&self, pos: usize) -> Result<bool> {
        let Some(remote) = self.remote() else {
            return Ok(false);
        };
        remote.set_cursor_pos(pos)?;
        Ok(true)
    }

    /// Tear the session down: stop expecting connections under its key and
    /// close the current one.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.broker.cancel_pending(&self.inner.key);
        if let Some(endpoint) = self.inner.take_endpoint() {
            endpoint.close();
        }
        self.inner.remote.send_replace(None);
        info!("View session {} closed", self.inner.key);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl SessionInner {
    /// Expect the next connection for this session's key.
    fn arm(this: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(this);
        let handle = this.broker.register_pending(&this.key, {
            let weak = weak.clone();
            move |endpoint: Endpoint| async move {
                match weak.upgrade() {
                    Some(inner) => inner.attach(endpoint),
                    None => Err(RemotingError::ChannelClosed),
                }
            }
        })?;

        let key = this.key.clone();
        tokio::spawn(async move {
            let result = handle.paired().await;
            Self::after_pairing(weak, key, result).await;
        });
        Ok(())
    }

    /// Runs inside the broker's `on_ready`: serve the backend and build the
    /// proxy to the view.
    fn attach(&self, endpoint: Endpoint) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            endpoint.close();
            return Err(RemotingError::ChannelClosed);
        }

        endpoint.register_implementation(self.backend.clone())?;
        let proxy: FrontendProxy = endpoint.proxy();

        if let Ok(mut current) = self.endpoint.lock() {
            *current = Some(endpoint);
        }
        self.remote.send_replace(Some(proxy));

        info!("View session {} paired", self.key);
        Ok(())
    }

    async fn after_pairing(weak: Weak<Self>, key: String, result: Result<Endpoint>) {
        match result {
            Ok(endpoint) => {
                endpoint.closed().await;
                let Some(inner) = weak.upgrade() else { return };
                inner.detach();
                if !inner.closed.load(Ordering::SeqCst) {
                    info!("View for session {} disconnected", key);
                    inner.rearm();
                }
            }
            Err(RemotingError::ChannelClosed) => {
                debug!("Pending registration for session {} cancelled", key);
            }
            Err(e) => {
                warn!("Pairing for session {} failed: {}", key, e);
                if let Some(inner) = weak.upgrade() {
                    inner.rearm();
                }
            }
        }
    }

    fn rearm(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = Self::arm(self) {
            warn!("Could not re-arm session {}: {}", self.key, e);
        }
    }

    fn detach(&self) {
        self.take_endpoint();
        self.remote.send_replace(None);
    }

    fn take_endpoint(&self) -> Option<Endpoint> {
        self.endpoint.lock().ok().and_then(|mut current| current.take())
    }
}

/// The last handle going away tears the session down like `close`.
impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.broker.cancel_pending(&self.key);
        if let Some(endpoint) = self.take_endpoint() {
            endpoint.close();
        }
        debug!("View session {} dropped", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remoting::{CallArgs, ServiceContract};
    use crate::services::SYNTAX_TREE_VIEW_BACKEND;
    use serde_json::Value;

    struct NullBackend;

    #[async_trait::async_trait]
    impl ServiceDispatch for NullBackend {
        fn contract(&self) -> &'static ServiceContract {
            &SYNTAX_TREE_VIEW_BACKEND
        }

        async fn dispatch(&self, _method: &'static str, _args: CallArgs) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    struct RecordingLauncher(Mutex<Vec<Address>>);

    impl ViewLauncher for RecordingLauncher {
        fn launch(&self, _title: &str, address: &Address) -> Result<()> {
            self.0.lock().unwrap().push(address.clone());
            Ok(())
        }
    }

    struct FailingLauncher;

    impl ViewLauncher for FailingLauncher {
        fn launch(&self, _title: &str, _address: &Address) -> Result<()> {
            Err(RemotingError::Config {
                message: "no view executable".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_open_registers_and_launches() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let launcher = RecordingLauncher(Mutex::new(Vec::new()));

        let session = ViewSession::open(&broker, "AST", Arc::new(NullBackend), &launcher).unwrap();

        assert!(broker.is_pending(session.key()));
        assert_eq!(
            *launcher.0.lock().unwrap(),
            vec![Address::new("localhost", 1235, session.key())]
        );
        assert!(!session.is_connected());
        assert!(!session.push_cursor(3).unwrap());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_registration() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let launcher = RecordingLauncher(Mutex::new(Vec::new()));
        let session = ViewSession::open(&broker, "AST", Arc::new(NullBackend), &launcher).unwrap();

        session.close();
        assert!(session.is_closed());
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_cancels_pending_registration() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let launcher = RecordingLauncher(Mutex::new(Vec::new()));
        let session = ViewSession::open(&broker, "AST", Arc::new(NullBackend), &launcher).unwrap();
        let key = session.key().to_string();

        let other = session.clone();
        drop(session);
        assert!(broker.is_pending(&key));

        drop(other);
        assert!(!broker.is_pending(&key));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_launch_leaves_nothing_pending() {
        let broker = ConnectionBroker::new("localhost", 1235);
        let result = ViewSession::open(&broker, "AST", Arc::new(NullBackend), &FailingLauncher);
        assert!(matches!(result, Err(RemotingError::Config { .. })));
        assert_eq!(broker.pending_count(), 0);
    }
}
