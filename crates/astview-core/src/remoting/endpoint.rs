//! Remoting endpoint: one per channel.
//!
//! Serves local implementations registered against contracts and hands out
//! proxies for calling the peer's contracts over the same channel.

use crate::remoting::channel::Channel;
use crate::remoting::contract::{ServiceContract, ServiceDispatch};
use crate::remoting::dispatch::DispatchTable;
use crate::remoting::proxy::{RemoteProxy, ServiceProxy};
use crate::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Cloneable handle to one side of a channel.
#[derive(Clone, Debug)]
pub struct Endpoint {
    channel: Channel,
    table: Arc<DispatchTable>,
}

impl Endpoint {
    /// Open an endpoint over any byte stream.
    ///
    /// Must be called from within a tokio runtime; the channel tasks are
    /// spawned immediately.
    pub fn open<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let table = Arc::new(DispatchTable::new());
        let channel = Channel::open(stream, table.clone());
        Self { channel, table }
    }

    /// Route inbound calls on the dispatcher's contract to it.
    ///
    /// Fails with `ContractAlreadyRegistered` if the contract is already
    /// served on this endpoint.
    pub fn register_implementation(&self, dispatcher: Arc<dyn ServiceDispatch>) -> Result<()> {
        let contract = dispatcher.contract().id;
        self.table.insert(dispatcher)?;
        debug!(
            "Channel {}: serving contract {}",
            self.channel.id(),
            contract
        );
        Ok(())
    }

    /// Untyped proxy for `contract` on the peer.
    pub fn remote(&self, contract: &'static ServiceContract) -> RemoteProxy {
        RemoteProxy::new(self.channel.clone(), contract)
    }

    /// Typed proxy for the peer's implementation of `P::contract()`.
    pub fn proxy<P: ServiceProxy>(&self) -> P {
        P::from_remote(self.remote(P::contract()))
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Wait until the channel is closed by either side.
    pub async fn closed(&self) {
        self.channel.closed().await
    }

    pub fn close(&self) {
        self.channel.close()
    }
}
