//! Client side of a contract.
//!
//! [`RemoteProxy`] is the untyped form: it validates every call against the
//! contract before anything is written to the channel. Typed proxies in
//! [`crate::services`] wrap it and implement [`ServiceProxy`].

use crate::remoting::channel::Channel;
use crate::remoting::contract::ServiceContract;
use crate::Result;
use serde_json::Value;

/// Calls methods of one contract on the peer.
#[derive(Debug, Clone)]
pub struct RemoteProxy {
    channel: Channel,
    contract: &'static ServiceContract,
}

impl RemoteProxy {
    pub(crate) fn new(channel: Channel, contract: &'static ServiceContract) -> Self {
        Self { channel, contract }
    }

    pub fn contract(&self) -> &'static ServiceContract {
        self.contract
    }

    /// Invoke a request method and wait for the peer's reply.
    ///
    /// Fails with `UnknownMethod` if `method` is not a request of this
    /// contract, `ChannelClosed` if the channel goes away first, or with the
    /// peer's reported failure.
    pub async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.channel.request(self.contract, method, args).await
    }

    /// Invoke a notification method. Returns once the call is queued.
    pub fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.channel.notify(self.contract, method, args)
    }

    pub fn is_connected(&self) -> bool {
        !self.channel.is_closed()
    }

    /// Wait until the underlying channel closes.
    pub async fn disconnected(&self) {
        self.channel.closed().await
    }
}

/// A typed proxy generated (by hand) for one contract.
pub trait ServiceProxy: Sized {
    fn contract() -> &'static ServiceContract;

    fn from_remote(remote: RemoteProxy) -> Self;
}
