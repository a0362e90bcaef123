//! `Registry` contract: the pairing handshake.
//!
//! Served by the broker on every accepted connection before anything else.
//! The view's first call is `register(key)`.

use crate::remoting::{
    to_arg, CallArgs, MethodDescriptor, RemoteProxy, ServiceContract, ServiceDispatch,
    ServiceProxy,
};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub static REGISTRY: ServiceContract = ServiceContract {
    id: "Registry",
    methods: &[MethodDescriptor::request("register", 1)],
};

/// Host-side handshake.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Pair this connection with the pending registration for `key`.
    async fn register(&self, key: String) -> Result<()>;
}

/// Routes `Registry` calls to an implementation.
pub struct RegistryDispatcher<T>(pub Arc<T>);

#[async_trait]
impl<T: Registry> ServiceDispatch for RegistryDispatcher<T> {
    fn contract(&self) -> &'static ServiceContract {
        &REGISTRY
    }

    async fn dispatch(&self, method: &'static str, args: CallArgs) -> Result<Value> {
        match method {
            "register" => {
                self.0.register(args.get(0)?).await?;
                Ok(Value::Null)
            }
            other => Err(crate::RemotingError::MethodNotFound {
                contract: REGISTRY.id.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

/// View-side proxy for the host's registry.
#[derive(Debug, Clone)]
pub struct RegistryProxy {
    remote: RemoteProxy,
}

impl ServiceProxy for RegistryProxy {
    fn contract() -> &'static ServiceContract {
        &REGISTRY
    }

    fn from_remote(remote: RemoteProxy) -> Self {
        Self { remote }
    }
}

impl RegistryProxy {
    pub async fn register(&self, key: &str) -> Result<()> {
        self.remote.request("register", vec![to_arg(key)?]).await?;
        Ok(())
    }
}
