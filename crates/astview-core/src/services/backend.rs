//! `SyntaxTreeViewBackend`: implemented by the host, called by the view.

use crate::remoting::{
    to_arg, CallArgs, MethodDescriptor, RemoteProxy, ServiceContract, ServiceDispatch,
    ServiceProxy,
};
use crate::{RemotingError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub static SYNTAX_TREE_VIEW_BACKEND: ServiceContract = ServiceContract {
    id: "SyntaxTreeViewBackend",
    methods: &[
        MethodDescriptor::notification("clearMarkedRegion", 0),
        MethodDescriptor::notification("setMarkedRegion", 2),
    ],
};

/// Editor highlighting controls exposed to a view.
#[async_trait]
pub trait SyntaxTreeViewBackend: Send + Sync + 'static {
    async fn clear_marked_region(&self) -> Result<()>;

    /// Highlight the byte range `[start_pos, end_pos)` in the editor.
    async fn set_marked_region(&self, start_pos: usize, end_pos: usize) -> Result<()>;
}

pub struct BackendDispatcher<T>(pub Arc<T>);

#[async_trait]
impl<T: SyntaxTreeViewBackend> ServiceDispatch for BackendDispatcher<T> {
    fn contract(&self) -> &'static ServiceContract {
        &SYNTAX_TREE_VIEW_BACKEND
    }

    async fn dispatch(&self, method: &'static str, args: CallArgs) -> Result<Value> {
        match method {
            "clearMarkedRegion" => self.0.clear_marked_region().await?,
            "setMarkedRegion" => self.0.set_marked_region(args.get(0)?, args.get(1)?).await?,
            other => {
                return Err(RemotingError::MethodNotFound {
                    contract: SYNTAX_TREE_VIEW_BACKEND.id.to_string(),
                    method: other.to_string(),
                })
            }
        }
        Ok(Value::Null)
    }
}

/// View-side proxy for the host's highlighting controls.
#[derive(Debug, Clone)]
pub struct BackendProxy {
    remote: RemoteProxy,
}

impl ServiceProxy for BackendProxy {
    fn contract() -> &'static ServiceContract {
        &SYNTAX_TREE_VIEW_BACKEND
    }

    fn from_remote(remote: RemoteProxy) -> Self {
        Self { remote }
    }
}

impl BackendProxy {
    pub fn clear_marked_region(&self) -> Result<()> {
        self.remote.notify("clearMarkedRegion", vec![])
    }

    pub fn set_marked_region(&self, start_pos: usize, end_pos: usize) -> Result<()> {
        self.remote
            .notify("setMarkedRegion", vec![to_arg(&start_pos)?, to_arg(&end_pos)?])
    }

    pub fn is_connected(&self) -> bool {
        self.remote.is_connected()
    }
}
