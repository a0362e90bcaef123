//! `SyntaxTreeViewFrontend`: implemented by the view, called by the host.

use crate::remoting::{
    to_arg, CallArgs, MethodDescriptor, RemoteProxy, ServiceContract, ServiceDispatch,
    ServiceProxy,
};
use crate::tree::SyntaxTreeNode;
use crate::{RemotingError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub static SYNTAX_TREE_VIEW_FRONTEND: ServiceContract = ServiceContract {
    id: "SyntaxTreeViewFrontend",
    methods: &[
        MethodDescriptor::notification("setCursorPos", 1),
        MethodDescriptor::notification("setSubTree", 2),
        MethodDescriptor::notification("resetTree", 0),
    ],
};

/// Tree display controlled by the host.
#[async_trait]
pub trait SyntaxTreeViewFrontend: Send + Sync + 'static {
    async fn set_cursor_pos(&self, pos: usize) -> Result<()>;

    /// Replace the node at `path` (child indices from the root) with `tree`.
    /// An empty path replaces the whole tree.
    async fn set_sub_tree(&self, path: Vec<usize>, tree: SyntaxTreeNode) -> Result<()>;

    async fn reset_tree(&self) -> Result<()>;
}

pub struct FrontendDispatcher<T>(pub Arc<T>);

#[async_trait]
impl<T: SyntaxTreeViewFrontend> ServiceDispatch for FrontendDispatcher<T> {
    fn contract(&self) -> &'static ServiceContract {
        &SYNTAX_TREE_VIEW_FRONTEND
    }

    async fn dispatch(&self, method: &'static str, args: CallArgs) -> Result<Value> {
        match method {
            "setCursorPos" => self.0.set_cursor_pos(args.get(0)?).await?,
            "setSubTree" => self.0.set_sub_tree(args.get(0)?, args.get(1)?).await?,
            "resetTree" => self.0.reset_tree().await?,
            other => {
                return Err(RemotingError::MethodNotFound {
                    contract: SYNTAX_TREE_VIEW_FRONTEND.id.to_string(),
                    method: other.to_string(),
                })
            }
        }
        Ok(Value::Null)
    }
}

/// Host-side proxy for a paired view.
#[derive(Debug, Clone)]
pub struct FrontendProxy {
    remote: RemoteProxy,
}

impl ServiceProxy for FrontendProxy {
    fn contract() -> &'static ServiceContract {
        &SYNTAX_TREE_VIEW_FRONTEND
    }

    fn from_remote(remote: RemoteProxy) -> Self {
        Self { remote }
    }
}

impl FrontendProxy {
    pub fn set_cursor_pos(&self, pos: usize) -> Result<()> {
        self.remote.notify("setCursorPos", vec![to_arg(&pos)?])
    }

    pub fn set_sub_tree(&self, path: &[usize], tree: &SyntaxTreeNode) -> Result<()> {
        self.remote
            .notify("setSubTree", vec![to_arg(path)?, to_arg(tree)?])
    }

    pub fn reset_tree(&self) -> Result<()> {
        self.remote.notify("resetTree", vec![])
    }

    pub fn is_connected(&self) -> bool {
        self.remote.is_connected()
    }
}
