//! Service contracts shared by host and view.
//!
//! Each contract comes as a static declaration, a service trait for the
//! implementing side, a dispatcher that routes inbound calls to that trait, and
//! a typed proxy for the calling side.

mod backend;
mod frontend;
mod registry;

pub use backend::{
    BackendDispatcher, BackendProxy, SyntaxTreeViewBackend, SYNTAX_TREE_VIEW_BACKEND,
};
pub use frontend::{
    FrontendDispatcher, FrontendProxy, SyntaxTreeViewFrontend, SYNTAX_TREE_VIEW_FRONTEND,
};
pub use registry::{Registry, RegistryDispatcher, RegistryProxy, REGISTRY};
