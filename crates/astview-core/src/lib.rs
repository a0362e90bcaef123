//! Astview Core - host/view remoting for the syntax tree viewer.
//!
//! A long-lived host process and short-lived view processes call typed
//! methods on each other over one shared listening address. This crate
//! provides the pieces both sides need:
//!
//! - [`ConnectionBroker`]: pairs anonymous inbound connections with pending
//!   registrations using one-time keys.
//! - [`remoting`]: ordered, bidirectional request/notification channel driven
//!   by static service contracts.
//! - [`ViewSession`]: host-side state of one opened view.
//! - [`Reconnector`]: view-side loop that keeps a view paired with its session.
//!
//! # Example
//!
//! ```rust,ignore
//! use astview_core::{BrokerSettings, ConnectionBroker, ViewSession};
//!
//! #[tokio::main]
//! async fn main() -> astview_core::Result<()> {
//!     let handle = ConnectionBroker::bind(BrokerSettings::default()).await?;
//!     let session = ViewSession::open(handle.broker(), "AST", backend, &launcher)?;
//!
//!     let mut views = session.subscribe();
//!     while views.changed().await.is_ok() {
//!         session.push_tree(Some(&tree))?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod broker;
pub mod cancel;
pub mod config;
pub mod error;
pub mod reconnect;
pub mod remoting;
pub mod services;
pub mod session;
pub mod tree;

pub use address::Address;
pub use broker::{BrokerHandle, ConnectionBroker, PairingHandle};
pub use cancel::CancellationToken;
pub use config::BrokerSettings;
pub use error::{RemotingError, Result};
pub use reconnect::{ConnectionState, Connector, ReconnectPolicy, Reconnector, TcpConnector};
pub use remoting::{Endpoint, RemoteProxy, ServiceContract, ServiceDispatch, ServiceProxy};
pub use session::{ViewLauncher, ViewSession};
pub use tree::{JsonTreeProvider, SyntaxTreeNode, SyntaxTreeProvider};
