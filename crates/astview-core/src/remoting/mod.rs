//! Remoting layer: framed call envelopes over a byte stream.
//!
//! Layering, leaf first:
//!
//! - `protocol`: envelope types and length-prefixed framing
//! - `contract`: static method declarations and the dispatch trait
//! - `channel`: ordered bidirectional delivery, pending request tracking
//! - `endpoint` / `proxy`: serving local implementations, calling the peer

mod channel;
mod contract;
mod dispatch;
mod endpoint;
pub mod protocol;
mod proxy;

pub use channel::Channel;
pub use contract::{
    to_arg, CallArgs, MethodDescriptor, MethodKind, ServiceContract, ServiceDispatch,
};
pub use endpoint::Endpoint;
pub use protocol::{CallEnvelope, Envelope, ReplyEnvelope, WireError};
pub use proxy::{RemoteProxy, ServiceProxy};
