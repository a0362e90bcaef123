//! Service contracts.
//!
//! A contract is a static, compile-time list of remotely callable methods.
//! Each method has a name, a kind and an argument count. The same contract
//! value drives both sides of a channel: the serving side builds its dispatch
//! table from it and the calling side validates proxy calls against it.
//!
//! Kind is part of a method's identity: a request and a notification with the
//! same name are different methods, and a call whose kind does not match the
//! declaration is treated as a contract mismatch.

use crate::{RemotingError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether the caller waits for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodKind {
    /// The caller suspends until a reply (value or failure) arrives.
    Request,
    /// Fire-and-forget; no reply is ever produced.
    Notification,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Request => "request",
            MethodKind::Notification => "notification",
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declaration of one contract method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub kind: MethodKind,
    pub arity: usize,
}

impl MethodDescriptor {
    pub const fn request(name: &'static str, arity: usize) -> Self {
        Self {
            name,
            kind: MethodKind::Request,
            arity,
        }
    }

    pub const fn notification(name: &'static str, arity: usize) -> Self {
        Self {
            name,
            kind: MethodKind::Notification,
            arity,
        }
    }
}

/// A named, immutable set of methods.
#[derive(Debug, PartialEq, Eq)]
pub struct ServiceContract {
    pub id: &'static str,
    pub methods: &'static [MethodDescriptor],
}

impl ServiceContract {
    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&'static MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Look up a method by name and kind.
    ///
    /// Fails with [`RemotingError::UnknownMethod`] if the contract has no such
    /// method, or declares it with the other kind.
    pub fn resolve(&self, name: &str, kind: MethodKind) -> Result<&'static MethodDescriptor> {
        self.method(name)
            .filter(|m| m.kind == kind)
            .ok_or_else(|| RemotingError::UnknownMethod {
                contract: self.id.to_string(),
                method: name.to_string(),
                kind: kind.to_string(),
            })
    }
}

/// Positional arguments of one incoming call.
#[derive(Debug, Clone)]
pub struct CallArgs {
    method: &'static str,
    values: Vec<Value>,
}

impl CallArgs {
    pub fn new(method: &'static str, values: Vec<Value>) -> Self {
        Self { method, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Deserialize the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| RemotingError::InvalidArguments {
                method: self.method.to_string(),
                message: format!("missing argument {}", index),
            })?;

        T::deserialize(value).map_err(|e| RemotingError::InvalidArguments {
            method: self.method.to_string(),
            message: format!("argument {}: {}", index, e),
        })
    }
}

/// Server side of a contract: routes calls to a local implementation.
///
/// One dispatcher per contract is registered on an endpoint. The endpoint has
/// already checked the method name, kind and arity against
/// [`ServiceDispatch::contract`] before `dispatch` is called.
#[async_trait::async_trait]
pub trait ServiceDispatch: Send + Sync + 'static {
    /// The contract this dispatcher serves.
    fn contract(&self) -> &'static ServiceContract;

    /// Invoke `method` on the local implementation.
    ///
    /// Notifications return `Value::Null`; the value is discarded.
    async fn dispatch(&self, method: &'static str, args: CallArgs) -> Result<Value>;
}

/// Serialize one proxy argument.
pub fn to_arg<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
