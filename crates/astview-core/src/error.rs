//! Error types for the remoting layer.
//!
//! Every variant maps to a JSON-RPC style error code so that failures raised
//! by a handler on one side of a channel can be carried in a reply envelope
//! and rebuilt as the same structured variant on the other side.

use crate::remoting::protocol::WireError;
use serde_json::json;
use thiserror::Error;

/// Main error type for astview.
#[derive(Debug, Error)]
pub enum RemotingError {
    // Pairing errors
    #[error("Unexpected incoming connection: no pending registration for key '{key}'")]
    UnexpectedConnection { key: String },

    #[error("A registration for key '{key}' is already pending")]
    DuplicateKey { key: String },

    #[error("Connection is already paired with key '{key}'")]
    AlreadyPaired { key: String },

    // Channel errors
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Method not found: {contract}.{method}")]
    MethodNotFound { contract: String, method: String },

    #[error("Contract already registered on this endpoint: {contract}")]
    ContractAlreadyRegistered { contract: String },

    #[error("Method {contract}.{method} is not callable as a {kind}")]
    UnknownMethod {
        contract: String,
        method: String,
        kind: String,
    },

    #[error("Invalid arguments for {method}: {message}")]
    InvalidArguments { method: String, message: String },

    #[error("Remote call failed ({code}): {message}")]
    Remote { code: i32, message: String },

    // View process errors
    #[error("No address information - query parameter 'address' is missing")]
    StartupContextMissing,

    #[error("Invalid startup context: {message}")]
    InvalidStartupContext { message: String },

    #[error("Gave up reconnecting after {attempts} consecutive failed attempts")]
    ReconnectExhausted { attempts: u32 },

    // Transport errors
    #[error("Failed to connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for astview operations.
pub type Result<T> = std::result::Result<T, RemotingError>;

impl From<std::io::Error> for RemotingError {
    fn from(err: std::io::Error) -> Self {
        RemotingError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RemotingError {
    fn from(err: serde_json::Error) -> Self {
        RemotingError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Error codes for the pairing handshake (application-defined range).
const UNEXPECTED_CONNECTION: i32 = -32010;
const DUPLICATE_KEY: i32 = -32011;
const ALREADY_PAIRED: i32 = -32012;
const CHANNEL_CLOSED: i32 = -32013;

impl RemotingError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32010: Unexpected connection (unknown pairing key)
    /// - -32011: Duplicate pending key
    /// - -32012: Connection already paired
    /// - -32013: Channel closed
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            RemotingError::Json { .. } => -32700,
            RemotingError::MethodNotFound { .. } | RemotingError::UnknownMethod { .. } => -32601,
            RemotingError::InvalidArguments { .. } => -32602,
            RemotingError::UnexpectedConnection { .. } => UNEXPECTED_CONNECTION,
            RemotingError::DuplicateKey { .. } => DUPLICATE_KEY,
            RemotingError::AlreadyPaired { .. } => ALREADY_PAIRED,
            RemotingError::ChannelClosed => CHANNEL_CLOSED,
            RemotingError::Remote { code, .. } => *code,
            _ => -32603,
        }
    }

    /// Convert into the error object carried by a reply envelope.
    pub fn to_wire(&self) -> WireError {
        let data = match self {
            RemotingError::UnexpectedConnection { key }
            | RemotingError::DuplicateKey { key }
            | RemotingError::AlreadyPaired { key } => Some(json!({ "key": key })),
            RemotingError::MethodNotFound { contract, method } => {
                Some(json!({ "contract": contract, "method": method }))
            }
            RemotingError::InvalidArguments { method, .. } => Some(json!({ "method": method })),
            _ => None,
        };

        WireError {
            code: self.to_rpc_error_code(),
            message: self.to_string(),
            data,
        }
    }

    /// Rebuild a structured error from a reply envelope's error object.
    ///
    /// Codes without a dedicated variant become [`RemotingError::Remote`].
    pub fn from_wire(err: WireError) -> Self {
        let field = |name: &str| -> Option<String> {
            err.data
                .as_ref()
                .and_then(|d| d.get(name))
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        match err.code {
            UNEXPECTED_CONNECTION => match field("key") {
                Some(key) => RemotingError::UnexpectedConnection { key },
                None => RemotingError::Remote {
                    code: err.code,
                    message: err.message,
                },
            },
            DUPLICATE_KEY => RemotingError::DuplicateKey {
                key: field("key").unwrap_or_default(),
            },
            ALREADY_PAIRED => RemotingError::AlreadyPaired {
                key: field("key").unwrap_or_default(),
            },
            CHANNEL_CLOSED => RemotingError::ChannelClosed,
            -32601 => match (field("contract"), field("method")) {
                (Some(contract), Some(method)) => RemotingError::MethodNotFound { contract, method },
                _ => RemotingError::Remote {
                    code: err.code,
                    message: err.message,
                },
            },
            -32602 => RemotingError::InvalidArguments {
                method: field("method").unwrap_or_default(),
                message: err.message,
            },
            code => RemotingError::Remote {
                code,
                message: err.message,
            },
        }
    }

    /// Check if a failed connection attempt is worth repeating.
    ///
    /// Transport failures, an unknown key (the host may re-arm it) and
    /// host-side setup failures are retried. A contract mismatch is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemotingError::ChannelClosed
                | RemotingError::Connect { .. }
                | RemotingError::Io { .. }
                | RemotingError::UnexpectedConnection { .. }
                | RemotingError::Remote { .. }
        )
    }
}
