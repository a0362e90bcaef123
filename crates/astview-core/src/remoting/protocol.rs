//! Call envelopes and framing.
//!
//! Every message on a channel is one envelope, encoded as UTF-8 JSON and
//! framed with a 4-byte big-endian length prefix:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! A `call` envelope names a contract method and carries positional
//! arguments. Requests carry a `callId`; notifications never do and never
//! get a `reply`.

use crate::remoting::contract::MethodKind;
use crate::{RemotingError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One message on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "camelCase")]
pub enum Envelope {
    Call(CallEnvelope),
    Reply(ReplyEnvelope),
}

/// An outgoing or incoming method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    /// Present for requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<u64>,
    pub contract: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub kind: MethodKind,
}

impl CallEnvelope {
    pub fn request(call_id: u64, contract: &str, method: &str, args: Vec<Value>) -> Self {
        Self {
            call_id: Some(call_id),
            contract: contract.to_string(),
            method: method.to_string(),
            args,
            kind: MethodKind::Request,
        }
    }

    pub fn notification(contract: &str, method: &str, args: Vec<Value>) -> Self {
        Self {
            call_id: None,
            contract: contract.to_string(),
            method: method.to_string(),
            args,
            kind: MethodKind::Notification,
        }
    }
}

/// The outcome of a request, matched to its caller by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub call_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ReplyEnvelope {
    pub fn success(call_id: u64, result: Value) -> Self {
        Self {
            call_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(call_id: u64, error: &RemotingError) -> Self {
        Self {
            call_id,
            result: None,
            error: Some(error.to_wire()),
        }
    }

    /// Turn the reply into the value or error seen by the caller.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(RemotingError::from_wire(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC style error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection). Frames longer than
/// `max_size` are rejected with `Validation`.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    check_frame_size(len, max_size)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| RemotingError::Validation {
        field: "frame".to_string(),
        message: format!("message size {} does not fit a frame header", payload.len()),
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize an envelope into a frame payload no larger than `max_size`.
///
/// Oversized envelopes are refused here, before they reach the stream, so
/// the peer never sees a frame it would have to reject.
pub fn encode_envelope(envelope: &Envelope, max_size: usize) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(envelope)?;
    check_frame_size(bytes.len(), max_size)?;
    Ok(bytes)
}

fn check_frame_size(len: usize, max_size: usize) -> Result<()> {
    if len > max_size {
        return Err(RemotingError::Validation {
            field: "frame".to_string(),
            message: format!("message size {} exceeds maximum {}", len, max_size),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemotingConfig;
    use serde_json::json;

    #[test]
    fn test_notification_has_no_call_id_on_the_wire() {
        let env = Envelope::Call(CallEnvelope::notification(
            "SyntaxTreeViewBackend",
            "setMarkedRegion",
            vec![json!(10), json!(20)],
        ));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["direction"], "call");
        assert_eq!(value["kind"], "notification");
        assert!(value.get("callId").is_none());
        assert_eq!(value["args"], json!([10, 20]));
    }

    #[test]
    fn test_request_carries_call_id() {
        let env = Envelope::Call(CallEnvelope::request(7, "Registry", "register", vec![json!("3")]));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["callId"], 7);
        assert_eq!(value["kind"], "request");
    }

    #[test]
    fn test_failed_reply_rebuilds_error() {
        let reply = ReplyEnvelope::failure(3, &RemotingError::UnexpectedConnection { key: "99".into() });
        let json = serde_json::to_string(&Envelope::Reply(reply)).unwrap();
        assert!(!json.contains("\"result\""));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        let Envelope::Reply(reply) = parsed else {
            panic!("expected reply");
        };
        assert!(matches!(
            reply.into_result(),
            Err(RemotingError::UnexpectedConnection { .. })
        ));
    }

    #[test]
    fn test_reply_without_result_is_null() {
        let reply: ReplyEnvelope = serde_json::from_value(json!({ "callId": 1 })).unwrap();
        assert_eq!(reply.into_result().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let payload = b"hello world";
        let mut buf = Vec::new();

        write_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor, RemotingConfig::MAX_MESSAGE_SIZE).await.unwrap();

        assert_eq!(read_back, Some(payload.to_vec()));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor, RemotingConfig::MAX_MESSAGE_SIZE).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        let huge_len: u32 = (RemotingConfig::MAX_MESSAGE_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, RemotingConfig::MAX_MESSAGE_SIZE).await;
        assert!(matches!(result, Err(RemotingError::Validation { .. })));
    }

    #[test]
    fn test_encode_refuses_oversized_envelope() {
        let env = Envelope::Call(CallEnvelope::notification(
            "SyntaxTreeViewFrontend",
            "setCursorPos",
            vec![json!(12)],
        ));
        let bytes = encode_envelope(&env, RemotingConfig::MAX_MESSAGE_SIZE).unwrap();
        assert!(matches!(
            encode_envelope(&env, bytes.len() - 1),
            Err(RemotingError::Validation { .. })
        ));
        assert_eq!(encode_envelope(&env, bytes.len()).unwrap(), bytes);
    }
}
