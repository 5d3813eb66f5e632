//! Typed header shapes keyed by message type.
//!
//! The codec round-trips any JSON object. Before a decoded frame is handed to
//! collaborators, [`Message::from_frame`] narrows its header into the variant
//! declared for its message type, so required fields are checked once here
//! instead of at every consumer.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::protocol::codec::{Frame, FrameCodec, Header};
use crate::protocol::types::{Band, MessageType};

// =============================================================================
// Control headers
// =============================================================================

/// Liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub request_id: String,
    /// Client send time, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Reply to a [`PingHeader`], echoing its request id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<u64>,
}

/// Phase of the credential exchange carried by AUTHENTICATE frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum AuthPhase {
    /// Gateway asks the client to authenticate.
    Required {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        methods: Vec<String>,
    },
    /// Client supplies credentials.
    Credentials { credentials: Value },
    /// Gateway accepted the credentials.
    Success,
    /// Gateway rejected the credentials.
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub phase: AuthPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Gateway-reported status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHeader {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyHeader {
    pub latency_ms: u64,
}

// =============================================================================
// Session data headers
// =============================================================================

/// Header for SSH_DATA; the bytes themselves travel in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataHeader {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeHeader {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandHeader {
    pub session_id: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAckHeader {
    pub session_id: String,
    pub bytes: u64,
}

// =============================================================================
// Sub-protocol headers
// =============================================================================

/// Header shared by sub-protocol operations and their responses.
///
/// Every operation is correlated by `requestId`; operation-specific fields
/// (`path`, `newPath`, `mode`, ...) are kept verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpHeader {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

// =============================================================================
// Tagged union
// =============================================================================

/// A frame header narrowed into the shape its message type declares.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping(PingHeader),
    Pong(PongHeader),
    Authenticate(AuthenticateHeader),
    Error(ErrorHeader),
    Status(StatusHeader),
    Latency(LatencyHeader),
    SshData(DataHeader),
    SshResize(ResizeHeader),
    SshCommand(CommandHeader),
    SshDataAck(DataAckHeader),
    /// Sub-protocol operation or response (`kind` is in the 0x20 or 0x80 band).
    Sftp { kind: MessageType, header: SftpHeader },
    /// Control types with no required fields (handshake, connect, ...).
    Control { kind: MessageType, header: Header },
}

impl Message {
    /// Message type this header belongs to.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
            Message::Authenticate(_) => MessageType::Authenticate,
            Message::Error(_) => MessageType::Error,
            Message::Status(_) => MessageType::Status,
            Message::Latency(_) => MessageType::Latency,
            Message::SshData(_) => MessageType::SshData,
            Message::SshResize(_) => MessageType::SshResize,
            Message::SshCommand(_) => MessageType::SshCommand,
            Message::SshDataAck(_) => MessageType::SshDataAck,
            Message::Sftp { kind, .. } | Message::Control { kind, .. } => *kind,
        }
    }

    /// Narrow a decoded frame.
    ///
    /// Returns `Ok(None)` for unregistered type codes and
    /// `Err(Error::InvalidHeader)` if the header lacks required fields.
    pub fn from_frame(frame: &Frame) -> Result<Option<Message>> {
        let Some(kind) = frame.kind() else {
            return Ok(None);
        };
        Self::from_header(kind, &frame.header).map(Some)
    }

    /// Narrow a header for a known message type.
    pub fn from_header(kind: MessageType, header: &Header) -> Result<Message> {
        let msg = match kind {
            MessageType::Ping => Message::Ping(narrow(kind, header)?),
            MessageType::Pong => Message::Pong(narrow(kind, header)?),
            MessageType::Authenticate => Message::Authenticate(narrow(kind, header)?),
            MessageType::Error => Message::Error(narrow(kind, header)?),
            MessageType::Status => Message::Status(narrow(kind, header)?),
            MessageType::Latency => Message::Latency(narrow(kind, header)?),
            MessageType::SshData => Message::SshData(narrow(kind, header)?),
            MessageType::SshResize => Message::SshResize(narrow(kind, header)?),
            MessageType::SshCommand => Message::SshCommand(narrow(kind, header)?),
            MessageType::SshDataAck => Message::SshDataAck(narrow(kind, header)?),
            _ if matches!(kind.band(), Band::SubProtocol | Band::Response) => Message::Sftp {
                kind,
                header: narrow(kind, header)?,
            },
            _ => Message::Control {
                kind,
                header: header.clone(),
            },
        };
        Ok(msg)
    }

    /// Serialize the header back into a JSON object.
    pub fn to_header(&self) -> Result<Header> {
        let value = match self {
            Message::Ping(h) => to_value(h)?,
            Message::Pong(h) => to_value(h)?,
            Message::Authenticate(h) => to_value(h)?,
            Message::Error(h) => to_value(h)?,
            Message::Status(h) => to_value(h)?,
            Message::Latency(h) => to_value(h)?,
            Message::SshData(h) => to_value(h)?,
            Message::SshResize(h) => to_value(h)?,
            Message::SshCommand(h) => to_value(h)?,
            Message::SshDataAck(h) => to_value(h)?,
            Message::Sftp { header, .. } => to_value(header)?,
            Message::Control { header, .. } => return Ok(header.clone()),
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(Error::Encoding {
                message: format!("{} header is not an object", self.message_type()),
            }),
        }
    }

    /// Encode as a frame with the given payload.
    pub fn encode(&self, payload: Option<&[u8]>) -> Result<Bytes> {
        FrameCodec::encode(self.message_type(), &self.to_header()?, payload)
    }
}

fn narrow<T: DeserializeOwned>(kind: MessageType, header: &Header) -> Result<T> {
    serde_json::from_value(Value::Object(header.clone())).map_err(|e| Error::InvalidHeader {
        message_type: kind.name().to_string(),
        message: e.to_string(),
    })
}

fn to_value<T: Serialize>(header: &T) -> Result<Value> {
    serde_json::to_value(header).map_err(|e| Error::Encoding {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode(bytes: &[u8]) -> Message {
        let frame = FrameCodec::decode(bytes).unwrap();
        Message::from_frame(&frame).unwrap().unwrap()
    }

    #[test]
    fn ping_narrows() {
        let bytes = FrameCodec::encode(
            MessageType::Ping,
            &json!({"sessionId": "s1", "requestId": "r1", "timestamp": 1000}),
            None,
        )
        .unwrap();
        assert_eq!(
            decode(&bytes),
            Message::Ping(PingHeader {
                session_id: Some("s1".into()),
                request_id: "r1".into(),
                timestamp: Some(1000),
            })
        );
    }

    #[test]
    fn pong_without_integer_timestamp_narrows() {
        let pong: PongHeader = serde_json::from_value(json!({"requestId": "r1"})).unwrap();
        assert_eq!(pong.request_id, "r1");
        assert_eq!(pong.timestamp, None);

        // Browsers may echo a fractional `performance.now()` reading.
        let fractional = serde_json::from_value::<PongHeader>(
            json!({"requestId": "r1", "timestamp": 1234.5}),
        );
        assert!(fractional.is_err());
    }

    #[test]
    fn missing_required_field_is_invalid_header() {
        let bytes = FrameCodec::encode(MessageType::SshResize, &json!({"cols": 80}), None).unwrap();
        let frame = FrameCodec::decode(&bytes).unwrap();
        let err = Message::from_frame(&frame).unwrap_err();
        match err {
            Error::InvalidHeader { message_type, .. } => assert_eq!(message_type, "SSH_RESIZE"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_not_narrowed() {
        let bytes = FrameCodec::encode(0x55u8, &json!({"x": 1}), None).unwrap();
        let frame = FrameCodec::decode(&bytes).unwrap();
        assert!(Message::from_frame(&frame).unwrap().is_none());
    }

    #[test]
    fn auth_phases_use_phase_tag() {
        let required = AuthenticateHeader {
            session_id: None,
            phase: AuthPhase::Required {
                methods: vec!["password".into()],
            },
        };
        let value = serde_json::to_value(&required).unwrap();
        assert_eq!(value, json!({"phase": "required", "methods": ["password"]}));

        let failure: AuthenticateHeader =
            serde_json::from_value(json!({"phase": "failure", "reason": "bad key"})).unwrap();
        assert_eq!(
            failure.phase,
            AuthPhase::Failure {
                reason: Some("bad key".into())
            }
        );

        let success: AuthenticateHeader =
            serde_json::from_value(json!({"phase": "success", "sessionId": "abc"})).unwrap();
        assert_eq!(success.phase, AuthPhase::Success);
        assert_eq!(success.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn sftp_keeps_operation_fields() {
        let bytes = FrameCodec::encode(
            MessageType::SftpRename,
            &json!({"requestId": "7", "path": "/a", "newPath": "/b"}),
            None,
        )
        .unwrap();
        match decode(&bytes) {
            Message::Sftp { kind, header } => {
                assert_eq!(kind, MessageType::SftpRename);
                assert_eq!(header.request_id, "7");
                assert_eq!(header.fields["path"], "/a");
                assert_eq!(header.fields["newPath"], "/b");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn control_without_shape_is_passed_through() {
        let bytes =
            FrameCodec::encode(MessageType::Handshake, &json!({"client": "web"}), None).unwrap();
        match decode(&bytes) {
            Message::Control { kind, header } => {
                assert_eq!(kind, MessageType::Handshake);
                assert_eq!(header["client"], "web");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn message_encode_round_trips() {
        let msg = Message::SshResize(ResizeHeader {
            session_id: "s".into(),
            cols: 132,
            rows: 43,
        });
        let bytes = msg.encode(None).unwrap();
        assert_eq!(decode(&bytes), msg);

        let data = Message::SshData(DataHeader {
            session_id: "s".into(),
        });
        let bytes = data.encode(Some(b"ls -la\r")).unwrap();
        let frame = FrameCodec::decode(&bytes).unwrap();
        assert_eq!(frame.payload_bytes(), b"ls -la\r");
        assert_eq!(Message::from_frame(&frame).unwrap(), Some(data));
    }
}
