//! Binary frame codec.
//!
//! Format (all integers big-endian):
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬────────────┬──────────────┬───────────┐
//! │ Magic    │ Version │ Type     │ Header len │ Header       │ Payload   │
//! │ 4 bytes  │ 1 byte  │ 1 byte   │ 4 bytes    │ UTF-8 JSON   │ remainder │
//! └──────────┴─────────┴──────────┴────────────┴──────────────┴───────────┘
//! ```
//!
//! One transport message carries exactly one frame, so the payload is
//! everything after the header. The codec treats the header as an opaque JSON
//! object; narrowing it into a typed shape happens in [`super::headers`].

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::constants::{FRAME_MAGIC, FRAME_PREAMBLE_LEN, PROTOCOL_VERSION, REQUEST_ID_FIELD};
use crate::error::{Error, Result};
use crate::protocol::types::{self, MessageType};

/// Decoded JSON header.
pub type Header = Map<String, Value>;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Protocol version the frame was written with.
    pub version: u8,
    /// Raw message type code. May be unregistered.
    pub message_type: u8,
    /// JSON header object.
    pub header: Header,
    /// Opaque payload, `None` when the frame ends after the header.
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Build a frame at the current protocol version.
    pub fn new(message_type: impl Into<u8>, header: Header, payload: Option<Bytes>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type: message_type.into(),
            header,
            payload,
        }
    }

    /// Registered message type, if the code is known.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.message_type)
    }

    /// Canonical name of the message type (`UNKNOWN_<code>` if unregistered).
    pub fn type_name(&self) -> Cow<'static, str> {
        types::name_of(self.message_type)
    }

    /// Request correlation id carried in the header.
    pub fn request_id(&self) -> Option<&str> {
        self.header.get(REQUEST_ID_FIELD).and_then(Value::as_str)
    }

    /// Payload bytes, empty if absent.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }
}

/// Frame encoder/decoder.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame.
    ///
    /// `header` must serialize to a JSON object. The payload is appended
    /// verbatim; no padding is added.
    pub fn encode<H>(message_type: impl Into<u8>, header: &H, payload: Option<&[u8]>) -> Result<Bytes>
    where
        H: Serialize + ?Sized,
    {
        let header_bytes = Self::serialize_header(header)?;
        let header_len = u32::try_from(header_bytes.len()).map_err(|_| Error::Encoding {
            message: format!("header too large: {} bytes", header_bytes.len()),
        })?;
        let payload = payload.unwrap_or_default();

        let mut buf =
            BytesMut::with_capacity(FRAME_PREAMBLE_LEN + header_bytes.len() + payload.len());
        buf.put_u32(FRAME_MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(message_type.into());
        buf.put_u32(header_len);
        buf.put_slice(&header_bytes);
        buf.put_slice(payload);

        Ok(buf.freeze())
    }

    /// Encode an already-built frame.
    pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
        Self::encode(frame.message_type, &frame.header, frame.payload.as_deref())
    }

    /// Decode a complete frame from a slice.
    pub fn decode(data: &[u8]) -> Result<Frame> {
        Self::decode_bytes(Bytes::copy_from_slice(data))
    }

    /// Decode a complete frame, sharing the payload with the input buffer.
    pub fn decode_bytes(mut data: Bytes) -> Result<Frame> {
        if data.len() < FRAME_PREAMBLE_LEN {
            return Err(Error::FrameTooShort {
                len: data.len(),
                min: FRAME_PREAMBLE_LEN,
            });
        }

        let magic = data.get_u32();
        if magic != FRAME_MAGIC {
            return Err(Error::InvalidMagic { found: magic });
        }

        let version = data.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion { found: version });
        }

        let message_type = data.get_u8();
        let header_len = data.get_u32() as usize;
        if data.len() < header_len {
            return Err(Error::HeaderLengthMismatch {
                declared: header_len,
                available: data.len(),
            });
        }

        let header_bytes = data.split_to(header_len);
        let header = Self::parse_header(&header_bytes)?;
        let payload = if data.is_empty() { None } else { Some(data) };

        Ok(Frame {
            version,
            message_type,
            header,
            payload,
        })
    }

    fn serialize_header<H>(header: &H) -> Result<Vec<u8>>
    where
        H: Serialize + ?Sized,
    {
        let value = serde_json::to_value(header).map_err(|e| Error::Encoding {
            message: format!("header serialization failed: {}", e),
        })?;
        if !value.is_object() {
            return Err(Error::Encoding {
                message: format!("header must be a JSON object, got {}", json_kind(&value)),
            });
        }
        serde_json::to_vec(&value).map_err(|e| Error::Encoding {
            message: format!("header serialization failed: {}", e),
        })
    }

    fn parse_header(bytes: &[u8]) -> Result<Header> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::HeaderParse {
            message: format!("header is not UTF-8: {}", e),
        })?;
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::HeaderParse {
                message: format!("header must be a JSON object, got {}", json_kind(&other)),
            }),
            Err(e) => Err(Error::HeaderParse {
                message: e.to_string(),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
