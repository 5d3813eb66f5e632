//! Frame builders for the gateway side of a test conversation.

use bytes::Bytes;
use serde_json::{Value, json};

use termwire_core::constants::{REQUEST_ID_FIELD, TIMESTAMP_FIELD};
use termwire_core::protocol::{Frame, FrameCodec, MessageType};

/// Encode a frame from a JSON header literal.
///
/// # Panics
///
/// If `header` is not a JSON object.
pub fn encode(message_type: impl Into<u8>, header: Value, payload: Option<&[u8]>) -> Bytes {
    FrameCodec::encode(message_type, &header, payload).expect("test header must be an object")
}

pub fn auth_required() -> Bytes {
    encode(
        MessageType::Authenticate,
        json!({"phase": "required", "methods": ["password"]}),
        None,
    )
}

pub fn auth_success() -> Bytes {
    encode(MessageType::Authenticate, json!({"phase": "success"}), None)
}

pub fn auth_failure(reason: &str) -> Bytes {
    encode(
        MessageType::Authenticate,
        json!({"phase": "failure", "reason": reason}),
        None,
    )
}

/// PONG answering a PING frame sent by the client.
///
/// # Panics
///
/// If `ping` has no request id.
pub fn pong_for(ping: &Frame) -> Bytes {
    let request_id = ping.request_id().expect("ping without requestId");
    let mut header = json!({"requestId": request_id, "serverTime": 1});
    if let Some(timestamp) = ping.header.get(TIMESTAMP_FIELD) {
        header[TIMESTAMP_FIELD] = timestamp.clone();
    }
    encode(MessageType::Pong, header, None)
}

/// A response of `message_type` carrying the request id of `request`.
///
/// # Panics
///
/// If `request` has no request id.
pub fn response_to(request: &Frame, message_type: impl Into<u8>, extra: Value) -> Bytes {
    let request_id = request.request_id().expect("request without requestId");
    let mut header = match extra {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    header.insert(REQUEST_ID_FIELD.to_string(), json!(request_id));
    encode(message_type, Value::Object(header), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_decode() {
        let frame = FrameCodec::decode_bytes(auth_required()).unwrap();
        assert_eq!(frame.kind(), Some(MessageType::Authenticate));
        assert_eq!(frame.header["phase"], "required");

        let ping = FrameCodec::decode_bytes(encode(
            MessageType::Ping,
            json!({"requestId": "r1", "timestamp": 5}),
            None,
        ))
        .unwrap();
        let pong = FrameCodec::decode_bytes(pong_for(&ping)).unwrap();
        assert_eq!(pong.request_id(), Some("r1"));
        assert_eq!(pong.header["timestamp"], 5);
    }

    #[test]
    fn response_carries_request_id() {
        let request = FrameCodec::decode_bytes(encode(
            MessageType::SftpList,
            json!({"requestId": "abc-1", "path": "/"}),
            None,
        ))
        .unwrap();
        let response =
            FrameCodec::decode_bytes(response_to(&request, MessageType::SftpSuccess, json!({"ok": true})))
                .unwrap();
        assert_eq!(response.request_id(), Some("abc-1"));
        assert_eq!(response.header["ok"], true);
    }
}
