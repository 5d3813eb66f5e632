//! Property-based tests for the frame codec.
//!
//! These tests use proptest to verify:
//! - Round-trip for arbitrary type codes, headers and payloads
//! - Bad magic is always rejected
//! - Truncated frames fail with a codec error, never a panic
//! - Decode never panics on arbitrary input

#![cfg(test)]

use proptest::prelude::*;
use serde_json::{Map, Value};

use crate::constants::{FRAME_MAGIC, FRAME_PREAMBLE_LEN};
use crate::error::Error;
use crate::protocol::{FrameCodec, Header};

// =============================================================================
// Arbitrary Generators
// =============================================================================

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        "[a-zA-Z0-9 _/.\\-]{0,32}".prop_map(Value::String),
        any::<String>().prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_header() -> impl Strategy<Value = Header> {
    prop::collection::btree_map("[a-zA-Z_]{1,16}", arb_value(), 0..8)
        .prop_map(|m| m.into_iter().collect::<Map<String, Value>>())
}

fn arb_payload() -> impl Strategy<Value = Option<Vec<u8>>> {
    prop::option::of(prop::collection::vec(any::<u8>(), 1..2048))
}

fn is_codec_error(err: &Error) -> bool {
    err.is_codec()
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn roundtrip_arbitrary_frame(
        message_type in any::<u8>(),
        header in arb_header(),
        payload in arb_payload(),
    ) {
        let encoded = FrameCodec::encode(message_type, &header, payload.as_deref()).unwrap();
        let frame = FrameCodec::decode(&encoded).unwrap();

        prop_assert_eq!(frame.message_type, message_type);
        prop_assert_eq!(&frame.header, &header);
        prop_assert_eq!(frame.payload.as_deref(), payload.as_deref());
    }

    #[test]
    fn encoded_length_matches_parts(
        message_type in any::<u8>(),
        header in arb_header(),
        payload in arb_payload(),
    ) {
        let encoded = FrameCodec::encode(message_type, &header, payload.as_deref()).unwrap();
        let header_len =
            u32::from_be_bytes([encoded[6], encoded[7], encoded[8], encoded[9]]) as usize;
        let payload_len = payload.as_ref().map_or(0, Vec::len);

        prop_assert_eq!(encoded.len(), FRAME_PREAMBLE_LEN + header_len + payload_len);
    }

    #[test]
    fn altered_magic_is_rejected(
        message_type in any::<u8>(),
        header in arb_header(),
        payload in arb_payload(),
        magic in any::<u32>().prop_filter("must differ from magic", |m| *m != FRAME_MAGIC),
    ) {
        let mut encoded = FrameCodec::encode(message_type, &header, payload.as_deref())
            .unwrap()
            .to_vec();
        encoded[..4].copy_from_slice(&magic.to_be_bytes());

        let err = FrameCodec::decode(&encoded).unwrap_err();
        prop_assert!(matches!(err, Error::InvalidMagic { found } if found == magic), "unexpected error: {:?}", err);
    }

    #[test]
    fn short_buffers_are_rejected(data in prop::collection::vec(any::<u8>(), 0..FRAME_PREAMBLE_LEN)) {
        let err = FrameCodec::decode(&data).unwrap_err();
        prop_assert!(matches!(err, Error::FrameTooShort { .. }), "unexpected error: {:?}", err);
    }

    #[test]
    fn truncated_header_is_rejected(
        message_type in any::<u8>(),
        header in arb_header(),
        cut in any::<prop::sample::Index>(),
    ) {
        let encoded = FrameCodec::encode(message_type, &header, None).unwrap();
        let header_len = encoded.len() - FRAME_PREAMBLE_LEN;
        prop_assume!(header_len > 0);

        // Keep the full preamble, drop at least one header byte.
        let keep = FRAME_PREAMBLE_LEN + cut.index(header_len);
        let err = FrameCodec::decode(&encoded[..keep]).unwrap_err();
        prop_assert!(matches!(err, Error::HeaderLengthMismatch { .. }), "unexpected error: {:?}", err);
    }

    #[test]
    fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        if let Err(err) = FrameCodec::decode(&data) {
            prop_assert!(is_codec_error(&err));
        }
    }

    #[test]
    fn decode_never_panics_after_valid_preamble(
        message_type in any::<u8>(),
        header_len in any::<u32>(),
        tail in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut data = Vec::with_capacity(FRAME_PREAMBLE_LEN + tail.len());
        data.extend_from_slice(&FRAME_MAGIC.to_be_bytes());
        data.push(crate::constants::PROTOCOL_VERSION);
        data.push(message_type);
        data.extend_from_slice(&header_len.to_be_bytes());
        data.extend_from_slice(&tail);

        if let Err(err) = FrameCodec::decode(&data) {
            prop_assert!(is_codec_error(&err));
        }
    }
}

// Extended tests (run with --ignored)
proptest! {
    #![proptest_config(ProptestConfig::with_cases(10000))]

    #[test]
    #[ignore = "extended property test - run with --ignored"]
    fn extended_roundtrip(
        message_type in any::<u8>(),
        header in arb_header(),
        payload in arb_payload(),
    ) {
        let encoded = FrameCodec::encode(message_type, &header, payload.as_deref()).unwrap();
        let frame = FrameCodec::decode(&encoded).unwrap();
        prop_assert_eq!(frame.header, header);
    }

    #[test]
    #[ignore = "extended property test - run with --ignored"]
    fn extended_fuzz_decode(data in prop::collection::vec(any::<u8>(), 0..100000)) {
        let _ = FrameCodec::decode(&data);
    }
}
