//! Protocol module for the termwire wire format.
//!
//! This module provides:
//! - The binary frame codec (magic, version, type, JSON header, payload)
//! - The message type registry
//! - Typed header shapes for narrowing decoded frames

mod codec;
mod headers;
mod types;

#[cfg(test)]
mod proptest;

pub use codec::{Frame, FrameCodec, Header};
pub use headers::*;
pub use types::{Band, MessageType, code_of, name_of};
