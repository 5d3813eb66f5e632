//! Error types for termwire-core.

use thiserror::Error;

/// Main error type for termwire operations.
#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // Codec errors (fatal to a single frame only)
    // =========================================================================
    /// Header could not be serialized to a JSON object.
    #[error("encoding error: {message}")]
    Encoding { message: String },

    /// Buffer shorter than the fixed frame preamble.
    #[error("frame too short: {len} bytes (need at least {min})")]
    FrameTooShort { len: usize, min: usize },

    /// First four bytes are not the frame magic.
    #[error("invalid frame magic: {found:#010x}")]
    InvalidMagic { found: u32 },

    /// Frame was produced by an unsupported protocol version.
    #[error("unsupported protocol version: {found}")]
    UnsupportedVersion { found: u8 },

    /// Declared header length runs past the end of the buffer.
    #[error("header length mismatch: declared {declared} bytes, {available} available")]
    HeaderLengthMismatch { declared: usize, available: usize },

    /// Header bytes are not a UTF-8 JSON object.
    #[error("header parse error: {message}")]
    HeaderParse { message: String },

    /// Header parsed but does not match the shape its message type requires.
    #[error("invalid {message_type} header: {message}")]
    InvalidHeader {
        message_type: String,
        message: String,
    },

    // =========================================================================
    // Session errors (drive state transitions)
    // =========================================================================
    /// Transport could not be opened or failed before it opened.
    #[error("connect error: {message}")]
    Connect { message: String },

    /// Peer rejected the supplied credentials.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// No PONG arrived before the next heartbeat was due.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Reconnection budget spent.
    #[error("reconnection attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Transport failed after it opened.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Session is not in a state that can carry frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// No session registered under the given key.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Pending request expired before its response arrived.
    #[error("request {request_id} timed out")]
    RequestTimeout { request_id: String },

    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error concerns one frame only.
    ///
    /// The frame is dropped and the session keeps running.
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            Error::Encoding { .. }
                | Error::FrameTooShort { .. }
                | Error::InvalidMagic { .. }
                | Error::UnsupportedVersion { .. }
                | Error::HeaderLengthMismatch { .. }
                | Error::HeaderParse { .. }
                | Error::InvalidHeader { .. }
        )
    }

    /// Returns true if this error is transient and reconnection may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. }
                | Error::Transport { .. }
                | Error::HeartbeatTimeout
                | Error::Io(_)
        )
    }

    /// Returns true if this error is fatal and reconnection won't help.
    ///
    /// Credentials do not fix themselves, and an exhausted budget is terminal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth { .. } | Error::ReconnectExhausted { .. })
    }
}

/// Convenience result type for termwire operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_magic() {
        let err = Error::InvalidMagic { found: 0xDEAD_BEEF };
        assert_eq!(err.to_string(), "invalid frame magic: 0xdeadbeef");
    }

    #[test]
    fn error_display_header_length_mismatch() {
        let err = Error::HeaderLengthMismatch {
            declared: 40,
            available: 12,
        };
        assert_eq!(
            err.to_string(),
            "header length mismatch: declared 40 bytes, 12 available"
        );
    }

    #[test]
    fn error_display_reconnect_exhausted() {
        let err = Error::ReconnectExhausted { attempts: 5 };
        assert_eq!(
            err.to_string(),
            "reconnection attempts exhausted after 5 attempts"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn codec_errors() {
        assert!(Error::FrameTooShort { len: 3, min: 10 }.is_codec());
        assert!(Error::InvalidMagic { found: 0 }.is_codec());
        assert!(Error::UnsupportedVersion { found: 9 }.is_codec());
        assert!(Error::HeaderParse {
            message: "eof".into()
        }
        .is_codec());

        assert!(!Error::HeartbeatTimeout.is_codec());
        assert!(!Error::ConnectionClosed.is_codec());
    }

    #[test]
    fn transient_errors() {
        assert!(Error::Connect {
            message: "refused".into()
        }
        .is_transient());
        assert!(Error::HeartbeatTimeout.is_transient());
        assert!(Error::Transport {
            message: "reset".into()
        }
        .is_transient());

        assert!(!Error::Auth {
            message: "bad password".into()
        }
        .is_transient());
        assert!(!Error::ReconnectExhausted { attempts: 3 }.is_transient());
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::Auth {
            message: "denied".into()
        }
        .is_fatal());
        assert!(Error::ReconnectExhausted { attempts: 1 }.is_fatal());

        assert!(!Error::HeartbeatTimeout.is_fatal());
        assert!(!Error::Connect {
            message: "timeout".into()
        }
        .is_fatal());
    }
}
