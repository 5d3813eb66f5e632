//! Protocol and configuration constants for termwire.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Magic number at the start of every frame ("TWSF").
pub const FRAME_MAGIC: u32 = 0x5457_5346;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Length of the fixed frame preamble: magic(4) + version(1) + type(1) + header length(4).
pub const FRAME_PREAMBLE_LEN: usize = 10;

/// Header field carrying the request correlation id.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Header field carrying the client send time (epoch milliseconds).
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Header field carrying the session id.
pub const SESSION_ID_FIELD: &str = "sessionId";

// =============================================================================
// Timing Constants
// =============================================================================

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default time allowed for the transport to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of a pending request before it is discarded as lost.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default base delay for reconnection backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single reconnection delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

// =============================================================================
// Limits
// =============================================================================

/// Maximum frames held while the transport is not yet usable.
pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 1024;
