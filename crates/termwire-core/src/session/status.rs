//! Status notifications and snapshots.

use std::sync::Arc;

use crate::error::Error;
use crate::metrics::SessionStats;
use crate::transport::Target;

use super::state::SessionState;

/// Emitted on every state transition.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub key: String,
    pub target: Target,
    pub state: SessionState,
    /// Cause of the transition, for `Error` and failure-driven `Disconnected`.
    pub error: Option<Arc<Error>>,
    /// Wall-clock time of the transition in epoch milliseconds.
    pub timestamp: u64,
}

/// Owned, point-in-time copy of a session's observable state.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub key: String,
    pub target: Target,
    pub state: SessionState,
    /// Which session under this key the snapshot was taken from. Changes
    /// whenever `connect` replaces the session.
    pub instance: u64,
    /// Current connection generation.
    pub generation: u64,
    /// Consecutive failed attempts since the last successful open.
    pub attempts_since_last_success: u32,
    /// Epoch milliseconds of the last frame sent or received.
    pub last_activity: Option<u64>,
    pub last_error: Option<Arc<Error>>,
    pub pending_requests: usize,
    pub queued_frames: usize,
    /// A reconnection attempt is scheduled.
    pub retry_scheduled: bool,
    pub stats: SessionStats,
}

impl StatusSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The session will not make progress without a caller action.
    ///
    /// True for `Disconnected`, `NeedAuth`, and `Error` with no retry pending.
    pub fn is_parked(&self) -> bool {
        match self.state {
            SessionState::Disconnected | SessionState::NeedAuth => true,
            SessionState::Error => !self.retry_scheduled,
            _ => false,
        }
    }
}
