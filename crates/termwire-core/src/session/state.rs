//! Session lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created, never connected.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Transport open and usable.
    Connected,
    /// Peer asked for credentials and none are configured.
    NeedAuth,
    /// Credentials sent, awaiting the verdict.
    Authenticating,
    /// Reconnection attempt in progress after a prior success.
    Reconnecting,
    /// Reconnection succeeded. Always followed by `Connected`.
    Reconnected,
    /// Explicit teardown in progress.
    Disconnecting,
    /// Torn down, explicitly or after the retry budget ran out.
    Disconnected,
    /// Attempt failed. A retry may be scheduled.
    Error,
}

impl SessionState {
    /// Transport is open.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::NeedAuth | SessionState::Authenticating
        )
    }

    /// A connect attempt is in flight.
    pub fn is_attempting(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Reconnecting)
    }

    /// Connected or on the way there without outside help.
    pub fn is_active(&self) -> bool {
        self.is_live() || self.is_attempting() || *self == SessionState::Reconnected
    }

    /// `connect()` is accepted from this state.
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Disconnected | SessionState::Error
        )
    }

    /// `disconnect()` is accepted from this state.
    pub fn can_disconnect(&self) -> bool {
        self.is_live() || self.is_attempting() || *self == SessionState::Error
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::NeedAuth => "NEED_AUTH",
            SessionState::Authenticating => "AUTHENTICATING",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Reconnected => "RECONNECTED",
            SessionState::Disconnecting => "DISCONNECTING",
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 10] = [
        SessionState::Idle,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::NeedAuth,
        SessionState::Authenticating,
        SessionState::Reconnecting,
        SessionState::Reconnected,
        SessionState::Disconnecting,
        SessionState::Disconnected,
        SessionState::Error,
    ];

    #[test]
    fn live_states_are_active() {
        for state in ALL {
            if state.is_live() {
                assert!(state.is_active(), "{state}");
            }
        }
    }

    #[test]
    fn connect_and_disconnect_are_disjoint_except_error() {
        for state in ALL {
            if state.can_connect() && state.can_disconnect() {
                assert_eq!(state, SessionState::Error);
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Disconnected.is_active());
        assert!(!SessionState::Disconnected.can_disconnect());
        assert!(!SessionState::Idle.can_disconnect());
        assert!(!SessionState::Disconnecting.can_connect());
    }

    #[test]
    fn serde_uses_canonical_names() {
        for state in ALL {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
            let back: SessionState = serde_json::from_value(json).unwrap();
            assert_eq!(back, state);
        }
    }
}
