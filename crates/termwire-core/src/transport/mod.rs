//! Transport abstractions for termwire.
//!
//! A transport carries whole frames to and from the gateway (typically a
//! browser WebSocket). It is split in two halves:
//! - [`TransportFactory`] / [`Transport`]: outbound, called by the session
//! - [`TransportEvent`]: inbound, delivered back to the registry tagged with
//!   the [`ConnectionId`] the transport was opened with
//!
//! Both halves are non-blocking. `open` starts the connection and returns
//! immediately; completion arrives later as [`TransportEvent::Opened`].

use std::fmt;

use bytes::Bytes;

use crate::error::Result;

// =============================================================================
// Target
// =============================================================================

/// Remote endpoint a session connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Host name or address.
    pub host: String,
    /// Port on the host.
    pub port: u16,
    /// Login user, if the gateway needs one up front.
    pub username: Option<String>,
}

impl Target {
    /// Create a target without a username.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
        }
    }

    /// Set the login user.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{}@{}:{}", user, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

// =============================================================================
// Connection identity
// =============================================================================

/// Identifies one physical connection attempt.
///
/// `generation` changes on every attempt and every teardown, so events from
/// a transport that has since been replaced can be recognized and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    /// Logical session key.
    pub key: String,
    /// Session generation at open time.
    pub generation: u64,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key, self.generation)
    }
}

// =============================================================================
// Transport traits
// =============================================================================

/// An open (or opening) transport.
pub trait Transport: Send {
    /// Queue one encoded frame for delivery.
    ///
    /// Frames must reach the peer in the order they were sent.
    fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Close the transport. Must not emit further events for this connection.
    fn close(&mut self);
}

/// Creates transports for sessions.
pub trait TransportFactory: Send {
    /// Start opening a transport to `target`.
    ///
    /// An `Err` means the attempt failed immediately and is handled like a
    /// transport error. Otherwise the outcome is reported later through
    /// [`TransportEvent`]s tagged with `id`.
    fn open(&mut self, target: &Target, id: ConnectionId) -> Result<Box<dyn Transport>>;
}

/// Inbound socket event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport finished opening.
    Opened,
    /// One complete frame arrived.
    Frame(Bytes),
    /// Transport failed.
    Error(String),
    /// Peer closed the transport.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_display() {
        assert_eq!(Target::new("gw.example", 22).to_string(), "gw.example:22");
        assert_eq!(
            Target::new("gw.example", 2222)
                .with_username("deploy")
                .to_string(),
            "deploy@gw.example:2222"
        );
    }

    #[test]
    fn connection_id_display() {
        let id = ConnectionId {
            key: "prod".into(),
            generation: 3,
        };
        assert_eq!(id.to_string(), "prod#3");
    }

    #[test]
    fn trait_bounds_are_correct() {
        fn assert_send<T: Send>() {}

        assert_send::<Box<dyn Transport>>();
        assert_send::<Box<dyn TransportFactory>>();
        assert_send::<TransportEvent>();
    }
}
