//! termwire-core: transport layer for browser-hosted remote terminals.
//!
//! This crate provides:
//! - Binary frame codec and message type registry
//! - Typed frame headers
//! - Transport abstractions
//! - Per-key connection state machine with heartbeat and reconnection
//! - Session registry with typed subscriptions
//! - Async driver on the tokio clock
//! - Logging and session statistics

pub mod connection;
pub mod constants;
pub mod driver;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod timing;
pub mod transport;

pub use driver::{EventReceiver, EventSender, RegistryDriver, RegistryHandle, event_channel};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use metrics::SessionStats;
pub use protocol::{Frame, FrameCodec, Message, MessageType};
pub use registry::{DataEvent, MessageFilter, SessionRegistry, SubscriptionHandle};
pub use session::{
    ConnectionSession, SessionConfig, SessionState, StatusEvent, StatusSnapshot,
};
pub use transport::{ConnectionId, Target, Transport, TransportEvent, TransportFactory};
