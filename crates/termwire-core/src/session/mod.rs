//! Session lifecycle for termwire.
//!
//! This module provides:
//! - `ConnectionSession`: the per-key connection state machine
//! - `ReconnectionPolicy`: bounded retry with linear or exponential backoff
//! - `SessionConfig`: timeouts, retry budget and credentials
//! - Status events and snapshots

mod config;
mod connection;
mod reconnect;
mod state;
mod status;

pub use config::{BackoffStrategy, ReconnectConfig, SessionConfig};
pub use connection::{ConnectionSession, InboundFrame, RequestOutcome};
pub use reconnect::{ReconnectionPolicy, RetryDecision};
pub use state::SessionState;
pub use status::{StatusEvent, StatusSnapshot};
