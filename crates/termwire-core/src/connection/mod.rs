//! Per-connection building blocks for termwire sessions.
//!
//! This module provides:
//! - `HeartbeatMonitor`: PING/PONG liveness and latency sampling
//! - `PendingRequests`: outstanding request ids awaiting a response
//! - `TimerSlot`: cancellable, generation-tagged deadlines

mod heartbeat;
mod pending;
mod timer;

pub use heartbeat::{HeartbeatMonitor, HeartbeatTick, PendingPing};
pub use pending::{PendingRequest, PendingRequests};
pub use timer::{ScheduledTask, SessionTimers, TimerKind, TimerSlot};
