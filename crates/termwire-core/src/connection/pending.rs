//! Outstanding request tracking.
//!
//! Request ids are `<prefix>-<counter>`. The prefix is random per tracker so
//! ids stay unique across sessions sharing one gateway.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A request sent and not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub message_type: u8,
    pub issued_at: Instant,
}

/// Tracks request ids awaiting a response.
#[derive(Debug)]
pub struct PendingRequests {
    prefix: String,
    next_id: u64,
    pending: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    /// Create a tracker with a random id prefix.
    pub fn new() -> Self {
        Self::with_prefix(format!("{:08x}", rand::random::<u32>()))
    }

    /// Create a tracker with a fixed id prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate a fresh request id without registering it.
    pub fn allocate_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next_id);
        self.next_id += 1;
        id
    }

    /// Register an id as awaiting a response.
    pub fn insert(&mut self, request_id: String, message_type: u8, now: Instant) {
        self.pending.insert(
            request_id,
            PendingRequest {
                message_type,
                issued_at: now,
            },
        );
    }

    /// Remove a request once its response arrived.
    pub fn complete(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.pending.remove(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Remove and return every request older than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, req)| now.saturating_duration_since(req.issued_at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    /// Remove and return every pending id.
    pub fn drain(&mut self) -> Vec<String> {
        self.pending.drain().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
