//! Mock transport for testing without a real socket.
//!
//! `MockTransportFactory` records every `open` call and every frame sent on
//! each connection. Clones share state, so a test keeps one clone for
//! inspection and hands another to the registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::trace;

use termwire_core::driver::EventSender;
use termwire_core::error::{Error, Result};
use termwire_core::protocol::{Frame, FrameCodec};
use termwire_core::transport::{ConnectionId, Target, Transport, TransportEvent, TransportFactory};

#[derive(Debug, Default)]
struct MockState {
    opens: Vec<(Target, ConnectionId)>,
    fail_next: u32,
    fail_all: bool,
    fail_send: bool,
    auto_open: bool,
    events: Option<EventSender>,
    sent: HashMap<ConnectionId, Vec<Bytes>>,
    closed: HashSet<ConnectionId>,
}

/// Scriptable in-memory transport factory.
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the driver's event channel so [`emit`](Self::emit) and
    /// auto-open can deliver events.
    pub fn with_events(self, events: EventSender) -> Self {
        self.state().events = Some(events);
        self
    }

    /// Report `Opened` for every successful `open`.
    pub fn auto_open(self) -> Self {
        self.state().auto_open = true;
        self
    }

    /// Make the next `n` opens fail immediately.
    pub fn fail_next_opens(&self, n: u32) {
        self.state().fail_next = n;
    }

    /// Make every open fail until turned off.
    pub fn fail_all_opens(&self, fail: bool) {
        self.state().fail_all = fail;
    }

    /// Make `Transport::send` fail on every connection.
    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_send = fail;
    }

    pub fn open_count(&self) -> usize {
        self.state().opens.len()
    }

    /// Connection ids in open order.
    pub fn opened(&self) -> Vec<ConnectionId> {
        self.state().opens.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn opened_targets(&self) -> Vec<Target> {
        self.state().opens.iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn last_id(&self) -> Option<ConnectionId> {
        self.state().opens.last().map(|(_, id)| id.clone())
    }

    /// Raw frames sent on one connection.
    pub fn sent(&self, id: &ConnectionId) -> Vec<Bytes> {
        self.state().sent.get(id).cloned().unwrap_or_default()
    }

    /// Decoded frames sent on one connection.
    ///
    /// # Panics
    ///
    /// If a recorded frame does not decode.
    pub fn sent_frames(&self, id: &ConnectionId) -> Vec<Frame> {
        self.sent(id)
            .into_iter()
            .map(|b| FrameCodec::decode_bytes(b).expect("mock recorded an undecodable frame"))
            .collect()
    }

    /// Decoded frames across every connection, in open order.
    pub fn all_sent_frames(&self) -> Vec<(ConnectionId, Frame)> {
        self.opened()
            .into_iter()
            .flat_map(|id| {
                self.sent_frames(&id)
                    .into_iter()
                    .map(move |f| (id.clone(), f))
            })
            .collect()
    }

    pub fn is_closed(&self, id: &ConnectionId) -> bool {
        self.state().closed.contains(id)
    }

    /// Deliver an event through the attached channel.
    ///
    /// Returns false if no channel is attached or the driver is gone.
    pub fn emit(&self, id: &ConnectionId, event: TransportEvent) -> bool {
        let events = self.state().events.clone();
        match events {
            Some(tx) => tx.send((id.clone(), event)).is_ok(),
            None => false,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(&mut self, target: &Target, id: ConnectionId) -> Result<Box<dyn Transport>> {
        let mut state = self.state();
        state.opens.push((target.clone(), id.clone()));
        trace!(connection = %id, %target, "Mock open");

        if state.fail_all || state.fail_next > 0 {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(Error::Connect {
                message: format!("mock refused {target}"),
            });
        }

        state.sent.entry(id.clone()).or_default();
        if state.auto_open
            && let Some(tx) = &state.events
        {
            let _ = tx.send((id.clone(), TransportEvent::Opened));
        }

        Ok(Box::new(MockTransport {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockTransport {
    id: ConnectionId,
    inner: Arc<Mutex<MockState>>,
}

impl Transport for MockTransport {
    fn send(&mut self, frame: Bytes) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed.contains(&self.id) {
            return Err(Error::ConnectionClosed);
        }
        if state.fail_send {
            return Err(Error::Transport {
                message: "mock send failure".to_string(),
            });
        }
        state.sent.entry(self.id.clone()).or_default().push(frame);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.closed.insert(self.id.clone());
    }
}
