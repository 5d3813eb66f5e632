//! Keyed collection of sessions with typed subscriptions.
//!
//! The registry is a plain value owned by its caller. All mutation goes
//! through `&mut self`; callbacks run synchronously inside the call that
//! produced the event and cannot re-enter the registry.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{Header, Message, MessageType, name_of};
use crate::session::{
    ConnectionSession, InboundFrame, RequestOutcome, SessionConfig, StatusEvent, StatusSnapshot,
};
use crate::transport::{ConnectionId, Target, TransportEvent, TransportFactory};

/// Which inbound frames a data subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFilter {
    /// One type code.
    Type(u8),
    /// Every frame on the key.
    All,
}

impl MessageFilter {
    pub fn matches(&self, message_type: u8) -> bool {
        match self {
            MessageFilter::Type(code) => *code == message_type,
            MessageFilter::All => true,
        }
    }
}

impl From<MessageType> for MessageFilter {
    fn from(kind: MessageType) -> Self {
        MessageFilter::Type(kind.code())
    }
}

impl From<u8> for MessageFilter {
    fn from(code: u8) -> Self {
        MessageFilter::Type(code)
    }
}

/// Token returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// An inbound frame delivered to data subscribers.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub key: String,
    pub target: Target,
    pub message_type: u8,
    pub header: Header,
    pub payload: Option<Bytes>,
    /// Narrowed header, `None` for unregistered codes or headers that do not
    /// fit their type.
    pub message: Option<Message>,
}

impl DataEvent {
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.message_type)
    }

    pub fn type_name(&self) -> std::borrow::Cow<'static, str> {
        name_of(self.message_type)
    }
}

pub type DataCallback = Box<dyn FnMut(&DataEvent) + Send>;
pub type StatusCallback = Box<dyn FnMut(&StatusEvent) + Send>;

struct DataListener {
    handle: SubscriptionHandle,
    filter: MessageFilter,
    callback: DataCallback,
}

struct StatusListener {
    handle: SubscriptionHandle,
    callback: StatusCallback,
}

/// Owns every session, keyed by caller-chosen names.
pub struct SessionRegistry {
    factory: Box<dyn TransportFactory>,
    defaults: SessionConfig,
    sessions: HashMap<String, ConnectionSession>,
    data_listeners: HashMap<String, Vec<DataListener>>,
    status_listeners: Vec<StatusListener>,
    next_handle: u64,
    outcomes: Vec<(String, RequestOutcome)>,
    /// Last generation used by a retired session, per key.
    retired_generations: HashMap<String, u64>,
    next_instance: u64,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions)
            .field("status_listeners", &self.status_listeners.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry whose sessions use `defaults` unless told otherwise.
    pub fn new(factory: Box<dyn TransportFactory>, defaults: SessionConfig) -> Self {
        Self {
            factory,
            defaults,
            sessions: HashMap::new(),
            data_listeners: HashMap::new(),
            status_listeners: Vec::new(),
            next_handle: 1,
            outcomes: Vec::new(),
            retired_generations: HashMap::new(),
            next_instance: 1,
        }
    }

    pub fn defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect `key` to `target` with the default config.
    ///
    /// If a session for `key` is already active against the same target it
    /// is returned untouched. Otherwise any previous session for `key` is
    /// torn down and a new one starts connecting.
    pub fn connect(&mut self, key: &str, target: Target, now: Instant) -> StatusSnapshot {
        let config = self.defaults.clone();
        self.connect_with(key, target, config, now)
    }

    /// Like [`connect`](Self::connect) with an explicit config.
    pub fn connect_with(
        &mut self,
        key: &str,
        target: Target,
        config: SessionConfig,
        now: Instant,
    ) -> StatusSnapshot {
        if let Some(existing) = self.sessions.get(key)
            && existing.target() == &target
            && existing.state().is_active()
        {
            debug!(key, state = %existing.state(), "Reusing active session");
            return existing.snapshot();
        }

        if let Some(old) = self.sessions.remove(key) {
            debug!(key, target = %old.target(), "Replacing session");
            self.retire(old);
        }

        let floor = self.retired_generations.get(key).copied().unwrap_or(0);
        let instance = self.next_instance;
        self.next_instance += 1;
        let mut session = ConnectionSession::new(key, target, config)
            .with_generation_floor(floor)
            .with_instance(instance);
        session.connect(self.factory.as_mut(), now);
        let snapshot = session.snapshot();
        self.sessions.insert(key.to_string(), session);
        self.flush(key);
        snapshot
    }

    /// Disconnect the session for `key`. It stays registered.
    pub fn disconnect(&mut self, key: &str) -> Result<()> {
        self.session_mut(key)?.disconnect();
        self.flush(key);
        Ok(())
    }

    /// Disconnect and forget the session for `key`, dropping its data
    /// subscriptions.
    pub fn remove(&mut self, key: &str) -> Option<StatusSnapshot> {
        let session = self.sessions.remove(key)?;
        self.data_listeners.remove(key);
        Some(self.retire(session))
    }

    /// Disconnect and forget every session.
    pub fn shutdown(&mut self) {
        let keys: Vec<String> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// Supply credentials to a session waiting in `NeedAuth`.
    pub fn authenticate(&mut self, key: &str, credentials: Value) -> Result<()> {
        self.session_mut(key)?.authenticate(credentials);
        self.flush(key);
        Ok(())
    }

    // =========================================================================
    // Data
    // =========================================================================

    pub fn send<H>(
        &mut self,
        key: &str,
        message_type: impl Into<u8>,
        header: &H,
        payload: Option<&[u8]>,
    ) -> Result<()>
    where
        H: Serialize + ?Sized,
    {
        self.session_mut(key)?.send(message_type, header, payload)
    }

    pub fn send_message(
        &mut self,
        key: &str,
        message: &Message,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        self.session_mut(key)?.send_message(message, payload)
    }

    /// Send a frame expecting a response. Returns the assigned request id.
    ///
    /// The outcome is collected by [`drain_outcomes`](Self::drain_outcomes).
    pub fn request(
        &mut self,
        key: &str,
        message_type: impl Into<u8>,
        header: Header,
        payload: Option<&[u8]>,
        now: Instant,
    ) -> Result<String> {
        self.session_mut(key)?
            .request(message_type, header, payload, now)
    }

    /// Feed an inbound transport event.
    pub fn handle_transport_event(&mut self, id: &ConnectionId, event: TransportEvent, now: Instant) {
        let Some(session) = self.sessions.get_mut(&id.key) else {
            debug!(connection = %id, "Event for unknown session");
            return;
        };
        let inbound = session.handle_event(id, event, now);
        self.flush(&id.key);
        if let Some(inbound) = inbound {
            self.dispatch(&id.key, inbound);
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Earliest deadline across all sessions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(ConnectionSession::next_deadline)
            .min()
    }

    /// Run every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        let due: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.next_deadline().is_some_and(|d| d <= now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in due {
            if let Some(session) = self.sessions.get_mut(&key) {
                session.poll_timers(self.factory.as_mut(), now);
            }
            self.flush(&key);
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Receive inbound frames on `key` that match `filter`.
    ///
    /// Subscriptions are tied to the key, not the session instance, so they
    /// survive reconnects and replacement by `connect`.
    pub fn subscribe<F>(
        &mut self,
        key: &str,
        filter: impl Into<MessageFilter>,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: FnMut(&DataEvent) + Send + 'static,
    {
        let handle = self.allocate_handle();
        self.data_listeners
            .entry(key.to_string())
            .or_default()
            .push(DataListener {
                handle,
                filter: filter.into(),
                callback: Box::new(callback),
            });
        handle
    }

    /// Receive every status event from every session.
    pub fn subscribe_status<F>(&mut self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&StatusEvent) + Send + 'static,
    {
        let handle = self.allocate_handle();
        self.status_listeners.push(StatusListener {
            handle,
            callback: Box::new(callback),
        });
        handle
    }

    /// Drop a data or status subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.status_listeners.len();
        self.status_listeners.retain(|l| l.handle != handle);
        if self.status_listeners.len() != before {
            return true;
        }

        for listeners in self.data_listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.handle != handle);
            if listeners.len() != before {
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn status(&self, key: &str) -> Option<StatusSnapshot> {
        self.sessions.get(key).map(ConnectionSession::snapshot)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Take request outcomes collected since the last call, tagged by key.
    pub fn drain_outcomes(&mut self) -> Vec<(String, RequestOutcome)> {
        std::mem::take(&mut self.outcomes)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn session_mut(&mut self, key: &str) -> Result<&mut ConnectionSession> {
        self.sessions
            .get_mut(key)
            .ok_or_else(|| Error::SessionNotFound(key.to_string()))
    }

    fn allocate_handle(&mut self) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Close a session that has left the map and publish what it emitted.
    fn retire(&mut self, mut session: ConnectionSession) -> StatusSnapshot {
        session.close();
        let key = session.key().to_string();
        self.retired_generations.insert(key.clone(), session.generation());
        let events = session.drain_status();
        self.outcomes
            .extend(session.drain_outcomes().into_iter().map(|o| (key.clone(), o)));
        self.publish_status(&events);
        session.snapshot()
    }

    fn flush(&mut self, key: &str) {
        let Some(session) = self.sessions.get_mut(key) else {
            return;
        };
        let events = session.drain_status();
        let outcomes = session.drain_outcomes();
        self.outcomes
            .extend(outcomes.into_iter().map(|o| (key.to_string(), o)));
        self.publish_status(&events);
    }

    fn publish_status(&mut self, events: &[StatusEvent]) {
        for event in events {
            trace!(key = %event.key, state = %event.state, "Publishing status");
            for listener in &mut self.status_listeners {
                (listener.callback)(event);
            }
        }
    }

    fn dispatch(&mut self, key: &str, inbound: InboundFrame) {
        let Some(listeners) = self.data_listeners.get_mut(key) else {
            trace!(key, message_type = inbound.frame.message_type, "No subscribers");
            return;
        };
        let Some(target) = self.sessions.get(key).map(|s| s.target().clone()) else {
            return;
        };

        let InboundFrame { frame, message } = inbound;
        let event = DataEvent {
            key: key.to_string(),
            target,
            message_type: frame.message_type,
            header: frame.header,
            payload: frame.payload,
            message,
        };
        for listener in listeners.iter_mut() {
            if listener.filter.matches(event.message_type) {
                (listener.callback)(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches() {
        assert!(MessageFilter::All.matches(0x10));
        assert!(MessageFilter::from(MessageType::SshData).matches(0x10));
        assert!(!MessageFilter::from(MessageType::SshData).matches(0x11));
        assert!(MessageFilter::from(0xF0u8).matches(0xF0));
    }

    #[test]
    fn registry_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SessionRegistry>();
        assert_send::<DataEvent>();
    }
}
