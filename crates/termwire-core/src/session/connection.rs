//! Per-key connection state machine.
//!
//! `ConnectionSession` owns one logical connection to a target: the current
//! transport, the heartbeat, the retry budget, the send queue and the
//! outstanding requests. It performs no I/O of its own. Transports are opened
//! through a [`TransportFactory`], inbound events and timer deadlines are fed
//! in with the current `Instant`, and state changes accumulate in an outbox
//! the owner drains.
//!
//! Every physical connection attempt gets a new generation. Events and
//! timers tagged with an older generation are dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::connection::{HeartbeatMonitor, HeartbeatTick, PendingRequests, SessionTimers, TimerKind};
use crate::constants::{REQUEST_ID_FIELD, SESSION_ID_FIELD, TIMESTAMP_FIELD};
use crate::error::{Error, Result};
use crate::metrics::SessionStats;
use crate::protocol::{AuthPhase, AuthenticateHeader, Frame, FrameCodec, Header, Message, MessageType};
use crate::timing::epoch_millis;
use crate::transport::{ConnectionId, Target, Transport, TransportEvent, TransportFactory};

use super::config::SessionConfig;
use super::reconnect::{ReconnectionPolicy, RetryDecision};
use super::state::SessionState;
use super::status::{StatusEvent, StatusSnapshot};

/// A decoded inbound frame ready for dispatch.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub frame: Frame,
    /// Typed header, `None` for unregistered codes or headers that do not fit
    /// their type.
    pub message: Option<Message>,
}

/// Final result of a request issued with [`ConnectionSession::request`].
#[derive(Debug)]
pub struct RequestOutcome {
    pub request_id: String,
    pub result: Result<Frame>,
}

/// Connection state machine for one session key.
pub struct ConnectionSession {
    key: String,
    target: Target,
    config: SessionConfig,
    state: SessionState,
    /// Registry-assigned number, distinct for every session created under a key.
    instance: u64,
    generation: u64,
    transport: Option<Box<dyn Transport>>,
    policy: ReconnectionPolicy,
    heartbeat: HeartbeatMonitor,
    requests: PendingRequests,
    timers: SessionTimers,
    queue: VecDeque<Bytes>,
    stats: SessionStats,
    last_activity: Option<u64>,
    last_error: Option<Arc<Error>>,
    /// Set once any attempt opened; retries after that are reconnects.
    has_connected: bool,
    /// Session id assigned by the gateway, echoed in PING and AUTHENTICATE.
    remote_session_id: Option<String>,
    outbox: Vec<StatusEvent>,
    outcomes: Vec<RequestOutcome>,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("key", &self.key)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("queued", &self.queue.len())
            .field("pending_requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    pub fn new(key: impl Into<String>, target: Target, config: SessionConfig) -> Self {
        Self {
            key: key.into(),
            target,
            state: SessionState::Idle,
            instance: 0,
            generation: 0,
            transport: None,
            policy: ReconnectionPolicy::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
            requests: PendingRequests::new(),
            timers: SessionTimers::default(),
            queue: VecDeque::new(),
            stats: SessionStats::new(),
            last_activity: None,
            last_error: None,
            has_connected: false,
            remote_session_id: None,
            outbox: Vec::new(),
            outcomes: Vec::new(),
            config,
        }
    }

    /// Continue generation numbering after `generation`.
    ///
    /// Used when a session replaces an earlier one under the same key, so
    /// connection ids are never reused for that key.
    pub fn with_generation_floor(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_instance(mut self, instance: u64) -> Self {
        self.instance = instance;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Identity of the current (or most recent) transport.
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId {
            key: self.key.clone(),
            generation: self.generation,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn remote_session_id(&self) -> Option<&str> {
        self.remote_session_id.as_deref()
    }

    pub fn retry_scheduled(&self) -> bool {
        self.timers.retry.is_armed()
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Owned copy of the observable state.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            key: self.key.clone(),
            target: self.target.clone(),
            state: self.state,
            instance: self.instance,
            generation: self.generation,
            attempts_since_last_success: self.policy.attempts(),
            last_activity: self.last_activity,
            last_error: self.last_error.clone(),
            pending_requests: self.requests.len() + usize::from(self.heartbeat.pending().is_some()),
            queued_frames: self.queue.len(),
            retry_scheduled: self.timers.retry.is_armed(),
            stats: self.stats.clone(),
        }
    }

    /// Take the status events emitted since the last call.
    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Take the request outcomes produced since the last call.
    pub fn drain_outcomes(&mut self) -> Vec<RequestOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    // =========================================================================
    // Caller operations
    // =========================================================================

    /// Start connecting. Accepted from `Idle`, `Disconnected` and `Error`.
    ///
    /// Cancels any scheduled retry and resets the retry budget.
    pub fn connect(&mut self, factory: &mut dyn TransportFactory, now: Instant) {
        if !self.state.can_connect() {
            self.ignore("connect");
            return;
        }
        self.timers.retry.cancel();
        self.policy.reset();
        self.last_error = None;
        self.begin_attempt(factory, SessionState::Connecting, now);
    }

    /// Tear the session down.
    ///
    /// Sends a best-effort DISCONNECT if the transport is open, then closes
    /// it, cancels every timer, drops queued frames and fails outstanding
    /// requests.
    pub fn disconnect(&mut self) {
        if !self.state.can_disconnect() {
            self.ignore("disconnect");
            return;
        }
        let was_live = self.state.is_live();
        self.transition(SessionState::Disconnecting, None);

        if was_live {
            let mut header = Map::new();
            if let Some(id) = &self.remote_session_id {
                header.insert(SESSION_ID_FIELD.to_string(), Value::String(id.clone()));
            }
            let sent = FrameCodec::encode(MessageType::Disconnect, &header, None)
                .and_then(|bytes| self.send_direct(bytes));
            if let Err(e) = sent {
                debug!(key = %self.key, error = %e, "DISCONNECT not delivered");
            }
        }

        self.stop_connection();
        self.timers.cancel_all();
        self.discard_queue();
        self.fail_requests();
        self.policy.reset();
        self.transition(SessionState::Disconnected, None);
    }

    /// Disconnect if there is anything to tear down, without warning otherwise.
    pub fn close(&mut self) {
        if self.state.can_disconnect() {
            self.disconnect();
        } else {
            self.timers.cancel_all();
            self.stop_connection();
        }
    }

    /// Supply credentials after the peer asked for them.
    ///
    /// Only accepted in `NeedAuth`.
    pub fn authenticate(&mut self, credentials: Value) {
        if self.state != SessionState::NeedAuth {
            self.ignore("authenticate");
            return;
        }
        self.transition(SessionState::Authenticating, None);
        self.send_credentials(credentials);
    }

    /// Encode and send a frame.
    ///
    /// Encoding errors are returned. While a connection is being
    /// established the frame is queued; once the session is idle or torn
    /// down it fails with [`Error::ConnectionClosed`].
    pub fn send<H>(
        &mut self,
        message_type: impl Into<u8>,
        header: &H,
        payload: Option<&[u8]>,
    ) -> Result<()>
    where
        H: Serialize + ?Sized,
    {
        let bytes = FrameCodec::encode(message_type, header, payload)?;
        self.submit(bytes)
    }

    /// Send a typed message.
    pub fn send_message(&mut self, message: &Message, payload: Option<&[u8]>) -> Result<()> {
        let bytes = message.encode(payload)?;
        self.submit(bytes)
    }

    /// Send a frame that expects a response.
    ///
    /// A fresh request id is written into the header under `requestId`. The
    /// first non-progress frame carrying that id completes the request.
    pub fn request(
        &mut self,
        message_type: impl Into<u8>,
        mut header: Header,
        payload: Option<&[u8]>,
        now: Instant,
    ) -> Result<String> {
        let code = message_type.into();
        let request_id = self.requests.allocate_id();
        header.insert(
            REQUEST_ID_FIELD.to_string(),
            Value::String(request_id.clone()),
        );
        self.send(code, &header, payload)?;
        self.requests.insert(request_id.clone(), code, now);
        Ok(request_id)
    }

    // =========================================================================
    // Inbound events and timers
    // =========================================================================

    /// Feed a transport event.
    ///
    /// Events tagged with another generation are dropped. Returns the decoded
    /// frame for dispatch when the event carried one.
    pub fn handle_event(
        &mut self,
        id: &ConnectionId,
        event: TransportEvent,
        now: Instant,
    ) -> Option<InboundFrame> {
        if id.generation != self.generation || id.key != self.key {
            debug!(
                key = %self.key,
                connection = %id,
                current = self.generation,
                "Dropping event from stale connection"
            );
            return None;
        }

        match event {
            TransportEvent::Opened => {
                self.on_opened(now);
                None
            }
            TransportEvent::Frame(data) => self.on_frame(data, now),
            TransportEvent::Error(message) => {
                self.on_transport_lost(message, now);
                None
            }
            TransportEvent::Closed => {
                self.on_transport_lost("closed by peer".to_string(), now);
                None
            }
        }
    }

    /// Run every timer due at `now`.
    pub fn poll_timers(&mut self, factory: &mut dyn TransportFactory, now: Instant) {
        if self.timers.connect.take_due(now, self.generation).is_some()
            && self.state.is_attempting()
        {
            let message = format!(
                "timed out after {} ms",
                self.config.connect_timeout.as_millis()
            );
            self.fail_attempt(Error::Connect { message }, now);
        }

        if self.timers.heartbeat.take_due(now, self.generation).is_some() {
            self.on_heartbeat_tick(now);
        }

        if self.timers.retry.take_due(now, self.generation).is_some() {
            if self.state == SessionState::Error {
                let next = if self.has_connected {
                    SessionState::Reconnecting
                } else {
                    SessionState::Connecting
                };
                self.begin_attempt(factory, next, now);
            } else {
                self.ignore("retry");
            }
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn begin_attempt(
        &mut self,
        factory: &mut dyn TransportFactory,
        state: SessionState,
        now: Instant,
    ) {
        self.stop_connection();
        self.transition(state, None);

        let id = self.connection_id();
        debug!(key = %self.key, target = %self.target, connection = %id, "Opening transport");
        match factory.open(&self.target, id) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.timers.connect.schedule(
                    TimerKind::ConnectTimeout,
                    now + self.config.connect_timeout,
                    self.generation,
                );
            }
            Err(e) => {
                warn!(key = %self.key, target = %self.target, error = %e, "Transport open failed");
                self.fail_attempt(e, now);
            }
        }
    }

    fn on_opened(&mut self, now: Instant) {
        if !self.state.is_attempting() {
            self.ignore("opened");
            return;
        }
        self.timers.connect.cancel();
        self.policy.reset();
        self.last_error = None;

        if self.state == SessionState::Reconnecting {
            self.stats.record_reconnect();
            self.transition(SessionState::Reconnected, None);
        }
        self.has_connected = true;
        self.transition(SessionState::Connected, None);
        info!(key = %self.key, target = %self.target, "Session connected");

        let first_tick = self.heartbeat.start(now);
        self.timers
            .heartbeat
            .schedule(TimerKind::Heartbeat, first_tick, self.generation);
        self.flush_queue();
    }

    fn on_frame(&mut self, data: Bytes, now: Instant) -> Option<InboundFrame> {
        if !self.state.is_live() {
            self.ignore("frame");
            return None;
        }
        self.stats.record_recv(data.len());
        self.last_activity = Some(epoch_millis());

        let frame = match FrameCodec::decode_bytes(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Dropping malformed frame");
                self.stats.record_decode_error();
                return None;
            }
        };
        // A header that does not fit its typed shape is still a valid frame.
        let message = match Message::from_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(key = %self.key, error = %e, "Header not narrowed, dispatching raw");
                None
            }
        };

        match frame.kind() {
            Some(MessageType::Ping) => self.answer_ping(&frame),
            Some(MessageType::Pong) => {
                if let Some(request_id) = frame.request_id()
                    && let Some(latency) = self.heartbeat.on_pong(request_id, now)
                {
                    self.stats.update_latency(latency);
                }
            }
            Some(MessageType::Connected | MessageType::ConnectionRegistered) => {
                if let Some(id) = frame.header.get(SESSION_ID_FIELD).and_then(Value::as_str) {
                    self.remote_session_id = Some(id.to_string());
                }
            }
            _ => {}
        }
        if let Some(Message::Authenticate(auth)) = &message {
            self.on_authenticate(auth);
        }

        self.complete_request(&frame);
        Some(InboundFrame { frame, message })
    }

    fn on_authenticate(&mut self, auth: &AuthenticateHeader) {
        match &auth.phase {
            AuthPhase::Required { methods } => {
                if self.state != SessionState::Connected {
                    self.ignore("auth required");
                    return;
                }
                match self.config.credentials.clone() {
                    Some(credentials) => {
                        self.transition(SessionState::Authenticating, None);
                        self.send_credentials(credentials);
                    }
                    None => {
                        info!(key = %self.key, ?methods, "Peer requires credentials");
                        self.transition(SessionState::NeedAuth, None);
                    }
                }
            }
            AuthPhase::Success => {
                if self.state != SessionState::Authenticating {
                    self.ignore("auth success");
                    return;
                }
                info!(key = %self.key, "Authenticated");
                self.transition(SessionState::Connected, None);
                self.flush_queue();
            }
            AuthPhase::Failure { reason } => {
                if self.state != SessionState::Authenticating {
                    self.ignore("auth failure");
                    return;
                }
                let message = reason
                    .clone()
                    .unwrap_or_else(|| "credentials rejected".to_string());
                self.fail_auth(message);
            }
            AuthPhase::Credentials { .. } => self.ignore("auth credentials"),
        }
    }

    fn on_heartbeat_tick(&mut self, now: Instant) {
        if !self.state.is_live() {
            return;
        }

        for request_id in self.requests.expire(now, self.config.request_timeout) {
            debug!(key = %self.key, %request_id, "Request timed out");
            self.outcomes.push(RequestOutcome {
                result: Err(Error::RequestTimeout {
                    request_id: request_id.clone(),
                }),
                request_id,
            });
        }

        let request_id = self.requests.allocate_id();
        let tick = self.heartbeat.on_tick(
            now,
            request_id,
            epoch_millis(),
            self.remote_session_id.as_deref(),
        );
        match tick {
            HeartbeatTick::Ping(header) => {
                let sent = FrameCodec::encode(MessageType::Ping, &header, None)
                    .and_then(|bytes| self.send_direct(bytes));
                if let Err(e) = sent {
                    warn!(key = %self.key, error = %e, "Failed to send PING");
                }
                self.timers.heartbeat.schedule(
                    TimerKind::Heartbeat,
                    now + self.heartbeat.interval(),
                    self.generation,
                );
            }
            HeartbeatTick::TimedOut {
                request_id,
                outstanding,
            } => {
                warn!(
                    key = %self.key,
                    %request_id,
                    outstanding_ms = outstanding.as_millis() as u64,
                    "Heartbeat timeout"
                );
                self.fail_attempt(Error::HeartbeatTimeout, now);
            }
        }
    }

    fn on_transport_lost(&mut self, message: String, now: Instant) {
        if self.state.is_attempting() {
            self.fail_attempt(Error::Connect { message }, now);
        } else if self.state.is_live() {
            self.fail_attempt(Error::Transport { message }, now);
        } else {
            self.ignore("transport lost");
        }
    }

    /// Record a failed or lost connection and consult the retry budget.
    fn fail_attempt(&mut self, err: Error, now: Instant) {
        if self.state.is_live() {
            self.fail_requests();
        }
        self.stop_connection();
        self.transition(SessionState::Error, Some(Arc::new(err)));

        match self.policy.record_failure() {
            RetryDecision::Retry { attempt, delay } => {
                info!(
                    key = %self.key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnection scheduled"
                );
                self.timers
                    .retry
                    .schedule(TimerKind::Retry, now + delay, self.generation);
            }
            RetryDecision::Exhausted { attempts } => {
                error!(key = %self.key, target = %self.target, attempts, "Giving up on session");
                self.timers.cancel_all();
                self.discard_queue();
                self.fail_requests();
                self.transition(
                    SessionState::Disconnected,
                    Some(Arc::new(Error::ReconnectExhausted { attempts })),
                );
            }
        }
    }

    /// Credentials were rejected. Retrying would not help.
    fn fail_auth(&mut self, message: String) {
        warn!(key = %self.key, %message, "Authentication failed");
        self.fail_requests();
        self.stop_connection();
        self.timers.cancel_all();
        self.discard_queue();
        self.transition(SessionState::Error, Some(Arc::new(Error::Auth { message })));
    }

    fn transition(&mut self, to: SessionState, error: Option<Arc<Error>>) {
        let from = self.state;
        self.state = to;
        if let Some(e) = &error {
            self.last_error = Some(Arc::clone(e));
        }
        debug!(key = %self.key, %from, %to, generation = self.generation, "Session state transition");
        self.outbox.push(StatusEvent {
            key: self.key.clone(),
            target: self.target.clone(),
            state: to,
            error,
            timestamp: epoch_millis(),
        });
    }

    fn ignore(&self, event: &str) {
        warn!(
            key = %self.key,
            state = %self.state,
            event,
            "Ignoring event not valid in current state"
        );
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// Close the transport, stop the heartbeat and retire the generation.
    fn stop_connection(&mut self) {
        self.timers.heartbeat.cancel();
        self.timers.connect.cancel();
        self.heartbeat.stop();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
    }

    fn submit(&mut self, bytes: Bytes) -> Result<()> {
        match self.state {
            SessionState::Connected if self.queue.is_empty() => self.send_direct(bytes),
            SessionState::Connected => {
                self.enqueue(bytes);
                self.flush_queue();
                Ok(())
            }
            SessionState::Connecting
            | SessionState::Reconnecting
            | SessionState::Reconnected
            | SessionState::NeedAuth
            | SessionState::Authenticating => {
                self.enqueue(bytes);
                Ok(())
            }
            SessionState::Error if self.timers.retry.is_armed() => {
                self.enqueue(bytes);
                Ok(())
            }
            _ => Err(Error::ConnectionClosed),
        }
    }

    fn send_direct(&mut self, bytes: Bytes) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        let len = bytes.len();
        transport.send(bytes)?;
        self.stats.record_send(len);
        self.last_activity = Some(epoch_millis());
        Ok(())
    }

    fn enqueue(&mut self, bytes: Bytes) {
        let max = self.config.max_queued_frames;
        if max == 0 {
            warn!(key = %self.key, "Send queue disabled, dropping frame");
            self.stats.record_dropped();
            return;
        }
        while self.queue.len() >= max {
            self.queue.pop_front();
            self.stats.record_dropped();
            warn!(key = %self.key, max, "Send queue full, dropped oldest frame");
        }
        self.queue.push_back(bytes);
    }

    fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            debug!(key = %self.key, frames = self.queue.len(), "Flushing send queue");
        }
        while let Some(bytes) = self.queue.pop_front() {
            if let Err(e) = self.send_direct(bytes.clone()) {
                warn!(key = %self.key, error = %e, "Flush interrupted");
                self.queue.push_front(bytes);
                break;
            }
        }
    }

    fn discard_queue(&mut self) {
        if !self.queue.is_empty() {
            debug!(key = %self.key, frames = self.queue.len(), "Discarding send queue");
            self.queue.clear();
        }
    }

    fn fail_requests(&mut self) {
        for request_id in self.requests.drain() {
            self.outcomes.push(RequestOutcome {
                request_id,
                result: Err(Error::ConnectionClosed),
            });
        }
    }

    fn complete_request(&mut self, frame: &Frame) {
        if frame.kind() == Some(MessageType::SftpProgress) {
            return;
        }
        let Some(request_id) = frame.request_id() else {
            return;
        };
        if self.requests.complete(request_id).is_some() {
            self.outcomes.push(RequestOutcome {
                request_id: request_id.to_string(),
                result: Ok(frame.clone()),
            });
        }
    }

    /// Echo `requestId`, `timestamp` and `sessionId` verbatim.
    fn answer_ping(&mut self, ping: &Frame) {
        let Some(request_id) = ping.request_id() else {
            debug!(key = %self.key, "PING without requestId left unanswered");
            return;
        };
        let mut pong = Header::new();
        pong.insert(
            REQUEST_ID_FIELD.to_string(),
            Value::String(request_id.to_string()),
        );
        for field in [TIMESTAMP_FIELD, SESSION_ID_FIELD] {
            if let Some(value) = ping.header.get(field) {
                pong.insert(field.to_string(), value.clone());
            }
        }
        pong.insert("serverTime".to_string(), Value::from(epoch_millis()));
        let sent = FrameCodec::encode(MessageType::Pong, &pong, None)
            .and_then(|bytes| self.send_direct(bytes));
        if let Err(e) = sent {
            warn!(key = %self.key, error = %e, "Failed to answer PING");
        }
    }

    fn send_credentials(&mut self, credentials: Value) {
        let header = AuthenticateHeader {
            session_id: self.remote_session_id.clone(),
            phase: AuthPhase::Credentials { credentials },
        };
        let sent = Message::Authenticate(header)
            .encode(None)
            .and_then(|bytes| self.send_direct(bytes));
        if let Err(e) = sent {
            warn!(key = %self.key, error = %e, "Failed to send credentials");
        }
    }
}
