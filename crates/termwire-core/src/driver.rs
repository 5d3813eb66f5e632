//! Async driver for [`SessionRegistry`].
//!
//! The registry itself never awaits. [`RegistryDriver::run`] owns it inside
//! one task and multiplexes three sources with `select!`:
//! - commands from any number of [`RegistryHandle`] clones
//! - transport events from the transport layer
//! - the earliest session deadline
//!
//! Time is read from `tokio::time`, so tests can run with a paused clock.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{Frame, Header};
use crate::registry::{
    DataCallback, DataEvent, MessageFilter, SessionRegistry, StatusCallback, SubscriptionHandle,
};
use crate::session::{SessionConfig, SessionState, StatusEvent, StatusSnapshot};
use crate::transport::{ConnectionId, Target, TransportEvent};

/// Sending half for inbound transport events.
pub type EventSender = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;
/// Receiving half for inbound transport events.
pub type EventReceiver = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;

/// Create the channel transports use to report events to the driver.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

enum Command {
    Connect {
        key: String,
        target: Target,
        config: Option<SessionConfig>,
        reply: oneshot::Sender<Result<StatusSnapshot>>,
    },
    Disconnect {
        key: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        key: String,
        reply: oneshot::Sender<Option<StatusSnapshot>>,
    },
    Authenticate {
        key: String,
        credentials: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        key: String,
        message_type: u8,
        header: Header,
        payload: Option<Bytes>,
        reply: oneshot::Sender<Result<()>>,
    },
    Request {
        key: String,
        message_type: u8,
        header: Header,
        payload: Option<Bytes>,
        reply: oneshot::Sender<Result<Frame>>,
    },
    Status {
        key: String,
        reply: oneshot::Sender<Option<StatusSnapshot>>,
    },
    Keys {
        reply: oneshot::Sender<Vec<String>>,
    },
    Subscribe {
        key: String,
        filter: MessageFilter,
        callback: DataCallback,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    SubscribeStatus {
        callback: StatusCallback,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Whether a connect call can be answered yet.
fn connect_verdict(snapshot: &StatusSnapshot) -> Option<Result<StatusSnapshot>> {
    match snapshot.state {
        SessionState::Connected => Some(Ok(snapshot.clone())),
        SessionState::Error if snapshot.retry_scheduled => None,
        SessionState::Error
        | SessionState::Idle
        | SessionState::Disconnecting
        | SessionState::Disconnected => Some(Err(failure_of(snapshot))),
        _ => None,
    }
}

fn failure_of(snapshot: &StatusSnapshot) -> Error {
    match snapshot.last_error.as_deref() {
        Some(Error::Auth { message }) => Error::Auth {
            message: message.clone(),
        },
        Some(Error::ReconnectExhausted { attempts }) => Error::ReconnectExhausted {
            attempts: *attempts,
        },
        _ => Error::ConnectionClosed,
    }
}

/// Owns a registry and runs it on the tokio clock.
pub struct RegistryDriver {
    registry: SessionRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventReceiver,
    /// Pending connect calls: key, session instance, reply.
    connect_waiters: Vec<(String, u64, oneshot::Sender<Result<StatusSnapshot>>)>,
    request_waiters: HashMap<(String, String), oneshot::Sender<Result<Frame>>>,
}

impl RegistryDriver {
    /// Wrap `registry`. `events` must be the receiver paired with the sender
    /// the registry's transports report to.
    pub fn new(registry: SessionRegistry, events: EventReceiver) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Self {
            registry,
            commands: rx,
            events,
            connect_waiters: Vec::new(),
            request_waiters: HashMap::new(),
        };
        (driver, RegistryHandle { commands: tx })
    }

    /// Spawn the driver on the current runtime.
    pub fn spawn(registry: SessionRegistry, events: EventReceiver) -> (RegistryHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(registry, events);
        (handle, tokio::spawn(driver.run()))
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!("Registry driver started");
        loop {
            let deadline = self.registry.next_deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some((id, event)) = self.events.recv() => {
                    self.registry.handle_transport_event(&id, event, now());
                }
                _ = sleep_until_deadline(deadline) => {
                    self.registry.poll_timers(now());
                }
            }
            self.resolve_waiters();
        }
        info!("Registry driver stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect {
                key,
                target,
                config,
                reply,
            } => {
                let snapshot = match config {
                    Some(config) => self.registry.connect_with(&key, target, config, now()),
                    None => self.registry.connect(&key, target, now()),
                };
                match connect_verdict(&snapshot) {
                    Some(result) => {
                        let _ = reply.send(result);
                    }
                    None => self.connect_waiters.push((key, snapshot.instance, reply)),
                }
            }
            Command::Disconnect { key, reply } => {
                let _ = reply.send(self.registry.disconnect(&key));
            }
            Command::Remove { key, reply } => {
                let _ = reply.send(self.registry.remove(&key));
            }
            Command::Authenticate {
                key,
                credentials,
                reply,
            } => {
                let _ = reply.send(self.registry.authenticate(&key, credentials));
            }
            Command::Send {
                key,
                message_type,
                header,
                payload,
                reply,
            } => {
                let result = self
                    .registry
                    .send(&key, message_type, &header, payload.as_deref());
                let _ = reply.send(result);
            }
            Command::Request {
                key,
                message_type,
                header,
                payload,
                reply,
            } => {
                match self
                    .registry
                    .request(&key, message_type, header, payload.as_deref(), now())
                {
                    Ok(request_id) => {
                        debug!(%key, %request_id, "Awaiting response");
                        self.request_waiters.insert((key, request_id), reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Status { key, reply } => {
                let _ = reply.send(self.registry.status(&key));
            }
            Command::Keys { reply } => {
                let _ = reply.send(self.registry.keys());
            }
            Command::Subscribe {
                key,
                filter,
                callback,
                reply,
            } => {
                let _ = reply.send(self.registry.subscribe(&key, filter, callback));
            }
            Command::SubscribeStatus { callback, reply } => {
                let _ = reply.send(self.registry.subscribe_status(callback));
            }
            Command::Unsubscribe { handle, reply } => {
                let _ = reply.send(self.registry.unsubscribe(handle));
            }
            Command::Shutdown { reply } => {
                // Intercepted by `run`.
                let _ = reply.send(());
            }
        }
    }

    fn resolve_waiters(&mut self) {
        for (key, instance, reply) in std::mem::take(&mut self.connect_waiters) {
            if reply.is_closed() {
                continue;
            }
            let verdict = match self.registry.status(&key) {
                Some(snapshot) if snapshot.instance == instance => connect_verdict(&snapshot),
                _ => {
                    debug!(%key, instance, "Session retired before it connected");
                    Some(Err(Error::ConnectionClosed))
                }
            };
            match verdict {
                Some(result) => {
                    let _ = reply.send(result);
                }
                None => self.connect_waiters.push((key, instance, reply)),
            }
        }

        for (key, outcome) in self.registry.drain_outcomes() {
            if let Some(reply) = self.request_waiters.remove(&(key, outcome.request_id)) {
                let _ = reply.send(outcome.result);
            }
        }
    }

    fn shutdown(&mut self) {
        debug!(sessions = self.registry.len(), "Shutting down registry");
        self.registry.shutdown();
        self.resolve_waiters();
        for (_, _, reply) in self.connect_waiters.drain(..) {
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
        for (_, reply) in self.request_waiters.drain() {
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
    }
}

/// Cloneable async front end to a running [`RegistryDriver`].
///
/// Every method fails with [`Error::ConnectionClosed`] once the driver has
/// stopped.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Connect { .. } => "Connect",
            Command::Disconnect { .. } => "Disconnect",
            Command::Remove { .. } => "Remove",
            Command::Authenticate { .. } => "Authenticate",
            Command::Send { .. } => "Send",
            Command::Request { .. } => "Request",
            Command::Status { .. } => "Status",
            Command::Keys { .. } => "Keys",
            Command::Subscribe { .. } => "Subscribe",
            Command::SubscribeStatus { .. } => "SubscribeStatus",
            Command::Unsubscribe { .. } => "Unsubscribe",
            Command::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl RegistryHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Connect and wait until the session is usable.
    ///
    /// Resolves once the session reaches `Connected`. Fails on
    /// authentication failure, when the retry budget runs out, or with
    /// [`Error::ConnectionClosed`] if the session is removed or replaced by
    /// another `connect` first.
    pub async fn connect(&self, key: impl Into<String>, target: Target) -> Result<StatusSnapshot> {
        let key = key.into();
        self.call(|reply| Command::Connect {
            key,
            target,
            config: None,
            reply,
        })
        .await?
    }

    /// Like [`connect`](Self::connect) with an explicit config.
    pub async fn connect_with(
        &self,
        key: impl Into<String>,
        target: Target,
        config: SessionConfig,
    ) -> Result<StatusSnapshot> {
        let key = key.into();
        self.call(|reply| Command::Connect {
            key,
            target,
            config: Some(config),
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        self.call(|reply| Command::Disconnect { key, reply }).await?
    }

    pub async fn remove(&self, key: impl Into<String>) -> Result<Option<StatusSnapshot>> {
        let key = key.into();
        self.call(|reply| Command::Remove { key, reply }).await
    }

    pub async fn authenticate(&self, key: impl Into<String>, credentials: Value) -> Result<()> {
        let key = key.into();
        self.call(|reply| Command::Authenticate {
            key,
            credentials,
            reply,
        })
        .await?
    }

    pub async fn send(
        &self,
        key: impl Into<String>,
        message_type: impl Into<u8>,
        header: Header,
        payload: Option<Bytes>,
    ) -> Result<()> {
        let key = key.into();
        let message_type = message_type.into();
        self.call(|reply| Command::Send {
            key,
            message_type,
            header,
            payload,
            reply,
        })
        .await?
    }

    /// Send a request and wait for the frame that answers it.
    pub async fn request(
        &self,
        key: impl Into<String>,
        message_type: impl Into<u8>,
        header: Header,
        payload: Option<Bytes>,
    ) -> Result<Frame> {
        let key = key.into();
        let message_type = message_type.into();
        self.call(|reply| Command::Request {
            key,
            message_type,
            header,
            payload,
            reply,
        })
        .await?
    }

    pub async fn status(&self, key: impl Into<String>) -> Result<Option<StatusSnapshot>> {
        let key = key.into();
        self.call(|reply| Command::Status { key, reply }).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.call(|reply| Command::Keys { reply }).await
    }

    pub async fn subscribe<F>(
        &self,
        key: impl Into<String>,
        filter: impl Into<MessageFilter>,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(&DataEvent) + Send + 'static,
    {
        let key = key.into();
        let filter = filter.into();
        self.call(|reply| Command::Subscribe {
            key,
            filter,
            callback: Box::new(callback),
            reply,
        })
        .await
    }

    pub async fn subscribe_status<F>(&self, callback: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(&StatusEvent) + Send + 'static,
    {
        self.call(|reply| Command::SubscribeStatus {
            callback: Box::new(callback),
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<bool> {
        self.call(|reply| Command::Unsubscribe { handle, reply })
            .await
    }

    /// Disconnect every session and stop the driver.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}
