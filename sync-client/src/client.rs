//! SyncHandle - the main interface for livesync.
//!
//! This module provides [`SyncHandle`], the primary API for applications
//! to keep a local JSON document synchronized with a server.
//!
//! # Architecture
//!
//! The handle spawns one driver task. The driver owns a pure state machine
//! (from sync-core) and interprets its actions to perform the actual I/O:
//! opening and closing transports, arming timers, and applying updates to
//! the document.
//!
//! ```text
//! Application ⇄ SyncHandle ─commands─▶ driver ─open/send/close─▶ Transport
//!                    ▲                   │  ▲                        │
//!                 watch<Value>           ▼  └───── TransportEvent ───┘
//!                    └───────── sync-core (pure state machine)
//! ```
//!
//! Transport events, timer expirations and handle commands are processed one
//! at a time by the driver, so updates are applied strictly in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use livesync_client::{MockTransport, SyncConfig, SyncHandle};
//!
//! let handle = SyncHandle::builder(SyncConfig::new("ws://localhost:3000/sync"))
//!     .on_update(|doc| println!("{doc}"))
//!     .on_error(|err| eprintln!("{err}"))
//!     .spawn(MockTransport::stream())?;
//!
//! let mut updates = handle.subscribe();
//! updates.changed().await?;
//! handle.disconnect().await?;
//! ```

use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use livesync_core::{
    merge_with, patch, Action, Annotations, ConnectionState, Event, Generation, MergeOptions,
    SyncEvent, SyncMachine, Timer,
};
use livesync_types::{DataUpdate, SessionId, SyncError, Version};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;

use crate::config::SyncConfig;
use crate::registry::{next_handle_id, ConnectionRegistry, HandleId};
use crate::transport::{
    resolve_url, Connection, EventSink, ReadyState, Transport, TransportError, TransportEvent,
};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The configuration cannot work.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The driver task is gone.
    #[error("sync handle closed")]
    Closed,
}

/// Wall-clock source for sleep detection.
///
/// Must not be monotonic: the point is to notice time that passed while the
/// process was suspended.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Connection status as last published by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Coarse phase.
    pub state: ConnectionState,
    /// Whether the transport is open.
    pub connected: bool,
    /// Server-issued session token (empty until known).
    pub session: SessionId,
    /// Last applied version.
    pub version: Version,
}

impl Status {
    fn of(machine: &SyncMachine) -> Self {
        Self {
            state: machine.state(),
            connected: machine.is_connected(),
            session: machine.session().clone(),
            version: machine.version(),
        }
    }
}

/// Requests from a handle (or the registry) to its driver.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Reachability(bool),
}

struct Callbacks {
    on_update: Box<dyn Fn(&Value) + Send + Sync>,
    on_change: Box<dyn Fn(bool) + Send + Sync>,
    on_connect: Box<dyn Fn() + Send + Sync>,
    on_disconnect: Box<dyn Fn() + Send + Sync>,
    on_error: Box<dyn Fn(&SyncError) + Send + Sync>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_update: Box::new(|_: &Value| {}),
            on_change: Box::new(|_| {}),
            on_connect: Box::new(|| {}),
            on_disconnect: Box::new(|| {}),
            on_error: Box::new(|_: &SyncError| {}),
        }
    }
}

/// Builder for [`SyncHandle`]. Every callback defaults to a no-op.
pub struct SyncHandleBuilder {
    config: SyncConfig,
    callbacks: Callbacks,
    registry: Option<ConnectionRegistry>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncHandleBuilder {
    /// Called with the document after every applied update.
    pub fn on_update(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.callbacks.on_update = Box::new(f);
        self
    }

    /// Called when the connected flag flips, before `on_connect`/`on_disconnect`.
    pub fn on_change(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.callbacks.on_change = Box::new(f);
        self
    }

    /// Called when the connection becomes usable.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_connect = Box::new(f);
        self
    }

    /// Called when the connection stops being usable.
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_disconnect = Box::new(f);
        self
    }

    /// Called for every non-fatal error.
    pub fn on_error(mut self, f: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Box::new(f);
        self
    }

    /// Join `registry` to receive reachability changes.
    pub fn registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `clock` for sleep detection instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Start the driver on the current tokio runtime and connect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a timing is zero or the endpoint
    /// cannot be resolved for the transport's kind.
    pub fn spawn<T: Transport + 'static>(self, transport: T) -> Result<SyncHandle, ClientError> {
        self.config.validate().map_err(ClientError::Config)?;
        let kind = transport.kind();
        resolve_url(
            &self.config.url,
            self.config.base_url.as_deref(),
            kind,
            Version::zero(),
            &SessionId::empty(),
        )
        .map_err(|e| ClientError::Config(e.to_string()))?;

        let machine =
            SyncMachine::new(kind, self.config.timings()).with_backoff(self.config.backoff());
        let (document_tx, document_rx) = watch::channel(Value::Object(Map::new()));
        let (status_tx, status_rx) = watch::channel(Status::of(&machine));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let annotations = Arc::new(Mutex::new(Annotations::new()));

        let driver = Driver {
            machine,
            transport: Box::new(transport),
            connection: None,
            url: self.config.url.clone(),
            base_url: self.config.base_url.clone(),
            merge_options: self.config.merge_options(),
            document: document_tx,
            status: status_tx,
            annotations: Arc::clone(&annotations),
            callbacks: self.callbacks,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            events: events_tx,
            timers: TimerSlots::default(),
        };
        tokio::spawn(driver.run(commands_rx, events_rx));

        let handle = SyncHandle {
            id: next_handle_id(),
            commands: commands_tx,
            document: document_rx,
            status: status_rx,
            annotations,
            registry: self.registry.unwrap_or_default(),
        };
        handle.connect()?;
        Ok(handle)
    }
}

/// A live, self-healing view of a server document.
///
/// Dropping the handle stops its driver and closes the transport.
pub struct SyncHandle {
    id: HandleId,
    commands: mpsc::UnboundedSender<Command>,
    document: watch::Receiver<Value>,
    status: watch::Receiver<Status>,
    annotations: Arc<Mutex<Annotations>>,
    registry: ConnectionRegistry,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("id", &self.id)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl SyncHandle {
    /// Start building a handle.
    pub fn builder(config: SyncConfig) -> SyncHandleBuilder {
        SyncHandleBuilder {
            config,
            callbacks: Callbacks::default(),
            registry: None,
            clock: None,
        }
    }

    /// This handle's id in its registry.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// (Re)connect. Safe to call at any time; an open connection is replaced.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.registry.register(self.id, self.commands.clone());
        self.commands
            .send(Command::Connect)
            .map_err(|_| ClientError::Closed)
    }

    /// Stop retrying, cancel every timer and close the transport.
    ///
    /// Returns once the driver has done so; no callback fires afterwards
    /// until the next [`connect`](Self::connect).
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.registry.unregister(self.id);
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect(tx))
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// A copy of the current document.
    pub fn document(&self) -> Value {
        self.document.borrow().clone()
    }

    /// Watch the document. Every receiver observes the same document slot.
    pub fn subscribe(&self) -> watch::Receiver<Value> {
        self.document.clone()
    }

    /// Watch the connection status.
    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    /// Coarse connection phase.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Server-issued session token, empty until the first update carrying one.
    pub fn session_id(&self) -> SessionId {
        self.status.borrow().session.clone()
    }

    /// Last applied version.
    pub fn version(&self) -> Version {
        self.status.borrow().version
    }

    /// Attach a client-local value to the node at `pointer`.
    ///
    /// The annotation is dropped once the node disappears from the document.
    pub fn annotate(&self, pointer: &str, key: &str, value: Value) -> Option<Value> {
        lock(&self.annotations).set(pointer, key, value)
    }

    /// Read an annotation.
    pub fn annotation(&self, pointer: &str, key: &str) -> Option<Value> {
        lock(&self.annotations).get(pointer, key).cloned()
    }

    /// Remove an annotation.
    pub fn remove_annotation(&self, pointer: &str, key: &str) -> Option<Value> {
        lock(&self.annotations).remove(pointer, key)
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        // the registry holds a sender; the driver stops once all are gone
        self.registry.unregister(self.id);
    }
}

fn lock(annotations: &Mutex<Annotations>) -> MutexGuard<'_, Annotations> {
    annotations.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One `Sleep` slot per [`Timer`]. Arming replaces, cancelling clears.
#[derive(Default)]
struct TimerSlots {
    slots: [Option<Pin<Box<Sleep>>>; 4],
}

impl TimerSlots {
    fn index(timer: Timer) -> usize {
        match timer {
            Timer::Retry => 0,
            Timer::PingIn => 1,
            Timer::PingOut => 2,
            Timer::SleepCheck => 3,
        }
    }

    fn start(&mut self, timer: Timer, delay: Duration) {
        self.slots[Self::index(timer)] = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn cancel(&mut self, timer: Timer) {
        self.slots[Self::index(timer)] = None;
    }

    /// Resolves with the first armed timer that expired, disarming it.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Timer> {
        for timer in Timer::ALL {
            let slot = &mut self.slots[Self::index(timer)];
            if let Some(sleep) = slot {
                if sleep.as_mut().poll(cx).is_ready() {
                    *slot = None;
                    return Poll::Ready(timer);
                }
            }
        }
        Poll::Pending
    }
}

struct Driver {
    machine: SyncMachine,
    transport: Box<dyn Transport>,
    connection: Option<Box<dyn Connection>>,
    url: String,
    base_url: Option<String>,
    merge_options: MergeOptions,
    document: watch::Sender<Value>,
    status: watch::Sender<Status>,
    annotations: Arc<Mutex<Annotations>>,
    callbacks: Callbacks,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<(Generation, TransportEvent)>,
    timers: TimerSlots,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(Generation, TransportEvent)>,
    ) {
        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => Event::ConnectRequested,
                    Some(Command::Disconnect(ack)) => {
                        self.dispatch(Event::DisconnectRequested).await;
                        let _ = ack.send(());
                        continue;
                    }
                    Some(Command::Reachability(online)) => Event::Reachability { online },
                    None => break,
                },
                Some((generation, event)) = events.recv() => {
                    let ready = self.connection_ready();
                    match event {
                        TransportEvent::Open => Event::TransportOpened { generation, ready },
                        TransportEvent::Message(text) => Event::TransportMessage { generation, text },
                        TransportEvent::Error(error) => Event::TransportError {
                            generation,
                            error: error.to_string(),
                            ready,
                        },
                        TransportEvent::Close => Event::TransportClosed { generation },
                    }
                },
                timer = poll_fn(|cx| self.timers.poll_expired(cx)) => match timer {
                    Timer::SleepCheck => Event::SleepTick { now_ms: self.clock.now_ms() },
                    timer => Event::TimerFired(timer),
                },
            };
            self.dispatch(event).await;
        }

        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        tracing::debug!("sync driver stopped");
    }

    /// Feed `event` to the machine and execute the resulting actions,
    /// including any follow-up events they produce.
    async fn dispatch(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for action in self.machine.on_event(event) {
                match action {
                    Action::OpenTransport {
                        generation,
                        version,
                        session,
                    } => {
                        if let Err(error) = self.open(generation, version, &session) {
                            tracing::warn!(%error, "could not open transport");
                            pending.push_back(Event::TransportError {
                                generation,
                                error: error.to_string(),
                                ready: false,
                            });
                            pending.push_back(Event::TransportClosed { generation });
                        }
                    }
                    Action::CloseTransport => {
                        if let Some(mut connection) = self.connection.take() {
                            connection.close().await;
                        }
                    }
                    Action::Send(text) => {
                        if let Some(connection) = &self.connection {
                            if let Err(error) = connection.send(&text) {
                                tracing::debug!(%error, "send failed");
                            }
                        }
                    }
                    Action::StartTimer { timer, delay } => self.timers.start(timer, delay),
                    Action::CancelTimer(timer) => self.timers.cancel(timer),
                    Action::ApplyUpdate(update) => pending.push_back(self.apply(update)),
                    Action::EmitEvent(event) => self.emit(event),
                }
            }
        }
        self.publish_status();
    }

    fn connection_ready(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.ready_state() == ReadyState::Open)
    }

    fn open(
        &mut self,
        generation: Generation,
        version: Version,
        session: &SessionId,
    ) -> Result<(), TransportError> {
        let url = resolve_url(
            &self.url,
            self.base_url.as_deref(),
            self.transport.kind(),
            version,
            session,
        )?;
        tracing::debug!(%url, generation, "opening transport");
        let sink = EventSink::new(generation, self.events.clone());
        self.connection = Some(self.transport.open(&url, sink)?);
        Ok(())
    }

    /// Apply one update to the document and report the outcome.
    fn apply(&mut self, update: DataUpdate) -> Event {
        let DataUpdate {
            version,
            delta,
            body,
            ..
        } = update;
        let Some(body) = body else {
            return Event::UpdateFailed {
                error: SyncError::NullBody,
            };
        };

        let options = self.merge_options;
        let annotations = &self.annotations;
        let mut outcome: Result<(), SyncError> = Ok(());
        self.document.send_if_modified(|doc| {
            outcome = if delta {
                let mut notes = lock(annotations);
                patch::apply_body_with(doc, &body, |edit| notes.rebase(&edit))
                    .map_err(SyncError::from)
            } else {
                merge_with(doc, &body, &options);
                Ok(())
            };
            outcome.is_ok()
        });
        if let Err(error) = outcome {
            tracing::debug!(%error, %version, "update rejected");
            return Event::UpdateFailed { error };
        }

        let doc = self.document.borrow();
        let pruned = lock(&self.annotations).prune(&doc);
        if pruned > 0 {
            tracing::trace!(pruned, "dropped annotations of removed nodes");
        }
        (self.callbacks.on_update)(&doc);
        Event::UpdateApplied { version }
    }

    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::Changed(connected) => (self.callbacks.on_change)(connected),
            SyncEvent::Connected => {
                tracing::info!("connected");
                (self.callbacks.on_connect)();
            }
            SyncEvent::Disconnected => {
                tracing::info!("disconnected");
                (self.callbacks.on_disconnect)();
            }
            SyncEvent::Error(error) => {
                tracing::warn!(%error, "sync error");
                (self.callbacks.on_error)(&error);
            }
        }
    }

    fn publish_status(&self) {
        let next = Status::of(&self.machine);
        self.status.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }
}
