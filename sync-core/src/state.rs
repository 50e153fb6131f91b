//! Connection state machine for livesync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! one synchronized connection. The state machine takes events as input and
//! produces a list of actions to execute.
//!
//! The actual I/O (opening transports, running timers, mutating the
//! document) is performed by sync-client, not by this module. This enables
//! instant unit testing without network mocks or real clocks.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open ──close──▶ Closed
//!                        ▲                                  │
//!                        └────────── retry timer ───────────┘
//! any ──disconnect──▶ Idle
//! ```

use std::time::Duration;

use livesync_types::{DataUpdate, SessionId, SyncError, Update, Version, PING};
use serde_json::Value;

use crate::backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::sleep::{SleepDetector, DEFAULT_SLEEP_CHECK, DEFAULT_SLEEP_THRESHOLD};

/// Inbound liveness window: no ping for this long means the link is dead.
pub const DEFAULT_PING_IN: Duration = Duration::from_secs(45);

/// Outbound keepalive period.
pub const DEFAULT_PING_OUT: Duration = Duration::from_secs(25);

/// Identifies one transport instance. Events from older generations are
/// ignored, which is how a torn-down transport's handlers are detached.
pub type Generation = u64;

/// Which wire transport a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Full-duplex message stream (WebSocket).
    Stream,
    /// Server-push stream (server-sent events), no client send.
    #[default]
    Push,
}

/// Timing parameters of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Retry when no ping arrives for this long.
    pub ping_in: Duration,
    /// Send a ping this often.
    pub ping_out: Duration,
    /// Sleep-check tick period.
    pub sleep_check: Duration,
    /// Tick gap treated as a wake-up.
    pub sleep_threshold: Duration,
    /// First reconnect delay.
    pub base_delay: Duration,
    /// Reconnect delay ceiling.
    pub max_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ping_in: DEFAULT_PING_IN,
            ping_out: DEFAULT_PING_OUT,
            sleep_check: DEFAULT_SLEEP_CHECK,
            sleep_threshold: DEFAULT_SLEEP_THRESHOLD,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Coarse connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not trying to connect.
    Idle,
    /// A transport is being opened.
    Connecting,
    /// The transport is open.
    Open,
    /// The transport closed; a reconnect is pending.
    Closed,
}

/// Timers owned by the driver on the machine's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Backoff-scheduled reconnect.
    Retry,
    /// Inbound liveness deadline.
    PingIn,
    /// Outbound keepalive.
    PingOut,
    /// Sleep-detection tick. Reported back as [`Event::SleepTick`].
    SleepCheck,
}

impl Timer {
    /// Every timer, for bulk cancellation.
    pub const ALL: [Timer; 4] = [Timer::Retry, Timer::PingIn, Timer::PingOut, Timer::SleepCheck];
}

/// Events that drive the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `connect()` was called.
    ConnectRequested,
    /// `disconnect()` was called.
    DisconnectRequested,
    /// The transport reached its open state.
    TransportOpened {
        /// Transport instance.
        generation: Generation,
        /// Whether the transport still reports itself open.
        ready: bool,
    },
    /// The transport delivered a text frame.
    TransportMessage {
        /// Transport instance.
        generation: Generation,
        /// Raw frame.
        text: String,
    },
    /// The transport reported an error.
    TransportError {
        /// Transport instance.
        generation: Generation,
        /// Error description.
        error: String,
        /// Whether the transport still reports itself open.
        ready: bool,
    },
    /// The transport closed.
    TransportClosed {
        /// Transport instance.
        generation: Generation,
    },
    /// The driver applied an [`Action::ApplyUpdate`].
    UpdateApplied {
        /// Version carried by the update.
        version: Version,
    },
    /// The driver could not apply an [`Action::ApplyUpdate`].
    UpdateFailed {
        /// Why.
        error: SyncError,
    },
    /// A timer armed by [`Action::StartTimer`] expired.
    TimerFired(Timer),
    /// The sleep-check timer expired at wall-clock `now_ms`.
    SleepTick {
        /// Milliseconds since the Unix epoch.
        now_ms: u64,
    },
    /// Network reachability changed.
    Reachability {
        /// Whether the host is online.
        online: bool,
    },
}

/// Actions to be executed by the sync-client driver.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a new transport, tagging its events with `generation`.
    OpenTransport {
        /// Tag for the new transport's events.
        generation: Generation,
        /// Resume hint `v=`; zero means none.
        version: Version,
        /// Resume hint `id=`; empty means none.
        session: SessionId,
    },
    /// Close and drop the current transport.
    CloseTransport,
    /// Send a text frame (fire-and-forget).
    Send(String),
    /// Arm `timer`, replacing any pending expiry.
    StartTimer {
        /// Which timer.
        timer: Timer,
        /// Delay before it fires.
        delay: Duration,
    },
    /// Disarm `timer`.
    CancelTimer(Timer),
    /// Apply an update to the document, then report
    /// [`Event::UpdateApplied`] or [`Event::UpdateFailed`].
    ApplyUpdate(DataUpdate),
    /// Notify the application.
    EmitEvent(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The connected flag flipped. Always precedes `Connected`/`Disconnected`.
    Changed(bool),
    /// The connection became usable.
    Connected,
    /// The connection stopped being usable.
    Disconnected,
    /// A non-fatal error.
    Error(SyncError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportStatus {
    Absent,
    Opening,
    Open,
    /// Present but no longer open; its close is still to come.
    Failed,
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    kind: TransportKind,
    timings: Timings,
    retrying: bool,
    online: bool,
    connected: bool,
    transport: TransportStatus,
    generation: Generation,
    session: SessionId,
    version: Version,
    backoff: Backoff,
    sleep: SleepDetector,
}

impl SyncMachine {
    /// Create an idle machine.
    pub fn new(kind: TransportKind, timings: Timings) -> Self {
        Self {
            kind,
            timings,
            retrying: false,
            online: true,
            connected: false,
            transport: TransportStatus::Absent,
            generation: 0,
            session: SessionId::empty(),
            version: Version::zero(),
            backoff: Backoff::new(timings.base_delay, timings.max_delay),
            sleep: SleepDetector::new(timings.sleep_threshold),
        }
    }

    /// Replace the backoff policy, e.g. to add jitter.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Process an event and return the actions to execute, in order.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::ConnectRequested | Event::TimerFired(Timer::Retry) => {
                self.retrying = true;
                self.retry(&mut actions);
            }
            Event::DisconnectRequested => {
                self.retrying = false;
                actions.extend(Timer::ALL.into_iter().map(Action::CancelTimer));
                if self.transport != TransportStatus::Absent {
                    self.teardown(&mut actions);
                }
            }
            Event::TransportOpened { generation, ready } if self.is_current(generation) => {
                self.transport = if ready {
                    TransportStatus::Open
                } else {
                    TransportStatus::Failed
                };
                self.status_check(&mut actions);
                // the open itself counts as an inbound ping
                self.start(&mut actions, Timer::PingIn, self.timings.ping_in);
                self.ping_out(&mut actions);
            }
            Event::TransportMessage { generation, text } if self.is_current(generation) => {
                self.on_message(&text, &mut actions);
            }
            Event::TransportError {
                generation,
                error,
                ready,
            } if self.is_current(generation) => {
                match self.kind {
                    // no close signal of its own: simulate one
                    TransportKind::Push => self.on_closed(&mut actions),
                    TransportKind::Stream => {
                        if !ready && self.transport == TransportStatus::Open {
                            self.transport = TransportStatus::Failed;
                        }
                        self.status_check(&mut actions);
                        actions.push(Action::EmitEvent(SyncEvent::Error(SyncError::Transport(
                            error,
                        ))));
                    }
                }
            }
            Event::TransportClosed { generation } if self.is_current(generation) => {
                self.on_closed(&mut actions);
            }
            Event::UpdateApplied { version } => {
                self.version = self.version.max(version);
                self.backoff.reset();
            }
            Event::UpdateFailed { error } => {
                actions.push(Action::EmitEvent(SyncEvent::Error(error)));
            }
            Event::TimerFired(Timer::PingIn) => {
                // silently dead link; backoff is left as is
                self.retry(&mut actions);
            }
            Event::TimerFired(Timer::PingOut) => self.ping_out(&mut actions),
            Event::TimerFired(Timer::SleepCheck) => {}
            Event::SleepTick { now_ms } => {
                let woken = self.sleep.tick(now_ms);
                self.start(&mut actions, Timer::SleepCheck, self.timings.sleep_check);
                if woken {
                    self.retry(&mut actions);
                }
            }
            Event::Reachability { online } => {
                self.online = online;
                if online && self.retrying {
                    self.retry(&mut actions);
                }
            }
            // stale transport events
            Event::TransportOpened { .. }
            | Event::TransportMessage { .. }
            | Event::TransportError { .. }
            | Event::TransportClosed { .. } => {}
        }
        actions
    }

    /// Current phase.
    pub fn state(&self) -> ConnectionState {
        match self.transport {
            TransportStatus::Opening => ConnectionState::Connecting,
            TransportStatus::Open => ConnectionState::Open,
            TransportStatus::Failed => ConnectionState::Closed,
            TransportStatus::Absent if self.retrying => ConnectionState::Closed,
            TransportStatus::Absent => ConnectionState::Idle,
        }
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the machine keeps reconnecting.
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    /// Whether the host was last reported online.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Server-issued session token.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Last applied version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Delay the next scheduled reconnect would wait.
    pub fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Generation of the live transport.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Transport kind this machine drives.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.transport != TransportStatus::Absent && generation == self.generation
    }

    fn start(&self, actions: &mut Vec<Action>, timer: Timer, delay: Duration) {
        actions.push(Action::StartTimer { timer, delay });
    }

    fn retry(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::CancelTimer(Timer::Retry));
        if self.transport != TransportStatus::Absent {
            self.teardown(actions);
        }
        if !self.retrying {
            return;
        }
        self.generation += 1;
        self.transport = TransportStatus::Opening;
        actions.push(Action::OpenTransport {
            generation: self.generation,
            version: self.version,
            session: self.session.clone(),
        });
        // tick right away to record a fresh baseline
        self.sleep.reset();
        self.start(actions, Timer::SleepCheck, Duration::ZERO);
    }

    /// Drop the current transport without scheduling anything.
    fn teardown(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::CancelTimer(Timer::PingOut));
        actions.push(Action::CloseTransport);
        self.transport = TransportStatus::Absent;
        self.generation += 1;
        self.status_check(actions);
    }

    fn on_closed(&mut self, actions: &mut Vec<Action>) {
        self.teardown(actions);
        if self.retrying && self.online {
            let delay = self.backoff.next_delay();
            self.start(actions, Timer::Retry, delay);
        }
    }

    fn on_message(&mut self, text: &str, actions: &mut Vec<Action>) {
        let update = match Update::parse(text) {
            Ok(Update::Ping) => {
                self.start(actions, Timer::PingIn, self.timings.ping_in);
                return;
            }
            Ok(Update::Data(update)) => update,
            Err(err) => {
                actions.push(Action::EmitEvent(SyncEvent::Error(err)));
                return;
            }
        };
        if let Some(id) = &update.id {
            if *id != self.session {
                // versions are only meaningful within one session
                self.session = id.clone();
                self.version = Version::zero();
            }
        }
        let body = match &update.body {
            Some(body) if !is_blank(body) => body,
            _ => {
                actions.push(Action::EmitEvent(SyncEvent::Error(SyncError::NullBody)));
                return;
            }
        };
        // the root document stays an object
        if !update.delta && !body.is_object() {
            actions.push(Action::EmitEvent(SyncEvent::Error(SyncError::Parse(
                "snapshot body is not an object".to_string(),
            ))));
            return;
        }
        actions.push(Action::ApplyUpdate(update));
    }

    fn ping_out(&self, actions: &mut Vec<Action>) {
        if self.transport == TransportStatus::Open {
            actions.push(Action::Send(PING.to_string()));
        }
        self.start(actions, Timer::PingOut, self.timings.ping_out);
    }

    fn status_check(&mut self, actions: &mut Vec<Action>) {
        let next = self.transport == TransportStatus::Open;
        if next != self.connected {
            self.connected = next;
            actions.push(Action::EmitEvent(SyncEvent::Changed(next)));
            actions.push(Action::EmitEvent(if next {
                SyncEvent::Connected
            } else {
                SyncEvent::Disconnected
            }));
        }
    }
}

/// `null`, `false`, `0` and `""` carry no document.
fn is_blank(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new(TransportKind::default(), Timings::default())
    }
}
