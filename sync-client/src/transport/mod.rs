//! Transport abstraction for livesync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, server-sent events, mock
//! for testing).
//!
//! # Design
//!
//! Transports are event-driven rather than request/response:
//! - [`Transport::open`] starts a connection in the background and returns
//!   immediately with a [`Connection`] handle
//! - progress is reported through the [`EventSink`] as [`TransportEvent`]s,
//!   each tagged with the generation the driver assigned to that connection
//! - [`Connection::send`] is fire-and-forget
//! - [`Connection::close`] terminates the connection
//!
//! # Example
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let transport = MockTransport::stream();
//! let url = resolve_url("/sync", Some("http://localhost:3000"), transport.kind(),
//!     Version::zero(), &SessionId::empty())?;
//! let conn = transport.open(&url, EventSink::new(1, tx))?;
//! ```

mod mock;
mod sse;
mod ws;

pub use mock::MockTransport;
pub use sse::{SseDecoder, SseTransport};
pub use ws::WsTransport;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use livesync_core::{Generation, TransportKind};
use livesync_types::{SessionId, Version};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The endpoint could not be turned into a usable URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is usable.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The connection reported an error.
    Error(TransportError),
    /// The connection is gone.
    Close,
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Opening.
    Connecting,
    /// Usable.
    Open,
    /// Shutting down.
    Closing,
    /// Gone.
    Closed,
}

/// Where a connection reports its events.
///
/// Every event is tagged with the generation the sink was created for, so
/// the driver can ignore events from connections it already dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<(Generation, TransportEvent)>,
}

impl EventSink {
    /// Create a sink that tags events with `generation`.
    pub fn new(
        generation: Generation,
        tx: mpsc::UnboundedSender<(Generation, TransportEvent)>,
    ) -> Self {
        Self { generation, tx }
    }

    /// The generation this sink tags events with.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Report an event. Returns false once the receiver is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    /// Whether the receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport trait for opening sync connections.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, server-sent events, mock, etc).
pub trait Transport: Send + Sync {
    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// Start connecting to `url`.
    ///
    /// Must not block: the handshake runs in the background and its outcome
    /// is reported through `events`. An `Err` means the attempt could not
    /// even be started.
    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Connection>, TransportError>;
}

/// One live connection opened by a [`Transport`].
#[async_trait]
pub trait Connection: Send {
    /// Current lifecycle state.
    fn ready_state(&self) -> ReadyState;

    /// Queue a text frame. Push transports accept and drop it.
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection. No further events are reported afterwards.
    async fn close(&mut self);
}

/// [`ReadyState`] shared between a connection handle and its background task.
#[derive(Debug, Clone)]
pub(crate) struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    pub(crate) fn get(&self) -> ReadyState {
        match self.0.load(Ordering::Acquire) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    /// Move to `state`. A connection never goes back to an earlier state.
    pub(crate) fn set(&self, state: ReadyState) {
        let raw = match state {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        };
        self.0.fetch_max(raw, Ordering::AcqRel);
    }
}

/// Build the URL a connection attempt should use.
///
/// Relative endpoints are joined onto `base`. The scheme is normalized for
/// the transport kind (`http(s)` ↔ `ws(s)`), and the resume hints `v` and
/// `id` are appended when known.
pub fn resolve_url(
    endpoint: &str,
    base: Option<&str>,
    kind: TransportKind,
    version: Version,
    session: &SessionId,
) -> Result<Url, TransportError> {
    let mut url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| {
                TransportError::InvalidUrl(format!("relative url {endpoint:?} needs a base url"))
            })?;
            Url::parse(base)
                .and_then(|base| base.join(endpoint))
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?
        }
        Err(e) => return Err(TransportError::InvalidUrl(e.to_string())),
    };

    let scheme = match (kind, url.scheme()) {
        (TransportKind::Stream, "http") => Some("ws"),
        (TransportKind::Stream, "https") => Some("wss"),
        (TransportKind::Push, "ws") => Some("http"),
        (TransportKind::Push, "wss") => Some("https"),
        (TransportKind::Stream, "ws" | "wss") | (TransportKind::Push, "http" | "https") => None,
        (_, other) => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other:?}"
            )))
        }
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|()| TransportError::InvalidUrl(format!("cannot switch to {scheme}")))?;
    }

    if !version.is_zero() || !session.is_empty() {
        let mut query = url.query_pairs_mut();
        if !version.is_zero() {
            query.append_pair("v", &version.value().to_string());
        }
        if !session.is_empty() {
            query.append_pair("id", session.as_str());
        }
    }
    Ok(url)
}
