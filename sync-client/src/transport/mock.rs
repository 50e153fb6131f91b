//! Mock transport for testing.
//!
//! Records every opened URL and sent frame, and lets tests play the server
//! side by injecting events into the most recently opened connection.

use super::{
    Connection, EventSink, ReadyState, SharedReadyState, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use livesync_core::TransportKind;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one clone while the handle under
/// test owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    kind: TransportKind,
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    opened_urls: Vec<String>,
    sent_messages: Vec<String>,
    connections: Vec<(EventSink, SharedReadyState)>,
    close_count: usize,
    fail_next_open: Option<String>,
}

impl MockTransport {
    /// Create a mock transport of the given kind.
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            inner: Arc::default(),
        }
    }

    /// A full-duplex mock.
    pub fn stream() -> Self {
        Self::new(TransportKind::Stream)
    }

    /// A server-push mock. Sends are accepted and dropped.
    pub fn push() -> Self {
        Self::new(TransportKind::Push)
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every URL passed to `open`, oldest first.
    pub fn opened_urls(&self) -> Vec<String> {
        self.lock().opened_urls.clone()
    }

    /// The URL of the latest `open`.
    pub fn last_url(&self) -> Option<String> {
        self.lock().opened_urls.last().cloned()
    }

    /// How many connections were opened.
    pub fn open_count(&self) -> usize {
        self.lock().opened_urls.len()
    }

    /// How many connections were closed by their owner.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Get all frames that were sent.
    pub fn sent_messages(&self) -> Vec<String> {
        self.lock().sent_messages.clone()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        self.lock().sent_messages.last().cloned()
    }

    /// Cause the next `open` to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        self.lock().fail_next_open = Some(error.to_string());
    }

    /// Mark the latest connection open and report it.
    pub fn emit_open(&self) -> bool {
        self.emit(Some(ReadyState::Open), TransportEvent::Open)
    }

    /// Deliver a text frame on the latest connection.
    pub fn emit_message(&self, text: &str) -> bool {
        self.emit(None, TransportEvent::Message(text.to_string()))
    }

    /// Report an error on the latest connection.
    pub fn emit_error(&self, error: TransportError) -> bool {
        let state = match self.kind {
            TransportKind::Push => Some(ReadyState::Closed),
            TransportKind::Stream => None,
        };
        self.emit(state, TransportEvent::Error(error))
    }

    /// Report an error that also took the latest connection down, as a
    /// failed socket read does. The close event is left to the caller.
    pub fn emit_fatal_error(&self, error: TransportError) -> bool {
        self.emit(Some(ReadyState::Closed), TransportEvent::Error(error))
    }

    /// Mark the latest connection closed and report it.
    pub fn emit_close(&self) -> bool {
        self.emit(Some(ReadyState::Closed), TransportEvent::Close)
    }

    /// Deliver an event on the connection opened by the `index`-th `open`.
    pub fn emit_to(&self, index: usize, event: TransportEvent) -> bool {
        let inner = self.lock();
        inner
            .connections
            .get(index)
            .is_some_and(|(sink, _)| sink.emit(event))
    }

    fn emit(&self, state: Option<ReadyState>, event: TransportEvent) -> bool {
        let inner = self.lock();
        let Some((sink, shared)) = inner.connections.last() else {
            return false;
        };
        if let Some(state) = state {
            shared.set(state);
        }
        sink.emit(event)
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::stream()
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Connection>, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_open.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        let state = SharedReadyState::new();
        inner.opened_urls.push(url.to_string());
        inner.connections.push((events, state.clone()));
        Ok(Box::new(MockConnection {
            kind: self.kind,
            inner: Arc::clone(&self.inner),
            state,
        }))
    }
}

struct MockConnection {
    kind: TransportKind,
    inner: Arc<Mutex<MockTransportInner>>,
    state: SharedReadyState,
}

#[async_trait]
impl Connection for MockConnection {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.kind == TransportKind::Push {
            return Ok(());
        }
        if self.state.get() != ReadyState::Open {
            return Err(TransportError::NotConnected);
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.sent_messages.push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) {
        self.state.set(ReadyState::Closed);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.close_count += 1;
    }
}
