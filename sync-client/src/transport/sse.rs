//! Push transport over server-sent events.
//!
//! The response body is read as a byte stream (reqwest) and split into
//! events by [`SseDecoder`]. Only `data:` fields carry payload; `id:`,
//! `event:`, `retry:` and comment lines are accepted and ignored. There is
//! no client-to-server channel, so [`Connection::send`] drops its input.
//!
//! Like a browser `EventSource`, the end of the stream is reported as an
//! error rather than a close. The driver turns the first error into a close.

use async_trait::async_trait;
use futures_util::StreamExt;
use livesync_core::TransportKind;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::task::JoinHandle;
use url::Url;

use super::{
    Connection, EventSink, ReadyState, SharedReadyState, Transport, TransportError,
    TransportEvent,
};

/// Server-push transport backed by a streaming HTTP GET.
#[derive(Debug, Clone, Default)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    /// Create a transport with a default HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, headers, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Connection>, TransportError> {
        let state = SharedReadyState::new();
        let task = tokio::spawn(run(
            self.client.clone(),
            url.clone(),
            events,
            state.clone(),
        ));
        Ok(Box::new(SseConnection {
            state,
            task: Some(task),
        }))
    }
}

struct SseConnection {
    state: SharedReadyState,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Connection for SseConnection {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        tracing::trace!(len = text.len(), "push transport cannot send, dropping frame");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state.set(ReadyState::Closed);
    }
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(client: reqwest::Client, url: Url, events: EventSink, state: SharedReadyState) {
    let response = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
        .and_then(|response| response.error_for_status());
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(%url, error = %e, "event stream request failed");
            state.set(ReadyState::Closed);
            events.emit(TransportEvent::Error(TransportError::ConnectionFailed(
                e.to_string(),
            )));
            return;
        }
    };

    state.set(ReadyState::Open);
    events.emit(TransportEvent::Open);

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let error = loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                for data in decoder.feed(&chunk) {
                    if !events.emit(TransportEvent::Message(data)) {
                        return;
                    }
                }
            }
            Some(Err(e)) => break TransportError::ReceiveFailed(e.to_string()),
            None => break TransportError::ConnectionClosed,
        }
    };

    state.set(ReadyState::Closed);
    events.emit(TransportEvent::Error(error));
}

/// Incremental `text/event-stream` parser.
///
/// Feed it body chunks as they arrive; it returns the `data` payload of
/// every event completed by the chunk. Chunks may split lines and UTF-8
/// sequences anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(end) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = self.process_line(&line) {
                out.push(data);
            }
        }
        out
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let data = self.data.join("\n");
            self.data.clear();
            return Some(data);
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}
