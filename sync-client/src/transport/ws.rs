//! Stream transport over WebSocket (tokio-tungstenite).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use livesync_core::TransportKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{
    Connection, EventSink, ReadyState, SharedReadyState, Transport, TransportError,
    TransportEvent,
};

/// How long the background task waits for the close handshake before
/// dropping the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum Command {
    Send(String),
    Close,
}

/// Full-duplex transport backed by `tokio_tungstenite::connect_async()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Connection>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = SharedReadyState::new();
        let task = tokio::spawn(run(url.to_string(), events, rx, state.clone()));
        Ok(Box::new(WsConnection {
            commands: tx,
            state,
            task: Some(task),
        }))
    }
}

/// A WebSocket connection. Frames are written by a background task.
struct WsConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: SharedReadyState,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Connection for WsConnection {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.state.get() != ReadyState::Open {
            return Err(TransportError::NotConnected);
        }
        self.commands
            .send(Command::Send(text.to_string()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        // Dropping the handle detaches the task so it can finish the handshake.
        if self.task.take().is_none() {
            return;
        }
        self.state.set(ReadyState::Closing);
        if self.commands.send(Command::Close).is_err() {
            self.state.set(ReadyState::Closed);
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    url: String,
    events: EventSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: SharedReadyState,
) {
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        () = close_requested(&mut commands) => {
            state.set(ReadyState::Closed);
            return;
        }
    };
    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(%url, error = %e, "websocket connect failed");
            state.set(ReadyState::Closed);
            events.emit(TransportEvent::Error(TransportError::ConnectionFailed(
                e.to_string(),
            )));
            events.emit(TransportEvent::Close);
            return;
        }
    };

    state.set(ReadyState::Open);
    events.emit(TransportEvent::Open);
    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        events.emit(TransportEvent::Error(TransportError::SendFailed(e.to_string())));
                    }
                }
                Some(Command::Close) | None => {
                    state.set(ReadyState::Closing);
                    match tokio::time::timeout(CLOSE_GRACE, sink.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!(error = %e, "websocket close failed"),
                        Err(_) => tracing::debug!("websocket close handshake timed out"),
                    }
                    state.set(ReadyState::Closed);
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        events.emit(TransportEvent::Message(text));
                    }
                    Err(e) => {
                        events.emit(TransportEvent::Error(TransportError::ReceiveFailed(
                            e.to_string(),
                        )));
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                // control frames are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.emit(TransportEvent::Error(TransportError::ReceiveFailed(
                        e.to_string(),
                    )));
                    break;
                }
            },
        }
    }

    state.set(ReadyState::Closed);
    events.emit(TransportEvent::Close);
}

/// Resolves once the handle asks to close or goes away.
async fn close_requested(commands: &mut mpsc::UnboundedReceiver<Command>) {
    // sends are refused before open
    while let Some(Command::Send(_)) = commands.recv().await {}
}
