//! # sync-client
//!
//! Client library for livesync.
//!
//! This is the library that applications use to keep a local JSON document
//! in sync with a server.
//!
//! ## Features
//!
//! - **Transport Abstraction**: WebSocket (stream), server-sent events (push), mock
//! - **Resumable Sessions**: reconnects carry the last version and session id
//! - **Liveness**: inbound ping deadline, outbound keepalive, host-sleep detection
//! - **Backoff**: doubling reconnect delay, reset on every applied update
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use livesync_client::{SyncConfig, SyncHandle, WsTransport};
//!
//! let config = SyncConfig::new("wss://example.com/sync");
//! let handle = SyncHandle::builder(config)
//!     .on_update(|doc| println!("{doc}"))
//!     .spawn(WsTransport::new())?;
//!
//! // Later
//! handle.disconnect().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod registry;
pub mod transport;

pub use client::{
    ClientError, Clock, Status, SyncHandle, SyncHandleBuilder, SystemClock,
};
pub use config::SyncConfig;
pub use registry::{ConnectionRegistry, HandleId};
pub use transport::{
    resolve_url, Connection, EventSink, MockTransport, ReadyState, SseDecoder, SseTransport,
    Transport, TransportError, TransportEvent, WsTransport,
};

pub use livesync_core::{ConnectionState, TransportKind};
