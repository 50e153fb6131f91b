//! # sync-core
//!
//! Pure logic for livesync (no I/O, instant tests).
//!
//! This crate implements the document algorithms and the connection state
//! machine without any network or clock access, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transports, timers, the shared document) is performed by
//! `sync-client`, which interprets the actions produced by [`SyncMachine`].
//!
//! ## Modules
//!
//! - [`merge`]: structure-preserving recursive merge of full snapshots
//! - [`patch`]: JSON Patch (RFC 6902) application and validation
//! - [`annotations`]: client-local side table keyed by node pointer
//! - [`backoff`] / [`sleep`]: reconnect delay and host-sleep detection
//! - [`state`]: the connection state machine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod annotations;
pub mod backoff;
pub mod merge;
pub mod patch;
pub mod sleep;
pub mod state;

pub use annotations::Annotations;
pub use backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
pub use merge::{merge, merge_with, MergeOptions, DEFAULT_PRIVATE_PREFIX};
pub use patch::{
    apply, apply_body, apply_body_with, apply_validated, apply_validated_with, deep_equal,
    validate, Edit, Slot,
};
pub use sleep::{SleepDetector, DEFAULT_SLEEP_CHECK, DEFAULT_SLEEP_THRESHOLD};
pub use state::{
    Action, ConnectionState, Event, Generation, SyncEvent, SyncMachine, Timer, Timings,
    TransportKind, DEFAULT_PING_IN, DEFAULT_PING_OUT,
};
