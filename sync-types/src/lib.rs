//! # sync-types
//!
//! Wire format types for the livesync state-synchronization protocol.
//!
//! This crate provides the foundational types used across all livesync crates:
//! - [`SessionId`], [`Version`] - Session identity and ordering
//! - [`Update`] - Messages received from the server (ping or document update)
//! - [`PatchOperation`] - RFC 6902 operations carried by delta updates
//! - [`SyncError`], [`PatchError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::{PatchError, SyncError};
pub use ids::{SessionId, Version};
pub use messages::{parse_operations, DataUpdate, OpKind, PatchOperation, Update, PING};
