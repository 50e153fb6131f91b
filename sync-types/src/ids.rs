//! Session identity types for livesync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, server-issued session token.
///
/// Empty until the first message carrying an `id` arrives. The server uses it
/// together with [`Version`] to decide whether a resumed connection can be
/// served a delta or needs a full snapshot.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a SessionId from the server-issued token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The empty session, used before the first handshake.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Whether the server has issued a token yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:?})", self.0)
    }
}

/// Version of the shared document, assigned by the server.
///
/// Versions only move forward. Zero means "nothing applied yet" and is never
/// sent as a resume hint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Create a new Version with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Version.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The version of an empty document.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Whether nothing has been applied yet.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}
