//! Error types for livesync.

use thiserror::Error;

/// Errors surfaced to a sync handle's error callback.
///
/// None of these are fatal: every variant resolves to either "drop this
/// message" or "reconnect".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message could not be decoded.
    #[error("malformed message: {0}")]
    Parse(String),

    /// An update arrived without a body.
    #[error("null object")]
    NullBody,

    /// A delta could not be applied to the document.
    #[error("patch rejected: {0}")]
    Patch(#[from] PatchError),
}

/// Patch validation and application errors.
///
/// `index` is the position of the offending operation in its sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The delta body is not an array of operations.
    #[error("patch sequence must be an array")]
    SequenceNotAnArray,

    /// An operation is not a JSON object.
    #[error("operation {index}: not an object")]
    NotAnObject {
        /// Operation index.
        index: usize,
    },

    /// `op` is not one of the RFC 6902 operations.
    #[error("operation {index}: unknown op {op:?}")]
    OpInvalid {
        /// Operation index.
        index: usize,
        /// The rejected op name.
        op: String,
    },

    /// `path` is missing or not a string.
    #[error("operation {index}: path is not a string")]
    PathInvalid {
        /// Operation index.
        index: usize,
    },

    /// `move`/`copy` without a string `from`.
    #[error("operation {index}: from is required")]
    FromRequired {
        /// Operation index.
        index: usize,
    },

    /// `add`/`replace`/`test` without a `value`.
    #[error("operation {index}: value is required")]
    ValueRequired {
        /// Operation index.
        index: usize,
    },

    /// The parent of an `add` target does not exist.
    #[error("operation {index}: cannot add at {path}")]
    PathCannotAdd {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },

    /// The target path does not resolve against the tree.
    #[error("operation {index}: path {path} does not exist")]
    PathUnresolvable {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },

    /// The `from` path of a `move`/`copy` does not resolve.
    #[error("operation {index}: from path {from} does not exist")]
    FromUnresolvable {
        /// Operation index.
        index: usize,
        /// Source path.
        from: String,
    },

    /// A non-numeric segment was used to address an array.
    #[error("operation {index}: {path} is not a valid array index")]
    IllegalArrayIndex {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },

    /// An array `add` past the end of the array.
    #[error("operation {index}: index in {path} is out of bounds")]
    ValueOutOfBounds {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },

    /// A path tried to descend through a scalar.
    #[error("operation {index}: {path} traverses a scalar")]
    InvalidTarget {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },

    /// `move` into one of its own children.
    #[error("operation {index}: cannot move into own child {path}")]
    MoveIntoSelf {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },

    /// A `test` operation did not match.
    #[error("operation {index}: test failed at {path}")]
    TestFailed {
        /// Operation index.
        index: usize,
        /// Target path.
        path: String,
    },
}
