//! Domain-specific error types for the ghost media pipeline.
//!
//! Fallible operations return `Result<T, GhostError>`. None of these errors
//! is allowed to escape a task boundary: the audio supervisor and the video
//! sessions absorb them into state transitions (see [`crate::task`]).

use thiserror::Error;

/// The canonical error type for the ghost pipeline.
#[derive(Debug, Error)]
pub enum GhostError {
    // ── Format Errors ────────────────────────────────────────────
    /// The native sample encoding cannot be decoded.
    #[error("unsupported audio format: {bits}-bit samples (float: {is_float})")]
    UnsupportedFormat { bits: u16, is_float: bool },

    /// A native format structure was truncated or carried impossible values.
    #[error("invalid format descriptor: {0}")]
    InvalidFormat(&'static str),

    // ── Device Errors ────────────────────────────────────────────
    /// The audio device could not be opened or stopped delivering data.
    #[error("audio device error: {0}")]
    Device(String),

    /// The screen capture backend failed.
    #[error("capture error: {0}")]
    Capture(String),

    /// The platform does not provide this collaborator.
    #[error("{0} is not available on this platform")]
    Unsupported(&'static str),

    // ── Encoding Errors ──────────────────────────────────────────
    /// Image or payload encoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Control Errors ───────────────────────────────────────────
    /// A viewer sent a control message that could not be understood.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Input injection failed.
    #[error("input injection failed: {0}")]
    Input(String),
}

// ── SendError ────────────────────────────────────────────────────

/// Outcome of a failed transport send.
///
/// Kept apart from [`GhostError`] because the video congestion loop
/// branches on it: a timeout is absorbed, a fatal error closes the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The send did not complete before its deadline.
    #[error("send deadline exceeded")]
    Timeout,

    /// The peer is gone or the connection is broken.
    #[error("transport closed: {0}")]
    Fatal(String),
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error produced by the task fault boundary.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task body returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task body panicked; the panic was contained.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was aborted before it finished.
    #[error("task was cancelled")]
    Cancelled,
}

// ── Convenient From implementations ──────────────────────────────

impl From<serde_json::Error> for GhostError {
    fn from(e: serde_json::Error) -> Self {
        GhostError::InvalidCommand(e.to_string())
    }
}

impl From<image::ImageError> for GhostError {
    fn from(e: image::ImageError) -> Self {
        GhostError::Encoding(e.to_string())
    }
}
