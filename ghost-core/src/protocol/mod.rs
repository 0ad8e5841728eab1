//! Viewer-facing message formats.
//!
//! Viewers talk to the agent over the video WebSocket:
//!
//! ```text
//! Agent  ──[binary: JPEG frame]──────────────► Viewer   (repeated)
//! Viewer ──[text: JSON command]──────────────► Agent
//! ```
//!
//! The audio WebSocket is one-way raw PCM and has no message format of its
//! own. `/status` answers with a [`StatusReport`].

pub mod control;

pub use control::{StatusReport, StreamMode, ViewerCommand};
