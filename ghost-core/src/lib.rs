//! # ghost-core
//!
//! Media pipeline for the ghost screen/audio mirroring agent.
//!
//! This crate contains:
//! - **Video**: `FrameComparator`, `SessionQualityState`, `AdaptiveVideoSession`,
//!   DXGI capture and JPEG encoding
//! - **Audio**: `AudioNormalizer`, `AudioCaptureSupervisor`, `BroadcastHub`,
//!   cpal loopback capture
//! - **Protocol**: viewer JSON commands and the status document
//! - **Input**: `SendInput` replay of viewer input
//! - **Transport**: the `VideoTransport` / `AudioTransport` seams
//! - **Task**: fault boundary for supervised tasks
//! - **Error**: `GhostError`, a `thiserror`-based error hierarchy

pub mod audio;
pub mod error;
pub mod input;
pub mod protocol;
pub mod task;
pub mod transport;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{GhostError, SendError, TaskError};
pub use input::{InputEvent, InputInjector, MouseButton, SendInputInjector};
pub use protocol::{StatusReport, StreamMode, ViewerCommand};
pub use transport::{AudioTransport, VideoTransport};

pub use audio::{
    AudioCaptureSupervisor, AudioDevice, AudioFormatDescriptor, AudioNormalizer, BroadcastHub,
    CanonicalAudioPacket, CpalLoopbackDevice, PullResult, RawAudioBlock, SupervisorConfig,
    SupervisorState,
};
pub use video::{
    AdaptiveVideoSession, CycleOutcome, DesktopLocator, DxgiCapturer, FrameComparator,
    FrameEncoder, JpegEncoder, Point, Rect, ScreenGrabber, SessionConfig, SessionHandle,
    SessionQualityState, SessionState, SharedGrabber, VideoFrame, WindowLocator,
};
