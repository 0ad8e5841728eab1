//! # ghost-agent
//!
//! Runs on the mirrored machine. Captures the desktop with DXGI and the
//! system mix with WASAPI loopback, and serves both over WebSockets:
//!
//! - `/stream`: adaptive JPEG video per viewer, with viewer input replayed
//!   through `SendInput`
//! - `/stream/audio`: 48 kHz stereo PCM fan-out
//! - `/status`: JSON health document

pub mod config;
pub mod service;
pub mod ws;
