//! Outbound transport seams.
//!
//! The pipeline never touches sockets directly. Each viewer connection is
//! wrapped in one of these traits by the agent; tests substitute scripted
//! fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::audio::normalizer::CanonicalAudioPacket;
use crate::error::SendError;

/// Per-viewer sink for encoded video frames.
#[async_trait]
pub trait VideoTransport: Send {
    /// Send one encoded frame, giving up after `deadline`.
    ///
    /// [`SendError::Timeout`] feeds congestion control; any other error
    /// closes the session.
    async fn send(&mut self, payload: Vec<u8>, deadline: Duration) -> Result<(), SendError>;
}

/// Per-subscriber sink for canonical audio packets.
///
/// Must not block: the hub calls it while holding the registry lock.
pub trait AudioTransport: Send + Sync {
    fn send(&self, packet: &CanonicalAudioPacket) -> Result<(), SendError>;
}
