//! WebSocket adapters for the core transport traits.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::mpsc::{self, error::TrySendError};

use ghost_core::{AudioTransport, CanonicalAudioPacket, SendError, VideoTransport};

// ── Video ────────────────────────────────────────────────────────

/// Sends each encoded frame as one binary WebSocket message.
pub struct WsVideoTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WsVideoTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl VideoTransport for WsVideoTransport {
    async fn send(&mut self, payload: Vec<u8>, deadline: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(deadline, self.sink.send(Message::Binary(payload))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Fatal(e.to_string())),
            Err(_) => Err(SendError::Timeout),
        }
    }
}

// ── Audio ────────────────────────────────────────────────────────

/// Hub-side end of a subscriber's mailbox.
///
/// The hub must never wait on a socket, so packets go into a bounded
/// channel drained by the connection's writer task. A full mailbox drops
/// the packet; a closed one unsubscribes.
pub struct ChannelAudioTransport {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelAudioTransport {
    /// Create the transport and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AudioTransport for ChannelAudioTransport {
    fn send(&self, packet: &CanonicalAudioPacket) -> Result<(), SendError> {
        match self.tx.try_send(packet.as_bytes().clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::trace!("audio mailbox full; packet dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Fatal("listener gone".into())),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
