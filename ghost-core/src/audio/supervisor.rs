//! Lifecycle of the audio capture session.
//!
//! ```text
//! Idle → Initializing → Streaming → Stopped ─┐
//!                    ↘             ↘ Failed ─┴→ (backoff) → Idle
//! ```
//!
//! Each attempt, from building the device to the last delivered packet,
//! runs behind the task fault boundary, so a device error or a panic in the
//! driver, the factory or a subscriber ends up as a `Failed` transition. The supervisor
//! then waits a fixed backoff and opens a fresh device. It never gives up.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::device::{AudioDevice, PullResult};
use crate::audio::hub::BroadcastHub;
use crate::audio::normalizer::AudioNormalizer;
use crate::error::{GhostError, TaskError};
use crate::task;

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Initializing,
    Streaming,
    Stopped,
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared, read-mostly view of the supervisor's state.
pub type SupervisorStateHandle = Arc<Mutex<SupervisorState>>;

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait between a failed or ended session and the next attempt.
    pub restart_backoff: Duration,
    /// Sleep after a pull that found nothing buffered.
    pub idle_poll: Duration,
    /// Emit a "stream active" line every this many packets.
    pub report_every: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_secs(5),
            idle_poll: Duration::from_millis(1),
            report_every: 200,
        }
    }
}

// ── AudioCaptureSupervisor ───────────────────────────────────────

/// Keeps loopback capture running for the life of the process.
///
/// `factory` builds a fresh device for every attempt, so a device left in
/// a bad state by a failure is never reused.
pub struct AudioCaptureSupervisor<F> {
    factory: Arc<F>,
    hub: Arc<BroadcastHub>,
    config: SupervisorConfig,
    state: SupervisorStateHandle,
}

impl<F> AudioCaptureSupervisor<F>
where
    F: Fn() -> Box<dyn AudioDevice> + Send + Sync + 'static,
{
    pub fn new(factory: F, hub: Arc<BroadcastHub>, config: SupervisorConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            hub,
            config,
            state: Arc::new(Mutex::new(SupervisorState::Idle)),
        }
    }

    pub fn state_handle(&self) -> SupervisorStateHandle {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// Supervise capture forever.
    pub async fn run(self) {
        loop {
            // Outcome is already logged and reflected in the state.
            let _ = self.run_once().await;

            info!(
                delay_secs = self.config.restart_backoff.as_secs_f64(),
                "restarting audio capture"
            );
            tokio::time::sleep(self.config.restart_backoff).await;
            self.set_state(SupervisorState::Idle);
        }
    }

    /// One Initializing → Streaming → Stopped/Failed pass, without backoff.
    pub async fn run_once(&self) -> Result<(), TaskError> {
        self.set_state(SupervisorState::Initializing);

        let session = stream_session(
            Arc::clone(&self.factory),
            Arc::clone(&self.hub),
            self.config.clone(),
            Arc::clone(&self.state),
        );

        let outcome = task::guarded("audio-capture", session).await;
        match &outcome {
            Ok(()) => {
                self.set_state(SupervisorState::Stopped);
                info!("audio capture stopped");
            }
            Err(e) => {
                self.set_state(SupervisorState::Failed);
                error!("audio capture failed: {e}");
            }
        }
        outcome
    }

    fn set_state(&self, next: SupervisorState) {
        *self.state.lock() = next;
    }
}

/// Build a device, open it and pump it into `hub` until it ends or errors.
async fn stream_session<F>(
    factory: Arc<F>,
    hub: Arc<BroadcastHub>,
    config: SupervisorConfig,
    state: SupervisorStateHandle,
) -> Result<(), GhostError>
where
    F: Fn() -> Box<dyn AudioDevice> + Send + Sync + 'static,
{
    let mut device = factory();
    let format = match device.open() {
        Ok(f) => f,
        Err(e) => {
            device.close();
            return Err(e);
        }
    };
    info!(
        rate = format.sample_rate_hz,
        channels = format.channel_count,
        bits = format.bits_per_sample,
        float = format.is_float,
        "audio format detected"
    );

    *state.lock() = SupervisorState::Streaming;
    info!("audio capture started");

    let normalizer = AudioNormalizer::new();
    let report_every = config.report_every.max(1);
    let mut packets: u64 = 0;

    let result = loop {
        match device.pull_next_block() {
            Ok(PullResult::Block(block)) => {
                match normalizer.normalize(&block) {
                    Ok(packet) if packet.is_empty() => {}
                    Ok(packet) => {
                        hub.publish(packet);
                        hub.dispatch_pending();
                        packets += 1;
                        if packets % report_every == 0 {
                            debug!(packets, subscribers = hub.subscriber_count(), "stream active");
                        }
                    }
                    Err(e) => warn!("dropping audio block: {e}"),
                }
                tokio::task::yield_now().await;
            }
            Ok(PullResult::WouldBlock) => tokio::time::sleep(config.idle_poll).await,
            Ok(PullResult::Ended) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    device.close();
    result
}

// ── Tests ────────────────────────────────────────────────────────
