//! Congestion control state for a single video session.
//!
//! AIMD-style: a send that misses its deadline backs off sharply
//! (interval × 1.5, quality − 10); every on-time send recovers slowly
//! (interval × 0.95, quality + 1). Both knobs stay within fixed bounds.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Fastest pacing: 25 fps.
pub const MIN_FRAME_INTERVAL_MS: u64 = 40;
/// Slowest pacing: 5 fps.
pub const MAX_FRAME_INTERVAL_MS: u64 = 200;
pub const MIN_JPEG_QUALITY: u8 = 30;
pub const MAX_JPEG_QUALITY: u8 = 60;

const QUALITY_BACKOFF_STEP: u8 = 10;

// ── SessionQualityState ──────────────────────────────────────────

/// Frame pacing and JPEG quality for one viewer.
///
/// Owned by its session and mutated only by the session's own loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionQualityState {
    frame_interval_ms: u64,
    jpeg_quality: u8,
}

impl SessionQualityState {
    /// Build a state, clamping both values into range.
    pub fn new(frame_interval_ms: u64, jpeg_quality: u8) -> Self {
        Self {
            frame_interval_ms: frame_interval_ms.clamp(MIN_FRAME_INTERVAL_MS, MAX_FRAME_INTERVAL_MS),
            jpeg_quality: jpeg_quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
        }
    }

    /// A send missed its deadline: slow down and degrade.
    pub fn on_congestion(&mut self) {
        self.frame_interval_ms = (self.frame_interval_ms * 3 / 2).min(MAX_FRAME_INTERVAL_MS);
        self.jpeg_quality = self
            .jpeg_quality
            .saturating_sub(QUALITY_BACKOFF_STEP)
            .max(MIN_JPEG_QUALITY);
    }

    /// A send completed in time: speed up and improve.
    pub fn on_success(&mut self) {
        self.frame_interval_ms = (self.frame_interval_ms * 95 / 100).max(MIN_FRAME_INTERVAL_MS);
        self.jpeg_quality = (self.jpeg_quality + 1).min(MAX_JPEG_QUALITY);
    }

    /// Viewer-requested frame rate. Zero is ignored.
    pub fn set_fps(&mut self, fps: u32) {
        if fps == 0 {
            return;
        }
        let interval = 1000 / u64::from(fps);
        self.frame_interval_ms = interval.clamp(MIN_FRAME_INTERVAL_MS, MAX_FRAME_INTERVAL_MS);
    }

    /// Viewer-requested JPEG quality.
    pub fn set_quality(&mut self, quality: u8) {
        self.jpeg_quality = quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval_ms
    }

    pub fn fps(&self) -> u32 {
        (1000 / self.frame_interval_ms) as u32
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }
}

impl Default for SessionQualityState {
    fn default() -> Self {
        Self::new(MIN_FRAME_INTERVAL_MS, MAX_JPEG_QUALITY)
    }
}

// ── TrafficMeter ─────────────────────────────────────────────────

/// Rolling-window throughput meter for a session's outbound frames.
///
/// Feeds the periodic `"traffic"` debug line; it does not steer the
/// congestion controller.
pub struct TrafficMeter {
    /// Samples: `(when, bytes)`.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_bytes: u64,
    last_report: Instant,
}

impl TrafficMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            total_bytes: 0,
            last_report: Instant::now(),
        }
    }

    /// Record that `bytes` were sent now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        self.evict(when);
    }

    /// Average outbound rate in bytes/second over the window.
    pub fn bytes_per_sec(&self) -> u64 {
        let (Some((first, _)), Some((last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0;
        };
        let elapsed = last.duration_since(*first).max(Duration::from_millis(1));
        (self.total_bytes as f64 / elapsed.as_secs_f64()) as u64
    }

    /// Bytes recorded in the current window.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Frames recorded in the current window.
    pub fn frame_count(&self) -> usize {
        self.samples.len()
    }

    /// `true` once per window; the caller logs when it fires.
    pub fn report_due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_report) >= self.window {
            self.last_report = now;
            true
        } else {
            false
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
