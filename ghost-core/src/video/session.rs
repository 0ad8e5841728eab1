//! Per-viewer adaptive video loop.
//!
//! Each viewer gets its own [`AdaptiveVideoSession`]:
//!
//! ```text
//! Capturing → Comparing → Skip ─────────────┐
//!                       → Sending → (adapt) ┴→ Pacing → Capturing
//! ```
//!
//! A send that misses its deadline degrades the session's pacing and JPEG
//! quality; a fatal send error, or [`SessionHandle::close`], ends it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::error::SendError;
use crate::transport::VideoTransport;
use crate::video::capture::{ScreenGrabber, WindowLocator};
use crate::video::encoder::FrameEncoder;
use crate::video::quality::{SessionQualityState, TrafficMeter};
use crate::video::similarity::FrameComparator;
use crate::video::types::{Point, VideoFrame};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ── Configuration ────────────────────────────────────────────────

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Starting pacing and quality.
    pub initial_quality: SessionQualityState,
    /// Upper bound on a single frame send.
    pub send_deadline: Duration,
    /// Pause taken when a cycle overran its interval.
    pub min_yield: Duration,
    /// Poll period while video is disabled (audio-only mode).
    pub disabled_poll: Duration,
    /// Period of the traffic summary log line.
    pub traffic_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_quality: SessionQualityState::default(),
            send_deadline: Duration::from_millis(150),
            min_yield: Duration::from_millis(2),
            disabled_poll: Duration::from_millis(200),
            traffic_window: Duration::from_secs(2),
        }
    }
}

// ── State ────────────────────────────────────────────────────────

/// Where the session currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Capturing,
    Comparing,
    Skip,
    Sending,
    Pacing,
    Closed,
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No target or no frame this cycle.
    Idle,
    /// Video is off for this viewer.
    Disabled,
    /// The frame matched the last one and was not sent.
    Skipped,
    /// The frame could not be encoded and was dropped.
    Dropped,
    /// The frame went out in time.
    Sent { bytes: usize },
    /// The send missed its deadline.
    Congested,
    /// The session is over.
    Closed,
}

/// Viewer-originated adjustments, applied at the start of the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    SetFps(u32),
    SetQuality(u8),
    SetVideoEnabled(bool),
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable handle used by the connection's reader side.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    control_tx: mpsc::UnboundedSender<SessionControl>,
    closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
    origin: Arc<Mutex<Point>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_fps(&self, fps: u32) {
        self.control(SessionControl::SetFps(fps));
    }

    pub fn set_quality(&self, quality: u8) {
        self.control(SessionControl::SetQuality(quality));
    }

    /// Toggle video; `false` puts the session into audio-only mode.
    pub fn set_video_enabled(&self, enabled: bool) {
        self.control(SessionControl::SetVideoEnabled(enabled));
        self.wake.notify_one();
    }

    /// Stop the session. Safe to call any number of times.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Desktop origin of the last captured frame.
    pub fn capture_origin(&self) -> Point {
        *self.origin.lock()
    }

    fn control(&self, msg: SessionControl) {
        // A send error means the session is already gone.
        let _ = self.control_tx.send(msg);
    }
}

// ── AdaptiveVideoSession ─────────────────────────────────────────

/// One viewer's capture → compare → encode → send → adapt loop.
pub struct AdaptiveVideoSession<G, E, T> {
    id: u64,
    config: SessionConfig,
    locator: Arc<dyn WindowLocator>,
    grabber: G,
    encoder: E,
    transport: T,
    comparator: FrameComparator,
    quality: SessionQualityState,
    last_frame: Option<VideoFrame>,
    state: SessionState,
    video_enabled: bool,
    meter: TrafficMeter,
    control_rx: mpsc::UnboundedReceiver<SessionControl>,
    handle: SessionHandle,
}

impl<G, E, T> AdaptiveVideoSession<G, E, T>
where
    G: ScreenGrabber,
    E: FrameEncoder,
    T: VideoTransport,
{
    pub fn new(
        config: SessionConfig,
        locator: Arc<dyn WindowLocator>,
        grabber: G,
        encoder: E,
        transport: T,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            id,
            control_tx,
            closed: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            origin: Arc::new(Mutex::new(Point::default())),
        };
        Self {
            id,
            quality: config.initial_quality,
            meter: TrafficMeter::new(config.traffic_window),
            config,
            locator,
            grabber,
            encoder,
            transport,
            comparator: FrameComparator::new(),
            last_frame: None,
            state: SessionState::Capturing,
            video_enabled: true,
            control_rx,
            handle,
        }
    }

    /// A handle for controlling this session from another task.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn quality(&self) -> SessionQualityState {
        self.quality
    }

    /// Run one capture cycle without pacing.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.apply_controls();

        if self.handle.is_closed() {
            self.state = SessionState::Closed;
            return CycleOutcome::Closed;
        }
        if !self.video_enabled {
            return CycleOutcome::Disabled;
        }

        self.state = SessionState::Capturing;
        let Some(bounds) = self.locator.target_bounds() else {
            return CycleOutcome::Idle;
        };
        let Some(frame) = self.grabber.capture(bounds) else {
            return CycleOutcome::Idle;
        };
        *self.handle.origin.lock() = frame.origin;

        self.state = SessionState::Comparing;
        if let Some(prev) = &self.last_frame {
            if self.comparator.is_similar(&frame, prev) {
                self.state = SessionState::Skip;
                return CycleOutcome::Skipped;
            }
        }

        let frame = self.last_frame.insert(frame);
        let payload = match self.encoder.encode(frame, self.quality.jpeg_quality()) {
            Ok(p) => p,
            Err(e) => {
                warn!(viewer = self.id, "frame dropped: {e}");
                return CycleOutcome::Dropped;
            }
        };

        self.state = SessionState::Sending;
        let bytes = payload.len();
        let deadline = self.config.send_deadline;
        let result = match tokio::time::timeout(deadline, self.transport.send(payload, deadline)).await
        {
            Ok(r) => r,
            Err(_) => Err(SendError::Timeout),
        };

        match result {
            Ok(()) => {
                self.quality.on_success();
                self.meter.record(bytes as u64);
                CycleOutcome::Sent { bytes }
            }
            Err(SendError::Timeout) => {
                self.quality.on_congestion();
                debug!(
                    viewer = self.id,
                    fps = self.quality.fps(),
                    quality = self.quality.jpeg_quality(),
                    "congestion, backing off"
                );
                CycleOutcome::Congested
            }
            Err(SendError::Fatal(reason)) => {
                debug!(viewer = self.id, "transport closed: {reason}");
                self.handle.close();
                self.state = SessionState::Closed;
                CycleOutcome::Closed
            }
        }
    }

    /// Drive the session until it closes.
    pub async fn run(mut self) {
        info!(viewer = self.id, "video session opened");

        loop {
            let cycle_start = tokio::time::Instant::now();
            match self.run_cycle().await {
                CycleOutcome::Closed => break,
                CycleOutcome::Disabled => {
                    Self::pause(&self.handle.wake, self.config.disabled_poll).await;
                    continue;
                }
                _ => {}
            }

            self.report_traffic();

            self.state = SessionState::Pacing;
            let interval = self.quality.frame_interval();
            let elapsed = cycle_start.elapsed();
            let pause = if elapsed < interval {
                interval - elapsed
            } else {
                self.config.min_yield
            };
            Self::pause(&self.handle.wake, pause).await;
        }

        self.state = SessionState::Closed;
        info!(viewer = self.id, "video session closed");
    }

    // ── Internal ─────────────────────────────────────────────────

    fn apply_controls(&mut self) {
        while let Ok(msg) = self.control_rx.try_recv() {
            match msg {
                SessionControl::SetFps(fps) => self.quality.set_fps(fps),
                SessionControl::SetQuality(q) => self.quality.set_quality(q),
                SessionControl::SetVideoEnabled(on) => {
                    if on && !self.video_enabled {
                        // Force a fresh frame after audio-only mode.
                        self.last_frame = None;
                    }
                    self.video_enabled = on;
                    debug!(viewer = self.id, video = on, "video mode changed");
                }
            }
        }
    }

    /// Sleep, waking early on close or a mode change.
    async fn pause(wake: &Notify, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = wake.notified() => {}
        }
    }

    fn report_traffic(&mut self) {
        let now = Instant::now();
        if !self.meter.report_due(now) {
            return;
        }
        let frames = self.meter.frame_count();
        if frames == 0 {
            return;
        }
        debug!(
            viewer = self.id,
            frames,
            avg_kb = self.meter.total_bytes() as f64 / frames as f64 / 1024.0,
            mb_per_sec = self.meter.bytes_per_sec() as f64 / (1024.0 * 1024.0),
            fps = self.quality.fps(),
            quality = self.quality.jpeg_quality(),
            "traffic"
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GhostError;
    use crate::video::capture::DesktopLocator;
    use crate::video::quality::{
        MAX_FRAME_INTERVAL_MS, MAX_JPEG_QUALITY, MIN_FRAME_INTERVAL_MS, MIN_JPEG_QUALITY,
    };
    use crate::video::types::Rect;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    const W: u32 = 64;
    const H: u32 = 32;

    /// Returns frames filled with the next scripted byte; repeats the last.
    struct Scripted {
        fills: VecDeque<u8>,
        last: u8,
        calls: Arc<AtomicU64>,
    }

    impl Scripted {
        fn new(fills: &[u8]) -> (Self, Arc<AtomicU64>) {
            let calls = Arc::new(AtomicU64::new(0));
            let g = Self {
                fills: fills.iter().copied().collect(),
                last: 0,
                calls: Arc::clone(&calls),
            };
            (g, calls)
        }
    }

    impl ScreenGrabber for Scripted {
        fn capture(&mut self, bounds: Rect) -> Option<VideoFrame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(f) = self.fills.pop_front() {
                self.last = f;
            }
            let len = bounds.width() as usize * bounds.height() as usize * 4;
            Some(VideoFrame::new(bounds, vec![self.last; len]))
        }
    }

    /// Emits the quality it was asked for as a one-byte payload.
    struct QualityEcho;

    impl FrameEncoder for QualityEcho {
        fn encode(&mut self, _frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, GhostError> {
            Ok(vec![quality])
        }
    }

    struct Failing;

    impl FrameEncoder for Failing {
        fn encode(&mut self, _frame: &VideoFrame, _quality: u8) -> Result<Vec<u8>, GhostError> {
            Err(GhostError::Encoding("boom".into()))
        }
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Ok,
        Timeout,
        Fatal,
        Hang,
    }

    struct FakeTransport {
        replies: VecDeque<Reply>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl FakeTransport {
        fn new(replies: &[Reply]) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let t = Self {
                replies: replies.iter().copied().collect(),
                sent: Arc::clone(&sent),
            };
            (t, sent)
        }
    }

    #[async_trait]
    impl VideoTransport for FakeTransport {
        async fn send(&mut self, payload: Vec<u8>, _deadline: Duration) -> Result<(), SendError> {
            match self.replies.pop_front().unwrap_or(Reply::Ok) {
                Reply::Ok => {
                    self.sent.lock().push(payload);
                    Ok(())
                }
                Reply::Timeout => Err(SendError::Timeout),
                Reply::Fatal => Err(SendError::Fatal("peer gone".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            }
        }
    }

    fn locator() -> Arc<dyn WindowLocator> {
        Arc::new(DesktopLocator::new(Rect::new(100, 50, 100 + W as i32, 50 + H as i32)))
    }

    fn config() -> SessionConfig {
        SessionConfig {
            send_deadline: Duration::from_millis(20),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn skips_similar_frames_and_sends_changes() {
        let (grabber, _) = Scripted::new(&[1, 1, 2]);
        let (transport, sent) = FakeTransport::new(&[]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);

        assert!(matches!(s.run_cycle().await, CycleOutcome::Sent { .. }));
        assert_eq!(s.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(s.state(), SessionState::Skip);
        assert!(matches!(s.run_cycle().await, CycleOutcome::Sent { .. }));
        assert_eq!(sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn publishes_capture_origin() {
        let (grabber, _) = Scripted::new(&[1]);
        let (transport, _) = FakeTransport::new(&[]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);
        let h = s.handle();
        s.run_cycle().await;
        assert_eq!(h.capture_origin(), Point::new(100, 50));
    }

    #[tokio::test]
    async fn timeouts_degrade_to_floor_and_stay() {
        let (grabber, _) = Scripted::new(&(0..=25).collect::<Vec<u8>>());
        let (transport, _) = FakeTransport::new(&[Reply::Timeout; 25]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);

        for _ in 0..20 {
            assert_eq!(s.run_cycle().await, CycleOutcome::Congested);
        }
        assert_eq!(s.quality().jpeg_quality(), MIN_JPEG_QUALITY);
        assert_eq!(s.quality().frame_interval_ms(), MAX_FRAME_INTERVAL_MS);

        for _ in 0..5 {
            s.run_cycle().await;
        }
        assert_eq!(s.quality().jpeg_quality(), MIN_JPEG_QUALITY);
        assert_eq!(s.quality().frame_interval_ms(), MAX_FRAME_INTERVAL_MS);
    }

    #[tokio::test]
    async fn success_recovers_quality() {
        let (grabber, _) = Scripted::new(&[1, 2, 3]);
        let (transport, sent) = FakeTransport::new(&[Reply::Timeout, Reply::Ok, Reply::Ok]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);

        s.run_cycle().await;
        assert_eq!(s.quality().jpeg_quality(), 50);
        s.run_cycle().await;
        s.run_cycle().await;
        assert_eq!(s.quality().jpeg_quality(), 52);
        // The second frame was encoded at the degraded quality.
        assert_eq!(sent.lock()[0], vec![50]);
    }

    #[tokio::test]
    async fn slow_transport_hits_deadline() {
        let (grabber, _) = Scripted::new(&[1]);
        let (transport, _) = FakeTransport::new(&[Reply::Hang]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);

        let started = Instant::now();
        assert_eq!(s.run_cycle().await, CycleOutcome::Congested);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn fatal_send_closes_session() {
        let (grabber, calls) = Scripted::new(&[1, 2]);
        let (transport, _) = FakeTransport::new(&[Reply::Fatal]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);
        let h = s.handle();

        assert_eq!(s.run_cycle().await, CycleOutcome::Closed);
        assert!(h.is_closed());
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.run_cycle().await, CycleOutcome::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn encode_failure_drops_frame() {
        let (grabber, _) = Scripted::new(&[1]);
        let (transport, sent) = FakeTransport::new(&[]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, Failing, transport);
        assert_eq!(s.run_cycle().await, CycleOutcome::Dropped);
        assert!(sent.lock().is_empty());
        assert_eq!(s.quality(), SessionQualityState::default());
    }

    #[tokio::test]
    async fn viewer_overrides_apply_next_cycle() {
        let (grabber, _) = Scripted::new(&[1, 2]);
        let (transport, sent) = FakeTransport::new(&[]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);
        let h = s.handle();

        h.set_fps(500);
        h.set_quality(10);
        s.run_cycle().await;
        assert_eq!(sent.lock()[0], vec![MIN_JPEG_QUALITY]);
        assert_eq!(s.quality().frame_interval_ms(), MIN_FRAME_INTERVAL_MS);

        h.set_quality(99);
        s.run_cycle().await;
        assert_eq!(sent.lock()[1], vec![MAX_JPEG_QUALITY]);
    }

    #[tokio::test]
    async fn audio_only_mode_skips_capture() {
        let (grabber, calls) = Scripted::new(&[1, 1]);
        let (transport, sent) = FakeTransport::new(&[]);
        let mut s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);
        let h = s.handle();

        s.run_cycle().await;
        h.set_video_enabled(false);
        assert_eq!(s.run_cycle().await, CycleOutcome::Disabled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Re-enabling forces a fresh send even for an unchanged screen.
        h.set_video_enabled(true);
        assert!(matches!(s.run_cycle().await, CycleOutcome::Sent { .. }));
        assert_eq!(sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_target_is_idle() {
        let (grabber, calls) = Scripted::new(&[1]);
        let (transport, _) = FakeTransport::new(&[]);
        let empty: Arc<dyn WindowLocator> = Arc::new(DesktopLocator::new(Rect::default()));
        let mut s = AdaptiveVideoSession::new(config(), empty, grabber, QualityEcho, transport);
        assert_eq!(s.run_cycle().await, CycleOutcome::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Accepts every frame after a fixed delay.
    struct Sluggish {
        delay: Duration,
        sent: Arc<AtomicU64>,
    }

    #[async_trait]
    impl VideoTransport for Sluggish {
        async fn send(&mut self, _payload: Vec<u8>, _deadline: Duration) -> Result<(), SendError> {
            tokio::time::sleep(self.delay).await;
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Runs a session for `span` of virtual time; returns (captures, sends).
    async fn run_for(span: Duration, send_delay: Duration) -> (u64, u64) {
        let fills: Vec<u8> = (0..256).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        let (grabber, calls) = Scripted::new(&fills);
        let sent = Arc::new(AtomicU64::new(0));
        let transport = Sluggish {
            delay: send_delay,
            sent: Arc::clone(&sent),
        };
        let config = SessionConfig {
            send_deadline: Duration::from_millis(150),
            min_yield: Duration::from_millis(2),
            ..SessionConfig::default()
        };
        let s = AdaptiveVideoSession::new(config, locator(), grabber, QualityEcho, transport);
        let h = s.handle();

        let task = tokio::spawn(s.run());
        tokio::time::sleep(span).await;
        h.close();
        task.await.unwrap();
        (calls.load(Ordering::SeqCst), sent.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn fast_cycles_hold_frame_rate() {
        // 40 ms interval, instant sends: one capture per interval.
        let (captures, sends) = run_for(Duration::from_millis(400), Duration::ZERO).await;
        assert!((10..=11).contains(&captures), "captures = {captures}");
        assert_eq!(sends, captures);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_cycles_only_yield() {
        // 60 ms sends overrun the 40 ms interval; the session follows each
        // cycle with the 2 ms yield instead of a full interval.
        let (captures, sends) = run_for(Duration::from_millis(400), Duration::from_millis(60)).await;
        assert!((6..=8).contains(&captures), "captures = {captures}");
        assert!(sends + 1 >= captures);
    }

    #[tokio::test]
    async fn close_stops_running_session() {
        let (grabber, _) = Scripted::new(&[1]);
        let (transport, _) = FakeTransport::new(&[]);
        let s = AdaptiveVideoSession::new(config(), locator(), grabber, QualityEcho, transport);
        let h = s.handle();

        let task = tokio::spawn(s.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.close();
        h.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(h.is_closed());
    }
}
