//! Agent service: HTTP/WebSocket front end over the media pipeline.
//!
//! ```text
//! GET /status        JSON status document
//! GET /stream        viewer socket: JPEG frames out, JSON commands in
//! GET /stream/audio  listener socket: 48 kHz stereo PCM out
//! ```
//!
//! Each `/stream` connection owns one `AdaptiveVideoSession` running on its
//! own guarded task. All connections share one DXGI grabber, one audio hub
//! and one audio supervisor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use ghost_core::audio::SupervisorStateHandle;
use ghost_core::{
    AdaptiveVideoSession, AudioCaptureSupervisor, AudioDevice, BroadcastHub, CpalLoopbackDevice,
    DesktopLocator, DxgiCapturer, InputInjector, JpegEncoder, Rect, SendInputInjector,
    SessionHandle, SharedGrabber, StatusReport, StreamMode, ViewerCommand, WindowLocator, task,
};

use crate::config::AgentConfig;
use crate::ws::{ChannelAudioTransport, WsVideoTransport};

// ── AgentService ─────────────────────────────────────────────────

/// The top-level agent service.
pub struct AgentService {
    config: AgentConfig,
}

impl AgentService {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl-C.
    ///
    /// 1. Opens the DXGI grabber (viewers get input relay only if that fails).
    /// 2. Starts the audio capture supervisor.
    /// 3. Serves the router until shutdown.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.config.bind_addr();

        let capturer = match DxgiCapturer::new(
            self.config.video.monitor_index,
            self.config.video.capture_timeout_ms,
        ) {
            Ok(capturer) => Some(capturer),
            Err(e) => {
                warn!("screen capture unavailable: {e}");
                None
            }
        };

        let state = AppState::new(self.config, capturer, Arc::new(SendInputInjector::new()))
            .start_audio();
        let state = Arc::new(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("ghost agent listening on {addr}");

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("ghost agent stopped");
        Ok(())
    }
}

/// Build the HTTP router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/stream", get(stream))
        .route("/stream/audio", get(stream_audio))
        .with_state(state)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl-C received, shutting down");
}

// ── Shared state ─────────────────────────────────────────────────

/// State shared by every connection.
pub struct AppState {
    config: AgentConfig,
    grabber: Option<SharedGrabber<DxgiCapturer>>,
    locator: Arc<dyn WindowLocator>,
    injector: Arc<dyn InputInjector>,
    hub: Arc<BroadcastHub>,
    audio_state: Option<SupervisorStateHandle>,
    viewers: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: AgentConfig,
        capturer: Option<DxgiCapturer>,
        injector: Arc<dyn InputInjector>,
    ) -> Self {
        // Sessions capture the whole duplicated monitor and follow it
        // across mode changes.
        let grabber = capturer.map(SharedGrabber::new);
        let locator: Arc<dyn WindowLocator> = match &grabber {
            Some(g) => Arc::new(g.clone()),
            None => Arc::new(DesktopLocator::new(Rect::default())),
        };
        let hub = Arc::new(BroadcastHub::new(config.audio.queue_capacity));

        Self {
            grabber,
            locator,
            injector,
            hub,
            audio_state: None,
            viewers: AtomicUsize::new(0),
            config,
        }
    }

    /// Spawn the capture supervisor, if audio is enabled.
    ///
    /// Must be called from inside the runtime.
    pub fn start_audio(mut self) -> Self {
        if !self.config.audio.enabled {
            info!("audio capture disabled");
            return self;
        }

        let supervisor = AudioCaptureSupervisor::new(
            || -> Box<dyn AudioDevice> { Box::new(CpalLoopbackDevice::new()) },
            Arc::clone(&self.hub),
            self.config.to_supervisor_config(),
        );
        let handle = supervisor.state_handle();

        task::spawn_guarded("audio-supervisor".into(), supervisor.run());

        self.audio_state = Some(handle);
        self
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            viewers: self.viewers.load(Ordering::Relaxed),
            audio_subscribers: self.hub.subscriber_count(),
            audio_state: match &self.audio_state {
                Some(s) => s.lock().to_string(),
                None => "disabled".into(),
            },
            audio_packets_dropped: self.hub.dropped_count(),
        }
    }

    /// Apply one viewer text message.
    ///
    /// Malformed messages are logged and ignored; they never end the
    /// connection.
    pub fn apply_command(&self, text: &str, session: Option<&SessionHandle>) {
        let command = match ViewerCommand::parse(text) {
            Ok(c) => c,
            Err(e) => {
                warn!("ignoring viewer message: {e}");
                return;
            }
        };

        match &command {
            ViewerCommand::SetFps { fps } => {
                if let Some(s) = session {
                    s.set_fps(*fps);
                }
            }
            ViewerCommand::SetQuality { quality } => {
                if let Some(s) = session {
                    s.set_quality(*quality);
                }
            }
            ViewerCommand::SetMode { mode } => {
                if let Some(s) = session {
                    s.set_video_enabled(*mode == StreamMode::Full);
                }
            }
            ViewerCommand::Unknown(action) => debug!(action = %action, "unknown viewer action"),
            _ => {
                let Some(event) = command.to_input_event() else {
                    return;
                };
                let origin = session
                    .map(SessionHandle::capture_origin)
                    .unwrap_or_default();
                if let Err(e) = self.injector.inject(&event.offset(origin)) {
                    warn!("input relay: {e}");
                }
            }
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.status_report())
}

async fn stream(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer(socket, state))
}

async fn stream_audio(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| audio_listener(socket, state))
}

/// Serve one `/stream` connection until the viewer goes away.
async fn viewer(socket: WebSocket, state: Arc<AppState>) {
    let (sink, mut incoming) = socket.split();
    let viewers = state.viewers.fetch_add(1, Ordering::Relaxed) + 1;
    info!(viewers, "viewer connected");

    let session = state.grabber.as_ref().map(|grabber| {
        let session = AdaptiveVideoSession::new(
            state.config.to_session_config(),
            Arc::clone(&state.locator),
            grabber.clone(),
            JpegEncoder::new(),
            WsVideoTransport::new(sink),
        );
        let handle = session.handle();
        task::spawn_guarded(format!("video-session-{}", handle.id()), session.run());
        handle
    });

    while let Some(msg) = incoming.next().await {
        match msg {
            Ok(Message::Text(text)) => state.apply_command(&text, session.as_ref()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("viewer socket error: {e}");
                break;
            }
        }
    }

    if let Some(handle) = &session {
        handle.close();
    }
    let viewers = state.viewers.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(viewers, "viewer disconnected");
}

/// Serve one `/stream/audio` connection from a hub subscription.
async fn audio_listener(socket: WebSocket, state: Arc<AppState>) {
    let (transport, mut mailbox) =
        ChannelAudioTransport::channel(state.config.audio.subscriber_buffer);
    let id = state.hub.subscribe(Box::new(transport));
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            pcm = mailbox.recv() => {
                let Some(pcm) = pcm else { break };
                if let Err(e) = sink.send(Message::Binary(pcm.to_vec())).await {
                    debug!("audio socket error: {e}");
                    break;
                }
            }
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unsubscribe(id);
}

// ── Tests ────────────────────────────────────────────────────────
