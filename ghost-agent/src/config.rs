//! Configuration for the ghost agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ghost_core::video::quality::{MAX_JPEG_QUALITY, MIN_JPEG_QUALITY};
use ghost_core::{SessionConfig, SessionQualityState, SupervisorConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// HTTP / WebSocket listener.
    pub server: ServerConfig,
    /// Screen capture and per-viewer streaming.
    pub video: VideoConfig,
    /// Loopback audio capture and fan-out.
    pub audio: AudioConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Video configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Starting frame rate for a new viewer (5-25).
    pub initial_fps: u32,
    /// Starting JPEG quality for a new viewer (30-60).
    pub initial_quality: u8,
    /// Deadline for a single frame send.
    pub send_deadline_ms: u64,
    /// Pause after a cycle that overran its interval.
    pub min_yield_ms: u64,
    /// Monitor index to capture (0 = primary).
    pub monitor_index: u32,
    /// DXGI acquire timeout in milliseconds.
    pub capture_timeout_ms: u32,
    /// Period of the per-viewer traffic summary.
    pub traffic_report_secs: u64,
    /// Poll period for viewers in audio-only mode.
    pub disabled_poll_ms: u64,
}

/// Audio configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture system audio at all.
    pub enabled: bool,
    /// Packets buffered between capture and fan-out.
    pub queue_capacity: usize,
    /// Wait before reopening a failed device.
    pub restart_backoff_secs: u64,
    /// Packets buffered per audio subscriber before it starts dropping.
    pub subscriber_buffer: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            initial_fps: 25,
            initial_quality: 60,
            send_deadline_ms: 150,
            min_yield_ms: 2,
            monitor_index: 0,
            capture_timeout_ms: 16,
            traffic_report_secs: 2,
            disabled_poll_ms: 200,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 100,
            restart_backoff_secs: 5,
            subscriber_buffer: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file at the path; defaults in use.
    Missing,
    /// The file did not parse; defaults in use.
    Invalid(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Nothing is logged here: the level comes from this file, so the
    /// caller reports the source once the subscriber is installed.
    pub fn load(path: &Path) -> (Self, ConfigSource) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, ConfigSource::File),
                Err(e) => (Self::default(), ConfigSource::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), ConfigSource::Missing),
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// Per-viewer session settings. Out-of-range values are clamped.
    pub fn to_session_config(&self) -> SessionConfig {
        let mut quality = SessionQualityState::default();
        quality.set_fps(self.video.initial_fps.max(1));
        quality.set_quality(
            self.video
                .initial_quality
                .clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
        );

        SessionConfig {
            initial_quality: quality,
            send_deadline: Duration::from_millis(self.video.send_deadline_ms.clamp(10, 1000)),
            min_yield: Duration::from_millis(self.video.min_yield_ms.max(1)),
            disabled_poll: Duration::from_millis(self.video.disabled_poll_ms.max(10)),
            traffic_window: Duration::from_secs(self.video.traffic_report_secs.max(1)),
        }
    }

    /// Audio supervisor settings.
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            restart_backoff: Duration::from_secs(self.audio.restart_backoff_secs.max(1)),
            ..SupervisorConfig::default()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
