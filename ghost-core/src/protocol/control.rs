//! JSON control commands sent by viewers, and the status document.

use serde::{Deserialize, Serialize};

use crate::error::GhostError;
use crate::input::{InputEvent, MouseButton, key_to_virtual_key};

// ── Wire form ────────────────────────────────────────────────────

/// Every field any command may carry. Missing fields take their default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCommand {
    action: Option<String>,
    /// Takes precedence over `action` when both are present.
    #[serde(rename = "type")]
    kind: Option<String>,
    x: i32,
    y: i32,
    button: Option<String>,
    text: Option<String>,
    key: Option<String>,
    delta: i32,
    fps: i32,
    quality: i32,
    mode: Option<String>,
}

// ── ViewerCommand ────────────────────────────────────────────────

/// What the viewer wants video for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Full,
    AudioOnly,
}

/// A decoded viewer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    Move { x: i32, y: i32 },
    Click { x: i32, y: i32, button: MouseButton },
    Scroll { delta: i32 },
    Key { key: String },
    Text { text: String },
    SetFps { fps: u32 },
    SetQuality { quality: u8 },
    SetMode { mode: StreamMode },
    /// An action this agent does not handle.
    Unknown(String),
}

impl ViewerCommand {
    /// Decode one JSON text message.
    pub fn parse(text: &str) -> Result<Self, GhostError> {
        let raw: RawCommand = serde_json::from_str(text)?;

        let action = raw
            .kind
            .filter(|k| !k.is_empty())
            .or(raw.action)
            .unwrap_or_default();
        let text = raw.text.unwrap_or_default();

        let cmd = match action.as_str() {
            "move" => Self::Move { x: raw.x, y: raw.y },
            "click" => Self::Click {
                x: raw.x,
                y: raw.y,
                button: MouseButton::from_name(raw.button.as_deref().unwrap_or("left")),
            },
            "scroll" => {
                let delta = if raw.delta == 0 {
                    text.trim().parse().unwrap_or(0)
                } else {
                    raw.delta
                };
                Self::Scroll { delta }
            }
            "key" => Self::Key {
                key: raw.key.unwrap_or_default(),
            },
            "type" | "text" => Self::Text { text },
            "fps" => Self::SetFps {
                fps: raw.fps.max(0) as u32,
            },
            "quality" => Self::SetQuality {
                quality: raw.quality.clamp(0, 100) as u8,
            },
            "set_mode" => Self::SetMode {
                mode: if raw.mode.as_deref() == Some("audio_only") {
                    StreamMode::AudioOnly
                } else {
                    StreamMode::Full
                },
            },
            "" => return Err(GhostError::InvalidCommand("missing action".into())),
            other => Self::Unknown(other.to_string()),
        };
        Ok(cmd)
    }

    /// The input event this command replays, if any.
    ///
    /// Coordinates are still frame-relative; see [`InputEvent::offset`].
    pub fn to_input_event(&self) -> Option<InputEvent> {
        match self {
            Self::Move { x, y } => Some(InputEvent::MouseMove { x: *x, y: *y }),
            Self::Click { x, y, button } => Some(InputEvent::Click {
                x: *x,
                y: *y,
                button: *button,
            }),
            Self::Scroll { delta } if *delta != 0 => Some(InputEvent::Scroll { delta: *delta }),
            Self::Key { key } => {
                key_to_virtual_key(key).map(|virtual_key| InputEvent::Key { virtual_key })
            }
            Self::Text { text } if !text.is_empty() => Some(InputEvent::Text(text.clone())),
            _ => None,
        }
    }
}

// ── StatusReport ─────────────────────────────────────────────────

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub status: String,
    pub version: String,
    pub viewers: usize,
    pub audio_subscribers: usize,
    pub audio_state: String,
    pub audio_packets_dropped: u64,
}

// ── Tests ────────────────────────────────────────────────────────
