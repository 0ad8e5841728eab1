//! Viewer input replay.
//!
//! Viewers send pointer positions relative to the frame they are looking
//! at; [`InputEvent::offset`] moves them onto the desktop before the
//! injector sees them.
//!
//! # Platform
//!
//! [`SendInputInjector`] uses Win32 `SendInput` and is Windows-only. On
//! other platforms it exists but every call returns an error.

use crate::error::GhostError;
use crate::video::types::Point;

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// `"right"` and `"middle"` are recognised; anything else is left.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "right" => Self::Right,
            "middle" => Self::Middle,
            _ => Self::Left,
        }
    }
}

/// A single input action to replay on the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    MouseMove { x: i32, y: i32 },
    Click { x: i32, y: i32, button: MouseButton },
    /// Wheel delta in Win32 units (120 per notch).
    Scroll { delta: i32 },
    /// Press and release one virtual key.
    Key { virtual_key: u16 },
    /// Type text as unicode key events.
    Text(String),
}

impl InputEvent {
    /// Translate frame-relative pointer coordinates to desktop coordinates.
    ///
    /// Coordinates come from the viewer, so the sum saturates.
    pub fn offset(self, origin: Point) -> Self {
        match self {
            Self::MouseMove { x, y } => Self::MouseMove {
                x: x.saturating_add(origin.x),
                y: y.saturating_add(origin.y),
            },
            Self::Click { x, y, button } => Self::Click {
                x: x.saturating_add(origin.x),
                y: y.saturating_add(origin.y),
                button,
            },
            other => other,
        }
    }
}

/// Map a browser-style key name to a Win32 virtual-key code.
///
/// Covers the editing and arrow keys plus single letters and digits.
pub fn key_to_virtual_key(key: &str) -> Option<u16> {
    let vk = match key {
        "Enter" | "enter" | "Return" => 0x0D,
        "Backspace" | "backspace" => 0x08,
        "Space" | "space" | " " => 0x20,
        "Escape" | "escape" | "Esc" | "esc" => 0x1B,
        "Tab" | "tab" => 0x09,
        "Delete" | "delete" | "Del" => 0x2E,
        "ArrowUp" | "Up" | "up" => 0x26,
        "ArrowDown" | "Down" | "down" => 0x28,
        "ArrowLeft" | "Left" | "left" => 0x25,
        "ArrowRight" | "Right" | "right" => 0x27,
        _ => {
            let mut chars = key.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return None;
            };
            if c.is_ascii_alphabetic() {
                c.to_ascii_uppercase() as u16
            } else if c.is_ascii_digit() {
                c as u16
            } else {
                return None;
            }
        }
    };
    Some(vk)
}

/// Map a desktop pixel onto `SendInput`'s absolute 0..=65535 range over the
/// virtual screen `(left, top, width, height)`. Off-screen points clamp to
/// the nearest edge. `None` for a degenerate screen.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn to_absolute(x: i32, y: i32, screen: (i32, i32, i32, i32)) -> Option<(i32, i32)> {
    let (left, top, width, height) = screen;
    if width <= 1 || height <= 1 {
        return None;
    }
    let scale = |v: i32, origin: i32, extent: i32| {
        let offset = (i64::from(v) - i64::from(origin)).clamp(0, i64::from(extent - 1));
        (offset * 65535 / i64::from(extent - 1)) as i32
    };
    Some((scale(x, left, width), scale(y, top, height)))
}

// ── InputInjector ────────────────────────────────────────────────

/// Delivers input events to the OS.
pub trait InputInjector: Send + Sync {
    fn inject(&self, event: &InputEvent) -> Result<(), GhostError>;
}

/// `SendInput`-backed injector.
///
/// The calling process must run in the interactive desktop session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendInputInjector;

impl SendInputInjector {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    fn mouse(dx: i32, dy: i32, data: u32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn key(vk: u16, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn send(inputs: &[INPUT]) -> Result<(), GhostError> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(GhostError::Input(format!(
                "SendInput accepted {sent} of {} events",
                inputs.len()
            )));
        }
        Ok(())
    }

    /// Desktop pixel → absolute 0..65535 over the whole virtual screen.
    fn absolute(x: i32, y: i32) -> Result<(i32, i32), GhostError> {
        let (vx, vy, vw, vh) = unsafe {
            (
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        };
        to_absolute(x, y, (vx, vy, vw, vh))
            .ok_or_else(|| GhostError::Input("GetSystemMetrics returned 0".into()))
    }

    impl InputInjector for SendInputInjector {
        fn inject(&self, event: &InputEvent) -> Result<(), GhostError> {
            let abs = MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK;
            match event {
                InputEvent::MouseMove { x, y } => {
                    let (ax, ay) = absolute(*x, *y)?;
                    send(&[mouse(ax, ay, 0, MOUSEEVENTF_MOVE | abs)])
                }
                InputEvent::Click { x, y, button } => {
                    let (ax, ay) = absolute(*x, *y)?;
                    let (down, up) = match button {
                        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
                        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
                        MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
                    };
                    send(&[
                        mouse(ax, ay, 0, MOUSEEVENTF_MOVE | abs),
                        mouse(ax, ay, 0, down | abs),
                        mouse(ax, ay, 0, up | abs),
                    ])
                }
                InputEvent::Scroll { delta } => {
                    send(&[mouse(0, 0, *delta as u32, MOUSEEVENTF_WHEEL)])
                }
                InputEvent::Key { virtual_key } => send(&[
                    key(*virtual_key, 0, KEYBD_EVENT_FLAGS(0)),
                    key(*virtual_key, 0, KEYEVENTF_KEYUP),
                ]),
                InputEvent::Text(text) => {
                    let mut inputs = Vec::with_capacity(text.len() * 2);
                    for unit in text.encode_utf16() {
                        inputs.push(key(0, unit, KEYEVENTF_UNICODE));
                        inputs.push(key(0, unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP));
                    }
                    if inputs.is_empty() {
                        return Ok(());
                    }
                    send(&inputs)
                }
            }
        }
    }
}

#[cfg(not(target_os = "windows"))]
impl InputInjector for SendInputInjector {
    fn inject(&self, _event: &InputEvent) -> Result<(), GhostError> {
        Err(GhostError::Unsupported("input injection"))
    }
}

// ── Tests ────────────────────────────────────────────────────────
