//! Shared types for the video capture pipeline.

use std::time::Instant;

// ── Point ────────────────────────────────────────────────────────

/// A position in virtual-desktop coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// Half-open rectangle `[left, right) × [top, bottom)` in desktop pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin with the given size.
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Width in pixels (0 for inverted rectangles).
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    /// Height in pixels (0 for inverted rectangles).
    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn origin(&self) -> Point {
        Point::new(self.left, self.top)
    }

    /// Overlap of two rectangles, or `None` when they do not intersect.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { None } else { Some(r) }
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A captured region of the desktop as tightly packed RGBA8 pixels.
///
/// `pixels` holds `bounds.height()` rows of `bounds.width() * 4` bytes.
/// Frames are replaced each cycle, never patched in place.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Region of the desktop this frame covers.
    pub bounds: Rect,
    /// RGBA pixel data.
    pub pixels: Vec<u8>,
    /// Desktop position of the frame's top-left pixel; used to map viewer
    /// pointer coordinates back onto the desktop.
    pub origin: Point,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl VideoFrame {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(bounds: Rect, pixels: Vec<u8>) -> Self {
        Self {
            bounds,
            pixels,
            origin: bounds.origin(),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    /// Byte length a well-formed frame of these bounds must have.
    pub fn expected_len(&self) -> usize {
        self.width() as usize * self.height() as usize * Self::BYTES_PER_PIXEL
    }

    /// Pixel data with the alpha channel stripped (RGB8, row-major).
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() / 4 * 3);
        for px in self.pixels.chunks_exact(Self::BYTES_PER_PIXEL) {
            out.extend_from_slice(&px[..3]);
        }
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────
