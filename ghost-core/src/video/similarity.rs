//! Frame deduplication.
//!
//! Decides whether a freshly captured frame differs enough from the last
//! transmitted one to be worth encoding. Two tiers:
//!
//! 1. **Exact match**: full byte comparison. Static screens stop here.
//! 2. **Sampled match**: one byte every [`SAMPLE_STRIDE`] bytes (the red
//!    channel of every 8th pixel). More than 0.5 % mismatching samples means
//!    the frame changed. Tolerates sensor noise and a blinking caret.
//!
//! Frames whose bounds or buffer lengths differ are never similar.

use crate::video::types::VideoFrame;

/// Distance in bytes between two inspected samples.
pub const SAMPLE_STRIDE: usize = 32;

/// `samples / MISMATCH_DIVISOR` mismatches are tolerated (0.5 %).
pub const MISMATCH_DIVISOR: usize = 200;

/// Stateless two-tier frame comparator.
#[derive(Debug, Clone, Copy)]
pub struct FrameComparator {
    stride: usize,
}

impl FrameComparator {
    pub fn new() -> Self {
        Self {
            stride: SAMPLE_STRIDE,
        }
    }

    /// `true` when `current` can be dropped in favour of `previous`.
    pub fn is_similar(&self, current: &VideoFrame, previous: &VideoFrame) -> bool {
        if current.bounds != previous.bounds || current.pixels.len() != previous.pixels.len() {
            return false;
        }

        if current.pixels == previous.pixels {
            return true;
        }

        let threshold = (current.pixels.len() / self.stride) / MISMATCH_DIVISOR;
        let mut mismatches = 0usize;

        for (a, b) in current
            .pixels
            .iter()
            .step_by(self.stride)
            .zip(previous.pixels.iter().step_by(self.stride))
        {
            if a != b {
                mismatches += 1;
                if mismatches > threshold {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for FrameComparator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
