//! JPEG frame encoding.
//!
//! Each transmitted frame is a standalone JPEG so viewers can decode any
//! message independently. Quality comes from the session's congestion
//! state on every call.

use image::ColorType;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;

use crate::error::GhostError;
use crate::video::types::VideoFrame;

/// Turns a captured frame into a transmittable payload.
pub trait FrameEncoder: Send {
    /// Encode `frame` at `quality` (1–100).
    fn encode(&mut self, frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, GhostError>;
}

/// Baseline JPEG encoder backed by the `image` crate.
///
/// Sizes each output buffer from the previous frame's encoded length.
#[derive(Debug, Default)]
pub struct JpegEncoder {
    frames_encoded: u64,
    last_size: usize,
}

impl JpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames encoded so far.
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, GhostError> {
        if frame.bounds.is_empty() {
            return Err(GhostError::Encoding("empty frame".into()));
        }
        if frame.pixels.len() != frame.expected_len() {
            return Err(GhostError::Encoding(format!(
                "frame buffer is {} bytes, expected {}",
                frame.pixels.len(),
                frame.expected_len()
            )));
        }

        // JPEG carries no alpha channel.
        let rgb = frame.to_rgb();
        let mut out = Vec::with_capacity(self.last_size.max(16 * 1024));
        let mut encoder = ImageJpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.encode(&rgb, frame.width(), frame.height(), ColorType::Rgb8)?;

        self.frames_encoded += 1;
        self.last_size = out.len();
        Ok(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::Rect;

    fn gradient(w: u32, h: u32) -> VideoFrame {
        let mut px = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                px.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        VideoFrame::new(Rect::from_size(w, h), px)
    }

    #[test]
    fn produces_jpeg_markers() {
        let mut enc = JpegEncoder::new();
        let jpeg = enc.encode(&gradient(64, 48), 60).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(enc.frames_encoded(), 1);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let mut enc = JpegEncoder::new();
        let frame = gradient(64, 64);
        let hi = enc.encode(&frame, 60).unwrap();
        let lo = enc.encode(&frame, 30).unwrap();
        assert!(lo.len() < hi.len(), "lo = {}, hi = {}", lo.len(), hi.len());
    }

    #[test]
    fn rejects_malformed_frames() {
        let mut enc = JpegEncoder::new();
        let short = VideoFrame::new(Rect::from_size(8, 8), vec![0; 10]);
        assert!(matches!(enc.encode(&short, 50), Err(GhostError::Encoding(_))));

        let empty = VideoFrame::new(Rect::from_size(0, 0), Vec::new());
        assert!(enc.encode(&empty, 50).is_err());
    }
}
