//! Conversion of native audio blocks into the canonical wire format.
//!
//! Canonical format: 48 kHz, 2 channels, signed 16-bit little-endian,
//! interleaved, no header. Every block goes through the same stages in
//! order:
//!
//! 1. [`decode`]: native samples to `f32` in roughly `[-1, 1]`.
//! 2. [`resample`]: linear interpolation to 48 kHz.
//! 3. [`to_stereo`]: keep channels 0 and 1, or duplicate mono.
//! 4. [`quantize`]: clamp and scale to `i16`.
//! 5. [`pack`]: little-endian bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::format::AudioFormatDescriptor;
use crate::error::GhostError;

pub const CANONICAL_SAMPLE_RATE: u32 = 48_000;
pub const CANONICAL_CHANNELS: usize = 2;
/// Bytes per canonical frame (2 channels × 2 bytes).
pub const CANONICAL_FRAME_BYTES: usize = CANONICAL_CHANNELS * 2;

// ── Blocks and packets ───────────────────────────────────────────

/// One pull from the device, in its native format.
#[derive(Debug, Clone)]
pub struct RawAudioBlock {
    pub bytes: Vec<u8>,
    pub format: AudioFormatDescriptor,
}

/// Canonical PCM ready for fan-out. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAudioPacket {
    pcm: Bytes,
}

impl CanonicalAudioPacket {
    pub fn frame_count(&self) -> usize {
        self.pcm.len() / CANONICAL_FRAME_BYTES
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.pcm
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Samples as `i16` (interleaved L, R).
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }
}

// ── AudioNormalizer ──────────────────────────────────────────────

/// Stateless native-to-canonical converter.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioNormalizer;

impl AudioNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Run every stage on `block`. An error means the block is dropped.
    pub fn normalize(&self, block: &RawAudioBlock) -> Result<CanonicalAudioPacket, GhostError> {
        let format = &block.format;
        let channels = usize::from(format.channel_count);

        let decoded = decode(&block.bytes, format)?;
        let resampled = resample(&decoded, channels, format.sample_rate_hz);
        let stereo = to_stereo(&resampled, channels);
        let pcm = pack(&quantize(&stereo));

        Ok(CanonicalAudioPacket { pcm })
    }
}

// ── Stages ───────────────────────────────────────────────────────

/// Decode native samples to `f32`, dropping any trailing partial frame.
pub fn decode(bytes: &[u8], format: &AudioFormatDescriptor) -> Result<Vec<f32>, GhostError> {
    format.validate()?;
    let unsupported = GhostError::UnsupportedFormat {
        bits: format.bits_per_sample,
        is_float: format.is_float,
    };

    let width = format.bytes_per_sample();
    let usable = bytes.len() - bytes.len() % format.block_align();
    let chunks = bytes[..usable].chunks_exact(width);

    let samples = match (format.is_float, format.bits_per_sample) {
        (true, 32) => chunks
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (true, _) => return Err(unsupported),
        (false, 32) => chunks
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        (false, 24) => chunks
            .map(|b| {
                // Place the three bytes in the top of an i32 so the shift
                // back down sign-extends bit 23.
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        (false, 16) => chunks
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
            .collect(),
        (false, _) => return Err(unsupported),
    };
    Ok(samples)
}

/// Resample interleaved `samples` from `source_rate` to 48 kHz.
///
/// Output length is `floor(frames × 48000 / source_rate)` frames. The
/// upper interpolation index is clamped to the last input frame.
pub fn resample(samples: &[f32], channels: usize, source_rate: u32) -> Vec<f32> {
    if source_rate == CANONICAL_SAMPLE_RATE || channels == 0 {
        return samples.to_vec();
    }

    let input_frames = samples.len() / channels;
    if input_frames == 0 {
        return Vec::new();
    }

    let ratio = f64::from(source_rate) / f64::from(CANONICAL_SAMPLE_RATE);
    let output_frames =
        (input_frames as u64 * u64::from(CANONICAL_SAMPLE_RATE) / u64::from(source_rate)) as usize;

    let last = input_frames - 1;
    let mut out = Vec::with_capacity(output_frames * channels);
    for i in 0..output_frames {
        let src = i as f64 * ratio;
        let idx0 = (src.floor() as usize).min(last);
        let idx1 = (idx0 + 1).min(last);
        let frac = (src - idx0 as f64) as f32;

        for ch in 0..channels {
            let s0 = samples[idx0 * channels + ch];
            let s1 = samples[idx1 * channels + ch];
            out.push(s0 + (s1 - s0) * frac);
        }
    }
    out
}

/// Map interleaved `samples` onto two channels.
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Clamp to `[-1, 1]` and scale to `i16`.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16)
        .collect()
}

/// Little-endian interleaved byte stream.
pub fn pack(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.freeze()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(rate: u32, channels: u16, bits: u16, is_float: bool) -> AudioFormatDescriptor {
        AudioFormatDescriptor::new(rate, channels, bits, is_float).unwrap()
    }

    fn block_i16(rate: u32, channels: u16, samples: &[i16]) -> RawAudioBlock {
        RawAudioBlock {
            bytes: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            format: fmt(rate, channels, 16, false),
        }
    }

    #[test]
    fn canonical_input_passes_through() {
        let input: Vec<i16> = (0..960).map(|i| ((i * 67) % 65_536 - 32_768) as i16).collect();
        let packet = AudioNormalizer::new()
            .normalize(&block_i16(48_000, 2, &input))
            .unwrap();

        assert_eq!(packet.frame_count(), 480);
        for (out, inp) in packet.samples().zip(&input) {
            assert!((i32::from(out) - i32::from(*inp)).abs() <= 1, "{out} vs {inp}");
        }
    }

    #[test]
    fn packet_is_four_bytes_per_frame() {
        let packet = AudioNormalizer::new()
            .normalize(&block_i16(44_100, 1, &[100; 441]))
            .unwrap();
        assert_eq!(packet.as_bytes().len(), packet.frame_count() * CANONICAL_FRAME_BYTES);
    }

    #[test]
    fn resample_44100_frame_count() {
        for n in [1usize, 100, 441, 1000, 4410] {
            let input = vec![0.25f32; n * 2];
            let out = resample(&input, 2, 44_100);
            assert_eq!(out.len() / 2, n * 48_000 / 44_100, "n = {n}");
        }
    }

    #[test]
    fn resample_interpolates_linearly() {
        // Ramp at 24 kHz doubled to 48 kHz gains midpoints.
        let out = resample(&[0.0, 1.0, 2.0], 1, 24_000);
        assert_eq!(out.len(), 6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[3] - 1.5).abs() < 1e-6);
        // Tail clamps to the last input frame.
        assert_eq!(out[5], 2.0);
    }

    #[test]
    fn mono_is_duplicated() {
        let packet = AudioNormalizer::new()
            .normalize(&block_i16(48_000, 1, &[1000, -2000, 3000]))
            .unwrap();
        let samples: Vec<i16> = packet.samples().collect();
        assert_eq!(samples.len(), 6);
        for pair in samples.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn surround_keeps_front_pair() {
        let frames = [0.1f32, 0.2, 0.9, 0.9, 0.9, 0.9, 0.3, 0.4, 0.9, 0.9, 0.9, 0.9];
        assert_eq!(to_stereo(&frames, 6), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn decodes_each_encoding() {
        let f32_bytes: Vec<u8> = [0.5f32, -0.25].iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(decode(&f32_bytes, &fmt(48_000, 2, 32, true)).unwrap(), vec![0.5, -0.25]);

        let i32_bytes: Vec<u8> = [i32::MIN, 1 << 30].iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(decode(&i32_bytes, &fmt(48_000, 2, 32, false)).unwrap(), vec![-1.0, 0.5]);

        let i16_bytes: Vec<u8> = [-32_768i16, 16_384].iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(decode(&i16_bytes, &fmt(48_000, 2, 16, false)).unwrap(), vec![-1.0, 0.5]);
    }

    #[test]
    fn decodes_24_bit_with_sign_extension() {
        // -8388608 (0x800000) and +4194304 (0x400000).
        let bytes = [0x00, 0x00, 0x80, 0x00, 0x00, 0x40];
        assert_eq!(decode(&bytes, &fmt(48_000, 2, 24, false)).unwrap(), vec![-1.0, 0.5]);
        // -1 (0xFFFFFF).
        let minus_one = decode(&[0xFF, 0xFF, 0xFF], &fmt(48_000, 1, 24, false)).unwrap();
        assert!(minus_one[0] < 0.0);
    }

    #[test]
    fn partial_frames_are_dropped() {
        // Two i16 stereo frames plus three stray bytes.
        let bytes = [0u8; 11];
        assert_eq!(decode(&bytes, &fmt(48_000, 2, 16, false)).unwrap().len(), 4);
    }

    #[test]
    fn unsupported_depths_fail() {
        let err = decode(&[0; 8], &fmt(48_000, 1, 8, false)).unwrap_err();
        assert!(matches!(err, GhostError::UnsupportedFormat { bits: 8, .. }));
        assert!(decode(&[0; 16], &fmt(48_000, 2, 64, true)).is_err());
    }

    #[test]
    fn zeroed_descriptor_is_rejected() {
        let format = AudioFormatDescriptor {
            sample_rate_hz: 48_000,
            channel_count: 0,
            bits_per_sample: 0,
            is_float: false,
        };
        assert!(matches!(decode(&[0; 16], &format), Err(GhostError::InvalidFormat(_))));

        let block = RawAudioBlock {
            bytes: vec![0; 16],
            format: AudioFormatDescriptor {
                sample_rate_hz: 0,
                ..fmt(48_000, 2, 16, false)
            },
        };
        assert!(AudioNormalizer::new().normalize(&block).is_err());
    }

    #[test]
    fn quantize_clamps() {
        assert_eq!(quantize(&[2.0, -3.0, 0.0]), vec![32_767, -32_767, 0]);
    }

    #[test]
    fn empty_block_gives_empty_packet() {
        let packet = AudioNormalizer::new()
            .normalize(&block_i16(44_100, 2, &[]))
            .unwrap();
        assert!(packet.is_empty());
    }
}
