//! Native audio format description.
//!
//! Detected once when a capture session starts and fixed for its lifetime.

use tracing::warn;

use crate::error::GhostError;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size of a bare `WAVEFORMATEX` (without extra bytes).
const WAVEFORMATEX_LEN: usize = 18;
/// Size of `WAVEFORMATEXTENSIBLE`.
const WAVEFORMATEXTENSIBLE_LEN: usize = 40;

/// The shape of a device's native sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormatDescriptor {
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
}

impl AudioFormatDescriptor {
    /// Validate and build a descriptor.
    pub fn new(
        sample_rate_hz: u32,
        channel_count: u16,
        bits_per_sample: u16,
        is_float: bool,
    ) -> Result<Self, GhostError> {
        let format = Self {
            sample_rate_hz,
            channel_count,
            bits_per_sample,
            is_float,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check the fields describe a decodable stream.
    ///
    /// The fields are public, so consumers re-check a descriptor built as
    /// a struct literal before dividing by its frame size.
    pub fn validate(&self) -> Result<(), GhostError> {
        if self.sample_rate_hz == 0 {
            return Err(GhostError::InvalidFormat("sample rate is zero"));
        }
        if self.channel_count == 0 {
            return Err(GhostError::InvalidFormat("channel count is zero"));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(GhostError::InvalidFormat("bits per sample is not a whole byte count"));
        }
        Ok(())
    }

    /// Parse a raw `WAVEFORMATEX` / `WAVEFORMATEXTENSIBLE` structure.
    ///
    /// Layout (little-endian): tag@0, channels@2, rate@4, avg bytes@8,
    /// block align@12, bits@14, cbSize@16; extensible adds valid bits@18,
    /// channel mask@20 and the sub-format GUID@24. A zero bit depth is read
    /// as 32. An unknown extensible sub-format is treated as float.
    pub fn from_wave_format(bytes: &[u8]) -> Result<Self, GhostError> {
        if bytes.len() < WAVEFORMATEX_LEN {
            return Err(GhostError::InvalidFormat("WAVEFORMATEX truncated"));
        }

        let tag = read_u16(bytes, 0);
        let channels = read_u16(bytes, 2);
        let rate = read_u32(bytes, 4);
        let mut bits = read_u16(bytes, 14);
        if bits == 0 {
            bits = 32;
        }

        let is_float = match tag {
            WAVE_FORMAT_PCM => false,
            WAVE_FORMAT_IEEE_FLOAT => true,
            WAVE_FORMAT_EXTENSIBLE => {
                if bytes.len() < WAVEFORMATEXTENSIBLE_LEN {
                    return Err(GhostError::InvalidFormat("WAVEFORMATEXTENSIBLE truncated"));
                }
                // First field of the sub-format GUID.
                match read_u32(bytes, 24) {
                    1 => false,
                    3 => true,
                    other => {
                        warn!(sub_format = other, "unknown extensible sub-format, assuming float");
                        true
                    }
                }
            }
            _ => return Err(GhostError::InvalidFormat("unknown format tag")),
        };

        Self::new(rate, channels, bits, is_float)
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Bytes per interleaved frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channel_count)
    }
}

fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn waveformatex(tag: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let block = channels * (bits / 8).max(1);
        let mut b = Vec::with_capacity(18);
        b.extend_from_slice(&tag.to_le_bytes());
        b.extend_from_slice(&channels.to_le_bytes());
        b.extend_from_slice(&rate.to_le_bytes());
        b.extend_from_slice(&(rate * u32::from(block)).to_le_bytes());
        b.extend_from_slice(&block.to_le_bytes());
        b.extend_from_slice(&bits.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b
    }

    fn extensible(channels: u16, rate: u32, bits: u16, sub_format: u32) -> Vec<u8> {
        let mut b = waveformatex(WAVE_FORMAT_EXTENSIBLE, channels, rate, bits);
        b[16..18].copy_from_slice(&22u16.to_le_bytes());
        b.extend_from_slice(&bits.to_le_bytes());
        b.extend_from_slice(&0x3u32.to_le_bytes());
        b.extend_from_slice(&sub_format.to_le_bytes());
        b.extend_from_slice(&[0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71]);
        assert_eq!(b.len(), 40);
        b
    }

    #[test]
    fn parses_plain_pcm() {
        let f = AudioFormatDescriptor::from_wave_format(&waveformatex(1, 2, 44_100, 16)).unwrap();
        assert_eq!(f, AudioFormatDescriptor::new(44_100, 2, 16, false).unwrap());
        assert_eq!(f.block_align(), 4);
    }

    #[test]
    fn parses_float() {
        let f = AudioFormatDescriptor::from_wave_format(&waveformatex(3, 2, 48_000, 32)).unwrap();
        assert!(f.is_float);
        assert_eq!(f.bytes_per_sample(), 4);
    }

    #[test]
    fn parses_extensible_sub_formats() {
        let pcm = AudioFormatDescriptor::from_wave_format(&extensible(6, 48_000, 24, 1)).unwrap();
        assert!(!pcm.is_float);
        assert_eq!(pcm.channel_count, 6);
        assert_eq!(pcm.bits_per_sample, 24);

        let float = AudioFormatDescriptor::from_wave_format(&extensible(2, 48_000, 32, 3)).unwrap();
        assert!(float.is_float);

        let odd = AudioFormatDescriptor::from_wave_format(&extensible(2, 48_000, 32, 0x77)).unwrap();
        assert!(odd.is_float);
    }

    #[test]
    fn zero_bits_means_32() {
        let f = AudioFormatDescriptor::from_wave_format(&waveformatex(3, 2, 48_000, 0)).unwrap();
        assert_eq!(f.bits_per_sample, 32);
    }

    #[test]
    fn rejects_truncated_structures() {
        assert!(AudioFormatDescriptor::from_wave_format(&[0u8; 10]).is_err());
        let short = waveformatex(WAVE_FORMAT_EXTENSIBLE, 2, 48_000, 32);
        assert!(matches!(
            AudioFormatDescriptor::from_wave_format(&short),
            Err(GhostError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_impossible_values() {
        assert!(AudioFormatDescriptor::new(0, 2, 16, false).is_err());
        assert!(AudioFormatDescriptor::new(48_000, 0, 16, false).is_err());
        assert!(AudioFormatDescriptor::new(48_000, 2, 12, false).is_err());
        assert!(AudioFormatDescriptor::from_wave_format(&waveformatex(0x55, 2, 48_000, 16)).is_err());
    }
}
