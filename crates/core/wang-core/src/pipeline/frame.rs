//! Fixed PCM frame layout expected by the voice codec

/// Transport sample rate
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count
pub const CHANNELS: usize = 2;

/// Frame duration the codec requires
pub const FRAME_MS: u32 = 20;

/// Samples per channel in one frame (960)
pub const SAMPLES_PER_CHANNEL: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// Interleaved i16 samples in one frame (1920)
pub const FRAME_SAMPLES: usize = SAMPLES_PER_CHANNEL * CHANNELS;

/// s16le bytes in one frame (3840)
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Encoded payload buffer; well above Opus' worst case for one 20 ms frame
pub const MAX_PACKET_BYTES: usize = 4000;

/// One 20 ms block of interleaved signed 16-bit stereo samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Vec<i16>,
}

impl PcmFrame {
    /// A frame of silence
    pub fn silence() -> Self {
        Self {
            samples: vec![0; FRAME_SAMPLES],
        }
    }

    /// Decode up to [`FRAME_BYTES`] of s16le.
    ///
    /// A short tail (end of stream) is zero-padded to a full frame. A
    /// trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut samples = vec![0i16; FRAME_SAMPLES];
        for (slot, chunk) in samples.iter_mut().zip(bytes.chunks_exact(2)) {
            *slot = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Self { samples }
    }

    /// Interleaved samples, always [`FRAME_SAMPLES`] long
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}
