//! PCM -> Opus

use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::info;

use super::frame::{PcmFrame, MAX_PACKET_BYTES};
use crate::{Result, WangError};

/// Compresses one PCM frame into one wire-codec packet
#[cfg_attr(test, mockall::automock)]
pub trait FrameEncoder: Send + Sync {
    /// Encode a full 20 ms frame
    fn encode(&self, frame: &PcmFrame) -> Result<Bytes>;
}

static OPUS: OnceCell<Mutex<Encoder>> = OnceCell::new();

fn shared_encoder() -> Result<&'static Mutex<Encoder>> {
    OPUS.get_or_try_init(|| {
        let encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| WangError::other(format!("Failed to create Opus encoder: {e}")))?;
        info!("Opus encoder initialised (48 kHz stereo)");
        Ok(Mutex::new(encoder))
    })
}

/// Process-wide Opus encoder, created on first use and shared by every guild.
///
/// One frame encodes in well under a frame period, so the lock is held only
/// for the duration of a single `encode` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpusFrameEncoder;

impl OpusFrameEncoder {
    /// Handle to the shared encoder
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&self, frame: &PcmFrame) -> Result<Bytes> {
        let encoder = shared_encoder()?;
        let mut out = [0u8; MAX_PACKET_BYTES];
        let len = encoder
            .lock()
            .encode(frame.samples(), &mut out)
            .map_err(|e| WangError::other(format!("Opus encode failed: {e}")))?;
        Ok(Bytes::copy_from_slice(&out[..len]))
    }
}
