//! Cancellable file -> PCM -> Opus -> transport streaming
//!
//! [`AudioPipeline::stream`] owns a session's playback slot for the duration
//! of one file. Every suspension point (probe, decode read, sink handoff) is
//! raced against the session's cancellation scope, so a kill is observed
//! within one frame period.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::media::probe::MediaProbe;
use crate::session::VoiceSession;
use crate::transport::VoiceTransport;
use crate::{Result, WangError};

pub mod encoder;
pub mod frame;
pub mod source;

pub use encoder::{FrameEncoder, OpusFrameEncoder};
pub use frame::PcmFrame;
pub use source::{FrameSource, FrameSourceFactory};

/// Probe, decode and encode stages wired together
pub struct AudioPipeline {
    probe: Arc<dyn MediaProbe>,
    sources: Arc<dyn FrameSourceFactory>,
    encoder: Arc<dyn FrameEncoder>,
}

impl AudioPipeline {
    /// Assemble a pipeline from its stages
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        sources: Arc<dyn FrameSourceFactory>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Self {
        Self {
            probe,
            sources,
            encoder,
        }
    }

    /// Stream `path` through `session`'s transport. Returns the number of
    /// frames handed to the sink.
    ///
    /// Fails fast with [`WangError::Busy`] if the session is already playing.
    /// The session is back in `Idle` and the decoder is gone when this
    /// returns, whatever the outcome.
    pub async fn stream(&self, session: &Arc<VoiceSession>, path: &Path) -> Result<usize> {
        let _playing = session.try_begin_playback()?;
        let cancel = session.cancel_token().clone();
        let tenant = session.tenant();

        if cancel.is_cancelled() {
            return Err(WangError::Cancelled);
        }

        let duration = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WangError::Cancelled),
            probed = self.probe.probe(path) => probed?,
        };
        debug!(guild_id = %tenant, path = %path.display(), ?duration, "Audio file verified");

        let mut source = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WangError::Cancelled),
            opened = self.sources.open(path) => opened?,
        };

        let transport = Arc::clone(session.transport());
        if let Err(e) = transport.set_speaking(true).await {
            source.terminate().await;
            return Err(e);
        }

        info!(guild_id = %tenant, path = %path.display(), "Streaming audio");
        let result = self
            .pump(source.as_mut(), transport.as_ref(), &cancel)
            .await;
        source.terminate().await;

        if let Err(e) = transport.set_speaking(false).await {
            debug!(guild_id = %tenant, error = %e, "Failed to clear speaking indicator");
        }

        match &result {
            Ok(frames) => info!(guild_id = %tenant, frames, "Playback finished"),
            Err(WangError::Cancelled) => info!(guild_id = %tenant, "Playback cancelled"),
            Err(e) => warn!(guild_id = %tenant, error = %e, "Playback failed"),
        }
        result
    }

    async fn pump(
        &self,
        source: &mut dyn FrameSource,
        transport: &dyn VoiceTransport,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut sent = 0usize;
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WangError::Cancelled),
                next = source.next_frame() => next?,
            };
            let Some(frame) = frame else {
                return Ok(sent);
            };

            let packet = self.encoder.encode(&frame)?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WangError::Cancelled),
                accepted = transport.send_frame(packet) => accepted?,
            }
            sent += 1;
        }
    }
}
