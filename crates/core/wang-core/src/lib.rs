//! Wang Bot Core
//!
//! Per-guild voice state for a Discord soundboard / AI bot:
//!
//! - [`SessionRegistry`] and [`VoiceSession`]: one connection per guild with
//!   an `Idle`/`Playing` state machine and a cancellation scope
//! - [`AudioPipeline`]: probe, decode to 20 ms PCM frames, Opus encode and
//!   hand off to the transport, cancellable at every step
//! - [`OperationRegistry`]: killable scopes for slow upstream calls
//! - [`TempFileTracker`]: generated-file bookkeeping (speech, downloads,
//!   image attachments and generated images) and readiness polling
//! - [`VoiceManager`]: the facade command handlers talk to
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wang_core::*;
//!
//! # async fn run(gateway: Arc<dyn VoiceGateway>) -> Result<()> {
//! let pipeline = AudioPipeline::new(
//!     Arc::new(FfprobeProbe::default()),
//!     Arc::new(FfmpegDecoder::default()),
//!     Arc::new(OpusFrameEncoder::new()),
//! );
//! let manager = VoiceManager::new(gateway, pipeline, std::env::temp_dir());
//!
//! manager.connect(TenantId(1), VoiceChannelId(2)).await?;
//! manager.play(TenantId(1), std::path::Path::new("sounds/Heyooo.mp3")).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backends;
pub mod config;
pub mod error;
pub mod manager;
pub mod media;
pub mod operations;
pub mod pipeline;
pub mod session;
pub mod tempfiles;
pub mod transport;
pub mod types;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use backends::{ImageBackend, ImageData, SpeechBackend, TextBackend};
pub use config::{load_env, load_env_from_path, resolve_sound, BotConfig, ReadinessWaits};
pub use error::{Result, WangError};
pub use manager::{KillReport, VoiceManager};
pub use media::{
    FfmpegDecoder, FfprobeProbe, MediaDownloader, MediaProbe, ProcessFrameSource, YtDlpDownloader,
};
pub use operations::{OperationId, OperationKind, OperationRegistry};
pub use pipeline::{AudioPipeline, FrameEncoder, FrameSource, FrameSourceFactory, OpusFrameEncoder, PcmFrame};
pub use session::{PlaybackGuard, PlaybackState, SessionRegistry, VoiceSession};
pub use tempfiles::{ReadinessPolicy, TempFileTracker};
pub use transport::{VoiceGateway, VoiceTransport};
pub use types::{TenantId, VoiceChannelId};
pub use utils::init_logging;

// Re-exported so adaptors and providers share one token type
pub use tokio_util::sync::CancellationToken;
