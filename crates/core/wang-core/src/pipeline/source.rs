//! Decode-stage abstraction

use async_trait::async_trait;
use std::path::Path;

use super::frame::PcmFrame;
use crate::Result;

/// Lazy, finite sequence of PCM frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream is exhausted.
    ///
    /// A decoder that exits abnormally reports it here, after the last frame.
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>>;

    /// Stop decoding and release the underlying resources.
    ///
    /// Must be idempotent; after it returns no decoder process may remain.
    async fn terminate(&mut self);
}

/// Opens a [`FrameSource`] for a media file
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    /// Start decoding `path`
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}
