//! Upstream AI backends consumed by the bot
//!
//! Every call is slow and user-killable. Implementations must honor the
//! token they are handed so that `!kill` interrupts the request itself,
//! not just the bookkeeping around it.

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;

/// Encoded image bytes and their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// MIME type, e.g. `image/png`
    pub mime_type: String,
    /// Encoded image
    pub data: Vec<u8>,
}

impl ImageData {
    /// Wrap encoded bytes
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// File extension matching the MIME type
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "img",
        }
    }
}

/// Generative-text completion
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Answer `prompt`. An empty answer is an error.
    async fn complete(&self, prompt: &str, cancel: CancellationToken) -> Result<String>;

    /// Answer `prompt` about `image`, sent inline with the request
    async fn complete_with_image(
        &self,
        prompt: &str,
        image: &ImageData,
        cancel: CancellationToken,
    ) -> Result<String>;
}

/// Image generation
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Generate an image for `prompt`, optionally starting from `reference`
    async fn generate_image(
        &self,
        prompt: &str,
        reference: Option<ImageData>,
        cancel: CancellationToken,
    ) -> Result<ImageData>;
}

/// Text-to-speech synthesis producing a playable audio container (mp3)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesize `text` and return the encoded audio
    async fn synthesize(&self, text: &str, cancel: CancellationToken) -> Result<Vec<u8>>;

    /// Synthesize `text` straight into `path`, creating parent directories
    async fn synthesize_to_file(
        &self,
        text: &str,
        path: &Path,
        cancel: CancellationToken,
    ) -> Result<()> {
        let audio = self.synthesize(text, cancel).await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &audio).await?;
        debug!(path = %path.display(), bytes = audio.len(), "Speech written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extension() {
        assert_eq!(ImageData::new("image/png", vec![]).extension(), "png");
        assert_eq!(ImageData::new("image/jpeg", vec![]).extension(), "jpg");
        assert_eq!(ImageData::new("application/octet-stream", vec![]).extension(), "img");
    }
}
