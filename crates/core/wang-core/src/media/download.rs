//! Remote media download via yt-dlp

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process::run_captured;
use crate::{Result, WangError};

/// Containers yt-dlp may leave behind instead of the requested mp3
const ALTERNATE_EXTENSIONS: [&str; 4] = ["webm", "m4a", "opus", "ogg"];

/// Fetches a remote URL into a local, decodable audio file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download `url` and return the produced file. Honors `cancel`.
    async fn download(&self, url: &str, cancel: CancellationToken) -> Result<PathBuf>;
}

/// [`MediaDownloader`] that shells out to yt-dlp, normalising to mp3 with ffmpeg
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    ytdlp: PathBuf,
    ffmpeg: PathBuf,
    out_dir: PathBuf,
}

impl YtDlpDownloader {
    /// Download into `out_dir` using the given binaries
    pub fn new(
        ytdlp: impl Into<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            ffmpeg: ffmpeg.into(),
            out_dir: out_dir.into(),
        }
    }

    fn base_name() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("yt_audio_{}_{}", chrono::Utc::now().timestamp(), &id[..8])
    }

    async fn fetch(&self, url: &str, base: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        let template = self.out_dir.join(format!("{base}.%(ext)s"));
        let mut cmd = Command::new(&self.ytdlp);
        cmd.args(["-x", "--audio-format", "mp3", "--no-playlist", "-o"])
            .arg(&template)
            .arg(url);
        run_captured(cmd, cancel).await?;

        let mp3 = self.out_dir.join(format!("{base}.mp3"));
        if tokio::fs::try_exists(&mp3).await? {
            return Ok(mp3);
        }

        for ext in ALTERNATE_EXTENSIONS {
            let candidate = self.out_dir.join(format!("{base}.{ext}"));
            if !tokio::fs::try_exists(&candidate).await? {
                continue;
            }
            debug!(from = %candidate.display(), "Transcoding download to mp3");
            let mut cmd = Command::new(&self.ffmpeg);
            cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"])
                .arg(&candidate)
                .args(["-acodec", "mp3"])
                .arg(&mp3);
            match run_captured(cmd, cancel).await {
                Ok(_) => {
                    let _ = tokio::fs::remove_file(&candidate).await;
                    return Ok(mp3);
                }
                Err(WangError::Cancelled) => return Err(WangError::Cancelled),
                Err(e) => warn!(from = %candidate.display(), error = %e, "Failed to convert to mp3"),
            }
        }

        Err(WangError::subprocess(
            self.ytdlp.display().to_string(),
            "no output",
            format!("downloaded file {} not found or conversion failed", mp3.display()),
        ))
    }
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn download(&self, url: &str, cancel: CancellationToken) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let base = Self::base_name();

        match self.fetch(url, &base, &cancel).await {
            Ok(path) => {
                info!(url, path = %path.display(), "Download complete");
                Ok(path)
            }
            Err(e) => {
                remove_leftovers(&self.out_dir, &base).await;
                Err(e)
            }
        }
    }
}

/// Delete partial downloads (`base.*`) left by an interrupted or failed run
async fn remove_leftovers(dir: &Path, base: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    let prefix = format!("{base}.");
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed partial download"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
            }
        }
    }
}
