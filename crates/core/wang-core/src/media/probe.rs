//! Stability check run before decoding

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::process::{run_captured, SPAWN_FAILED};
use crate::{Result, WangError};

/// Confirms a file reports a usable audio duration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Duration of the first audio stream, or [`WangError::FileCorrupt`]
    async fn probe(&self, path: &Path) -> Result<Duration>;
}

/// [`MediaProbe`] backed by `ffprobe`
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: PathBuf,
}

impl FfprobeProbe {
    /// Use the `ffprobe` binary at `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<Duration> {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=duration",
            "-of",
            "csv=p=0",
        ])
        .arg(path);

        // Dropping this future kills ffprobe, so no scope of our own is needed
        let output = match run_captured(cmd, &CancellationToken::new()).await {
            Ok(output) => output,
            Err(WangError::Subprocess { status, output, .. }) if status != SPAWN_FAILED => {
                return Err(WangError::file_corrupt(
                    path,
                    format!("ffprobe {status}: {output}"),
                ));
            }
            Err(e) => return Err(e),
        };

        let duration = parse_duration(&output.stdout)
            .ok_or_else(|| {
                WangError::file_corrupt(path, format!("no duration reported ({:?})", output.stdout.trim()))
            })?;
        debug!(path = %path.display(), ?duration, "ffprobe ok");
        Ok(duration)
    }
}

/// Parse ffprobe's `csv=p=0` duration line.
///
/// Empty, `N/A` and non-positive durations are rejected: a stream that
/// reports no playable time has nothing to decode.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line == "N/A" {
        return None;
    }
    let secs: f64 = line.parse().ok()?;
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}
