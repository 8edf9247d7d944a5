//! Subprocess-backed decode stage

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::process::{drain, program_name, SPAWN_FAILED};
use crate::pipeline::frame::{PcmFrame, CHANNELS, FRAME_BYTES, SAMPLE_RATE};
use crate::pipeline::source::{FrameSource, FrameSourceFactory};
use crate::{Result, WangError};

/// Reads raw s16le PCM from a child process' stdout, one frame at a time
pub struct ProcessFrameSource {
    program: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    buf: Box<[u8; FRAME_BYTES]>,
}

impl ProcessFrameSource {
    /// Spawn `command` with stdout piped as the PCM stream
    pub fn spawn(mut command: Command) -> Result<Self> {
        let program = program_name(&command);
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WangError::subprocess(&program, SPAWN_FAILED, e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WangError::subprocess(&program, SPAWN_FAILED, "missing stdout"))?;
        let stderr_task = drain(child.stderr.take());
        debug!(program = %program, pid = ?child.id(), "Decoder started");

        Ok(Self {
            program,
            child: Some(child),
            stdout: Some(stdout),
            stderr_task: Some(stderr_task),
            buf: Box::new([0u8; FRAME_BYTES]),
        })
    }

    /// OS pid of the decoder while it has not been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Reap a decoder whose output hit EOF and report how it exited
    async fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        if status.success() {
            return Ok(());
        }
        Err(WangError::subprocess(
            &self.program,
            status.to_string(),
            String::from_utf8_lossy(&stderr).trim(),
        ))
    }
}

#[async_trait]
impl FrameSource for ProcessFrameSource {
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut filled = 0;
        while filled < FRAME_BYTES {
            let n = stdout.read(&mut self.buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == FRAME_BYTES {
            return Ok(Some(PcmFrame::from_le_bytes(&self.buf[..])));
        }

        self.stdout = None;
        self.finish().await?;
        if filled == 0 {
            Ok(None)
        } else {
            Ok(Some(PcmFrame::from_le_bytes(&self.buf[..filled])))
        }
    }

    async fn terminate(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(program = %self.program, error = %e, "Failed to kill decoder");
            } else {
                debug!(program = %self.program, "Decoder terminated");
            }
        }
        self.stderr_task = None;
    }
}

/// [`FrameSourceFactory`] that decodes with `ffmpeg` to 48 kHz stereo s16le
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: PathBuf,
}

impl FfmpegDecoder {
    /// Use the `ffmpeg` binary at `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command line for decoding `path` to the pipeline's PCM layout
    pub fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-f", "s16le", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("pipe:1");
        cmd
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameSourceFactory for FfmpegDecoder {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(ProcessFrameSource::spawn(self.command(path))?))
    }
}
