//! Run-to-completion helper for short media subprocesses

use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Result, WangError};

/// Output of a successful run
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

/// `status` of a [`WangError::Subprocess`] whose program never ran
pub const SPAWN_FAILED: &str = "failed to start";

/// Program name of `command` for error reports
pub(crate) fn program_name(command: &Command) -> String {
    command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned()
}

pub(crate) fn drain<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Put the child in a process group of its own so helpers it forks can be
/// signalled together with it
pub(crate) fn isolate(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(not(unix))]
    let _ = command;
}

/// SIGKILL every process left in the group led by `leader`
pub(crate) fn kill_group(leader: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = leader.and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pid, "Process group killed"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => debug!(pgid = pid, error = %e, "Failed to signal process group"),
        }
    }
    #[cfg(not(unix))]
    let _ = leader;
}

/// Kill `child` and its process group, then reap it
pub(crate) async fn kill_tree(child: &mut Child, leader: Option<u32>) {
    kill_group(leader);
    let _ = child.kill().await;
}

/// Spawn `command`, wait for it and capture both output streams.
///
/// The child leads its own process group. Firing `cancel` kills the whole
/// group, reaps the child and returns [`WangError::Cancelled`]. A non-zero
/// exit is a [`WangError::Subprocess`] carrying stderr (or stdout when
/// stderr is empty); anything the child left running in its group is
/// killed before returning.
pub async fn run_captured(mut command: Command, cancel: &CancellationToken) -> Result<CapturedOutput> {
    let program = program_name(&command);
    isolate(&mut command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| WangError::subprocess(&program, SPAWN_FAILED, e.to_string()))?;
    let leader = child.id();

    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            kill_tree(&mut child, leader).await;
            debug!(program = %program, "Subprocess killed on cancellation");
            return Err(WangError::Cancelled);
        }
        status = child.wait() => status?,
    };
    if !status.success() {
        // Helpers still holding the output pipes would otherwise keep running
        kill_group(leader);
    }

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

    if !status.success() {
        let output = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(WangError::subprocess(program, status.to_string(), output));
    }

    Ok(CapturedOutput { stdout, stderr })
}
