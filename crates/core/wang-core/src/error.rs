//! Error types for the Wang Bot core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::TenantId;

/// Main error type for bot operations
#[derive(Debug, Error)]
pub enum WangError {
    /// Playback requested for a guild with no voice session
    #[error("Not connected to a voice channel in guild {0}")]
    NotConnected(TenantId),

    /// The guild's session is already streaming
    #[error("Already playing audio in guild {0}")]
    Busy(TenantId),

    /// Voice channel join handshake failed
    #[error("Failed to join voice channel: {0}")]
    JoinFailure(String),

    /// Readiness polling gave up before the file settled
    #[error("File {} not ready after {:?} (last size: {last_size:?})", path.display(), waited)]
    FileNotReady {
        /// File that never settled
        path: PathBuf,
        /// How long we polled
        waited: Duration,
        /// Last observed size, if the file was ever seen
        last_size: Option<u64>,
    },

    /// Probe step rejected the file
    #[error("File {} appears to be invalid or corrupted: {reason}", path.display())]
    FileCorrupt {
        /// Rejected file
        path: PathBuf,
        /// Probe diagnostic
        reason: String,
    },

    /// Decode / transcode / download process failed
    #[error("{program} failed ({status}): {output}")]
    Subprocess {
        /// Program name
        program: String,
        /// Exit status description
        status: String,
        /// Captured diagnostic output
        output: String,
    },

    /// The operation's or session's cancellation scope fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Generative-text or speech backend failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Voice transport error after the session was established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using WangError
pub type Result<T> = std::result::Result<T, WangError>;

impl WangError {
    /// Create a join failure error
    pub fn join_failure(msg: impl Into<String>) -> Self {
        WangError::JoinFailure(msg.into())
    }

    /// Create a corrupt-file error
    pub fn file_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        WangError::FileCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a subprocess error
    pub fn subprocess(
        program: impl Into<String>,
        status: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        WangError::Subprocess {
            program: program.into(),
            status: status.into(),
            output: output.into(),
        }
    }

    /// Create an upstream backend error
    pub fn upstream(msg: impl Into<String>) -> Self {
        WangError::Upstream(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        WangError::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        WangError::Transport(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        WangError::Other(msg.into())
    }

    /// True when the failure is a cancellation rather than an ordinary error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WangError::Cancelled)
    }

    /// Single chat-facing line for a failure caught at a task boundary
    pub fn user_message(&self) -> String {
        match self {
            WangError::NotConnected(_) => "❌ Bot is not connected to a voice channel.".to_string(),
            WangError::Busy(_) => "⏳ Already playing something, try again when it finishes.".to_string(),
            WangError::JoinFailure(_) => "❌ Failed to join voice channel.".to_string(),
            WangError::FileNotReady { .. } => "❌ Audio file not ready.".to_string(),
            WangError::FileCorrupt { .. } => "❌ Audio file verification failed.".to_string(),
            WangError::Subprocess { program, .. } => format!("❌ {} failed.", program),
            WangError::Cancelled => "🛑 Cancelled.".to_string(),
            WangError::Upstream(msg) => format!("❌ {}", msg),
            other => format!("❌ {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = WangError::upstream("empty response from Gemini");
        assert_eq!(err.to_string(), "Upstream error: empty response from Gemini");

        let err = WangError::subprocess("ffmpeg", "exit status: 1", "No such file");
        assert_eq!(err.to_string(), "ffmpeg failed (exit status: 1): No such file");
    }

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(WangError::Cancelled.is_cancelled());
        assert!(!WangError::Busy(TenantId(1)).is_cancelled());
        assert_eq!(WangError::Cancelled.user_message(), "🛑 Cancelled.");
    }

    #[test]
    fn test_user_message_hides_internal_paths() {
        let err = WangError::file_corrupt("/tmp/wang/out.mp3", "N/A");
        assert!(!err.user_message().contains("/tmp"));
    }
}
