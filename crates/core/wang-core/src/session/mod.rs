//! Per-guild voice sessions
//!
//! A [`VoiceSession`] exists only while the bot is connected in a guild. It
//! owns the guild's transport and a cancellation scope; cancelling the scope
//! unwinds whatever pipeline is streaming through the transport.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::VoiceTransport;
use crate::types::{TenantId, VoiceChannelId};
use crate::{Result, WangError};

pub mod registry;

pub use registry::SessionRegistry;

/// Playback state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing streaming
    Idle,
    /// A pipeline owns the transport
    Playing,
}

/// Voice session state for a guild
pub struct VoiceSession {
    tenant: TenantId,
    transport: Arc<dyn VoiceTransport>,
    cancel: CancellationToken,
    state: Mutex<PlaybackState>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("tenant", &self.tenant)
            .field("channel", &self.transport.channel_id())
            .field("state", &*self.state.lock())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl VoiceSession {
    /// Wrap a freshly joined transport
    pub fn new(tenant: TenantId, transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            tenant,
            transport,
            cancel: CancellationToken::new(),
            state: Mutex::new(PlaybackState::Idle),
        }
    }

    /// Guild this session belongs to
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Channel the transport is connected to
    pub fn channel_id(&self) -> VoiceChannelId {
        self.transport.channel_id()
    }

    /// Outbound transport
    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    /// Session cancellation scope
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the scope has fired
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fire the scope. Any in-flight pipeline exits at its next check point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current playback state
    pub fn playback_state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Idle -> Playing compare-and-set.
    ///
    /// Rejects with [`WangError::Busy`] instead of queueing. The returned guard
    /// moves the session back to Idle exactly once when dropped.
    pub fn try_begin_playback(self: &Arc<Self>) -> Result<PlaybackGuard> {
        let mut state = self.state.lock();
        if *state == PlaybackState::Playing {
            return Err(WangError::Busy(self.tenant));
        }
        *state = PlaybackState::Playing;
        debug!(guild_id = %self.tenant, "Playback state: Idle -> Playing");
        Ok(PlaybackGuard {
            session: Arc::clone(self),
        })
    }
}

/// Holds a session in `Playing`; dropping it returns the session to `Idle`
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends playback"]
pub struct PlaybackGuard {
    session: Arc<VoiceSession>,
}

impl PlaybackGuard {
    /// Session being played into
    pub fn session(&self) -> &Arc<VoiceSession> {
        &self.session
    }
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        *self.session.state.lock() = PlaybackState::Idle;
        debug!(guild_id = %self.session.tenant, "Playback state: Playing -> Idle");
    }
}
