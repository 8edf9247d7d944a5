//! Chat-gateway voice collaborators
//!
//! The core never talks to Discord directly. A [`VoiceGateway`] performs the
//! join handshake and hands back a [`VoiceTransport`], which the owning
//! [`VoiceSession`](crate::session::VoiceSession) keeps until disconnect.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::types::{TenantId, VoiceChannelId};
use crate::Result;

/// Join primitive of the chat gateway
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Join `channel` in `tenant` and return the live outbound transport
    async fn join(
        &self,
        tenant: TenantId,
        channel: VoiceChannelId,
    ) -> Result<Arc<dyn VoiceTransport>>;
}

/// Live outbound audio connection for one guild
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Channel the transport is connected to
    fn channel_id(&self) -> VoiceChannelId;

    /// Hand one encoded wire-codec frame to the sink.
    ///
    /// Capacity-bounded: resolves once the sink accepted the frame, which may
    /// take up to a frame period when the buffer is full. Callers race this
    /// against their cancellation scope.
    async fn send_frame(&self, frame: Bytes) -> Result<()>;

    /// Toggle the speaking indicator around a stream
    async fn set_speaking(&self, speaking: bool) -> Result<()>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<()>;
}
