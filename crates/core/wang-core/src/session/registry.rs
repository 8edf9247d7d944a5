//! Guild -> session map

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::VoiceSession;
use crate::transport::VoiceGateway;
use crate::types::{TenantId, VoiceChannelId};
use crate::{Result, WangError};

/// Owns one [`VoiceSession`] per connected guild
pub struct SessionRegistry {
    gateway: Arc<dyn VoiceGateway>,
    sessions: RwLock<HashMap<TenantId, Arc<VoiceSession>>>,
    /// Serialises join/remove per guild; never held by the map lock
    join_locks: RwLock<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRegistry {
    /// Create an empty registry joining through `gateway`
    pub fn new(gateway: Arc<dyn VoiceGateway>) -> Self {
        Self {
            gateway,
            sessions: RwLock::new(HashMap::new()),
            join_locks: RwLock::new(HashMap::new()),
        }
    }

    fn join_lock(&self, tenant: TenantId) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(lock) = self.join_locks.read().get(&tenant) {
            return lock.clone();
        }
        self.join_locks
            .write()
            .entry(tenant)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Return the guild's session, joining `channel` first if there is none.
    ///
    /// An existing session is returned as-is even when it sits in another
    /// channel; callers that want to move disconnect first.
    pub async fn get_or_create(
        &self,
        tenant: TenantId,
        channel: VoiceChannelId,
    ) -> Result<Arc<VoiceSession>> {
        if let Some(session) = self.get(tenant) {
            return Ok(session);
        }

        let lock = self.join_lock(tenant);
        let _guard = lock.lock().await;

        // Another caller may have joined while we waited
        if let Some(session) = self.get(tenant) {
            return Ok(session);
        }

        let transport = self
            .gateway
            .join(tenant, channel)
            .await
            .map_err(|e| match e {
                WangError::JoinFailure(_) => e,
                other => WangError::join_failure(other.to_string()),
            })?;

        let session = Arc::new(VoiceSession::new(tenant, transport));
        self.sessions.write().insert(tenant, session.clone());
        info!(guild_id = %tenant, channel_id = %channel, "Voice session created");
        Ok(session)
    }

    /// Existing session, if any
    pub fn get(&self, tenant: TenantId) -> Option<Arc<VoiceSession>> {
        self.sessions.read().get(&tenant).cloned()
    }

    /// Cancel the session scope, tear the transport down and drop the entry.
    ///
    /// Returns false when there was no session. Serialised against
    /// [`get_or_create`](Self::get_or_create) for the same guild.
    pub async fn remove(&self, tenant: TenantId) -> bool {
        let lock = self.join_lock(tenant);
        let removed = {
            let _guard = lock.lock().await;
            self.remove_locked(tenant).await
        };
        self.prune_join_lock(tenant, &lock);
        removed
    }

    async fn remove_locked(&self, tenant: TenantId) -> bool {
        let Some(session) = self.sessions.write().remove(&tenant) else {
            return false;
        };

        session.cancel();
        if let Err(e) = session.transport().disconnect().await {
            warn!(guild_id = %tenant, error = %e, "Error leaving voice channel");
        }
        info!(guild_id = %tenant, "Voice session removed");
        true
    }

    /// Drop the guild's join lock unless another join or remove still holds it
    fn prune_join_lock(&self, tenant: TenantId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.join_locks.write();
        let idle = locks
            .get(&tenant)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2);
        if idle && !self.sessions.read().contains_key(&tenant) {
            locks.remove(&tenant);
        }
    }

    /// Remove every session. Returns how many were removed.
    pub async fn remove_all(&self) -> usize {
        let mut removed = 0;
        for tenant in self.tenants() {
            if self.remove(tenant).await {
                removed += 1;
            }
        }
        removed
    }

    /// Whether the bot's session in `tenant` is connected to `channel`
    pub fn is_same_channel(&self, tenant: TenantId, channel: VoiceChannelId) -> bool {
        self.sessions
            .read()
            .get(&tenant)
            .map(|s| s.channel_id() == channel)
            .unwrap_or(false)
    }

    /// Guilds with a live session
    pub fn tenants(&self) -> Vec<TenantId> {
        self.sessions.read().keys().copied().collect()
    }

    #[cfg(test)]
    fn join_lock_count(&self) -> usize {
        self.join_locks.read().len()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// True when no guild has a session
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
