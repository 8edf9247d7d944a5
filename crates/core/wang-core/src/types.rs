//! Identifier newtypes shared across the core

use std::fmt;

/// Guild (server) id: the partitioning key for all bot state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(pub u64);

impl TenantId {
    /// Raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TenantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Voice channel id within a guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceChannelId(pub u64);

impl VoiceChannelId {
    /// Raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VoiceChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VoiceChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
