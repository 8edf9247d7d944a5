//! Voice-state tracking and member-moving plans
//!
//! Planning is pure so the randomness can be seeded in tests; the handlers
//! carry the plans out over the Discord API.

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;

/// Guild, user and channel ids as raw snowflakes
pub type Snowflake = u64;

/// Who is in which voice channel, per guild.
///
/// Maintained from gateway `voice_state_update` and `guild_create` events;
/// more reliable than the serenity cache for this purpose.
#[derive(Debug, Default)]
pub struct VoiceStates {
    guilds: RwLock<HashMap<Snowflake, HashMap<Snowflake, Snowflake>>>,
}

impl VoiceStates {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `user` joining/moving to `channel`, or leaving voice on `None`
    pub fn update(&self, guild: Snowflake, user: Snowflake, channel: Option<Snowflake>) {
        let mut guilds = self.guilds.write();
        match channel {
            Some(channel) => {
                guilds.entry(guild).or_default().insert(user, channel);
            }
            None => {
                if let Some(members) = guilds.get_mut(&guild) {
                    members.remove(&user);
                    if members.is_empty() {
                        guilds.remove(&guild);
                    }
                }
            }
        }
    }

    /// Replace a guild's states wholesale (initial snapshot on guild create)
    pub fn replace_guild(
        &self,
        guild: Snowflake,
        states: impl IntoIterator<Item = (Snowflake, Snowflake)>,
    ) -> usize {
        let members: HashMap<_, _> = states.into_iter().collect();
        let count = members.len();
        let mut guilds = self.guilds.write();
        if members.is_empty() {
            guilds.remove(&guild);
        } else {
            guilds.insert(guild, members);
        }
        count
    }

    /// Voice channel `user` is currently in
    pub fn channel_of(&self, guild: Snowflake, user: Snowflake) -> Option<Snowflake> {
        self.guilds
            .read()
            .get(&guild)
            .and_then(|members| members.get(&user).copied())
    }

    /// `(user, channel)` pairs for everyone in voice in `guild`, ordered by user
    pub fn members(&self, guild: Snowflake) -> Vec<VoiceMember> {
        let mut members: Vec<_> = self
            .guilds
            .read()
            .get(&guild)
            .map(|m| {
                m.iter()
                    .map(|(&user, &channel)| VoiceMember { user, channel })
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by_key(|m| m.user);
        members
    }
}

/// A user currently in a voice channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceMember {
    /// User id
    pub user: Snowflake,
    /// Channel the user is in
    pub channel: Snowflake,
}

/// Move `user` to `channel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberMove {
    /// User to move
    pub user: Snowflake,
    /// Destination channel
    pub channel: Snowflake,
}

/// Why a plan could not be made
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Nobody to move
    #[error("❌ No users in voice channels to shuffle.")]
    NoMembers,

    /// The guild has no voice channels
    #[error("❌ No voice channels found.")]
    NoChannels,

    /// Every voice channel is the requester's own
    #[error("❌ No other voice channels to move the user to.")]
    NoDestination,
}

/// Users in voice, optionally restricted to those in `channel`
pub fn gather_members(members: &[VoiceMember], channel: Option<Snowflake>) -> Vec<Snowflake> {
    members
        .iter()
        .filter(|m| channel.map_or(true, |c| m.channel == c))
        .map(|m| m.user)
        .collect()
}

/// Shuffle everyone in voice and deal them round-robin over `channels`
pub fn plan_shuffle<R: Rng + ?Sized>(
    members: &[VoiceMember],
    channels: &[Snowflake],
    rng: &mut R,
) -> Result<Vec<MemberMove>, PlanError> {
    if channels.is_empty() {
        return Err(PlanError::NoChannels);
    }
    let mut users = gather_members(members, None);
    if users.is_empty() {
        return Err(PlanError::NoMembers);
    }
    users.shuffle(rng);

    Ok(users
        .into_iter()
        .zip(channels.iter().cycle())
        .map(|(user, &channel)| MemberMove { user, channel })
        .collect())
}

/// Pull everyone not already in `target` into it, except the requester
pub fn plan_recall(
    members: &[VoiceMember],
    requester: Snowflake,
    target: Snowflake,
) -> Vec<MemberMove> {
    members
        .iter()
        .filter(|m| m.user != requester && m.channel != target)
        .map(|m| MemberMove {
            user: m.user,
            channel: target,
        })
        .collect()
}

/// Pick a random member of `from` and a random other voice channel
pub fn plan_shoot<R: Rng + ?Sized>(
    members: &[VoiceMember],
    channels: &[Snowflake],
    from: Snowflake,
    rng: &mut R,
) -> Result<MemberMove, PlanError> {
    let victims = gather_members(members, Some(from));
    let destinations: Vec<Snowflake> = channels.iter().copied().filter(|&c| c != from).collect();

    let &user = victims.choose(rng).ok_or(PlanError::NoMembers)?;
    let &channel = destinations.choose(rng).ok_or(PlanError::NoDestination)?;
    Ok(MemberMove { user, channel })
}
