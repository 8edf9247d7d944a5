//! Discord adaptor for Wang Bot
//!
//! Serenity gateway events feed the command handlers; voice goes through
//! songbird via [`SongbirdGateway`].

#![warn(clippy::all)]

use serenity::async_trait as serenity_async_trait;
use serenity::cache::Settings as CacheSettings;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::guild::Guild;
use serenity::model::voice::VoiceState;
use serenity::prelude::*;
use songbird::serenity::SerenityInit;
use songbird::Songbird;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use wang_core::{BotConfig, Result, WangError};

pub mod commands;
pub mod games;
pub mod handlers;
pub mod members;
pub mod voice;

pub use commands::Command;
pub use handlers::WangBot;
pub use members::VoiceStates;
pub use voice::{SongbirdGateway, SongbirdTransport};

/// Gateway connection settings
#[derive(Clone)]
pub struct DiscordConfig {
    /// Bot token
    pub token: String,
    /// Gateway intents
    pub intents: GatewayIntents,
    /// Directory `!play` resolves sound names in
    pub sounds_dir: PathBuf,
    /// Sound played after `!connect`
    pub connect_sound: Option<String>,
    /// Frames buffered between the pipeline and the voice driver
    pub frame_buffer: usize,
}

impl DiscordConfig {
    /// Intents the bot needs: messages, their content and voice states
    pub fn default_intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILD_VOICE_STATES
    }

    /// Settings taken from the bot configuration
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            token: config.bot_token.clone(),
            intents: Self::default_intents(),
            sounds_dir: config.sounds_dir.clone(),
            connect_sound: config.connect_sound.clone(),
            frame_buffer: config.frame_buffer,
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("sounds_dir", &self.sounds_dir)
            .field("connect_sound", &self.connect_sound)
            .field("frame_buffer", &self.frame_buffer)
            .finish()
    }
}

struct Handler {
    bot: Arc<WangBot>,
}

#[serenity_async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        if msg.author.bot {
            return;
        }
        let Some(command) = Command::parse(&msg.content) else {
            return;
        };
        info!(
            author = %msg.author.name,
            guild_id = ?msg.guild_id.map(|g| g.get()),
            ?command,
            "Command received"
        );

        tokio::spawn(self.bot.clone().dispatch(ctx, msg, command));
    }

    /// Seed tracked voice states from the guild snapshot
    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let states = guild
            .voice_states
            .iter()
            .filter_map(|(user, vs)| vs.channel_id.map(|c| (user.get(), c.get())));
        let tracked = self.bot.voice_states().replace_guild(guild.id.get(), states);
        info!(
            guild_id = %guild.id,
            guild_name = %guild.name,
            tracked_users = tracked,
            "Voice states initialized from guild_create"
        );
    }

    async fn voice_state_update(&self, _ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let Some(guild) = new.guild_id else {
            return;
        };
        let channel = new.channel_id.map(|c| c.get());
        debug!(
            guild_id = %guild,
            user_id = %new.user_id,
            channel_id = ?channel,
            "Voice state update"
        );
        self.bot
            .voice_states()
            .update(guild.get(), new.user_id.get(), channel);
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            guilds_count = ready.guilds.len(),
            "Discord ready"
        );
    }
}

/// Create the songbird instance shared by the voice gateway and the client
pub fn songbird() -> Arc<Songbird> {
    Songbird::serenity()
}

/// Build the serenity client with songbird registered.
///
/// `songbird` must be the instance the bot's [`SongbirdGateway`] joins
/// through.
pub async fn build_client(
    config: &DiscordConfig,
    bot: Arc<WangBot>,
    songbird: Arc<Songbird>,
) -> Result<Client> {
    let mut cache_settings = CacheSettings::default();
    cache_settings.cache_guilds = true;
    cache_settings.cache_channels = true;
    cache_settings.cache_users = true;

    Client::builder(&config.token, config.intents)
        .event_handler(Handler { bot })
        .cache_settings(cache_settings)
        .register_songbird_with(songbird)
        .await
        .map_err(|e| WangError::other(format!("Failed to create Discord client: {e}")))
}
