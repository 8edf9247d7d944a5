//! Command handlers
//!
//! Each command runs on its own task. Failures end in exactly one chat
//! message; nothing here propagates errors back to the gateway loop.

use serenity::all::{
    Attachment, ChannelType, Context, CreateAttachment, CreateMessage, GuildId, Message,
};
use serenity::model::id::{ChannelId, UserId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wang_core::{
    resolve_sound, ImageBackend, OperationKind, Result, TenantId, TextBackend,
    VoiceChannelId, VoiceManager, WangError,
};

use crate::commands::{split_message, truncate_message, Command, HELP_TEXT, MESSAGE_LIMIT};
use crate::games::Spin;
use crate::members::{plan_recall, plan_shoot, plan_shuffle, MemberMove, VoiceMember, VoiceStates};

const PERSONA: &str = "You are a crazy schizophrenic, conspiracy believing, paranoid old chinese man \
named Wang, and you speak with a fuckton of curse words\n";

/// Wrap a question in the bot's persona
pub fn persona_prompt(question: &str) -> String {
    format!(
        "{PERSONA}Return a crazy response to this statement prompt:{{{question}}} with a statement \
you would say : (only the response : make sure your RESPONSE IS UNDER 3000 characters)\n"
    )
}

/// Prompt for a question about an attached image
pub fn vision_prompt(prompt: &str) -> String {
    format!("{PERSONA}{prompt}{{Keep your response under 3000 characters}}")
}

/// First attachment that looks like an image, with its MIME type
fn image_attachment(attachments: &[Attachment]) -> Option<(&Attachment, String)> {
    attachments.iter().find_map(|a| {
        image_mime(a.content_type.as_deref(), &a.filename).map(|mime| (a, mime))
    })
}

/// MIME type of an image attachment: the declared type, else a guess from the
/// file name
pub fn image_mime(content_type: Option<&str>, filename: &str) -> Option<String> {
    if let Some(declared) = content_type.filter(|t| t.starts_with("image/")) {
        return Some(declared.split(';').next().unwrap_or(declared).trim().to_string());
    }
    let extension = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Shared state behind every command
pub struct WangBot {
    manager: Arc<VoiceManager>,
    text: Option<Arc<dyn TextBackend>>,
    images: Option<Arc<dyn ImageBackend>>,
    voice_states: VoiceStates,
    sounds_dir: PathBuf,
    connect_sound: Option<String>,
}

impl WangBot {
    /// Bot playing sounds from `sounds_dir`
    pub fn new(manager: Arc<VoiceManager>, sounds_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            text: None,
            images: None,
            voice_states: VoiceStates::new(),
            sounds_dir: sounds_dir.into(),
            connect_sound: None,
        }
    }

    /// Enable `!ask` and `!see`
    pub fn with_text(mut self, text: Arc<dyn TextBackend>) -> Self {
        self.text = Some(text);
        self
    }

    /// Enable `!create`
    pub fn with_images(mut self, images: Arc<dyn ImageBackend>) -> Self {
        self.images = Some(images);
        self
    }

    /// Sound played after `!connect`
    pub fn with_connect_sound(mut self, sound: Option<String>) -> Self {
        self.connect_sound = sound;
        self
    }

    /// Voice core
    pub fn manager(&self) -> &Arc<VoiceManager> {
        &self.manager
    }

    /// Tracked voice states
    pub fn voice_states(&self) -> &VoiceStates {
        &self.voice_states
    }

    /// Run one parsed command to completion
    pub async fn dispatch(self: Arc<Self>, ctx: Context, msg: Message, command: Command) {
        let guild = match (msg.guild_id, command.needs_guild()) {
            (Some(guild), _) => Some(guild),
            (None, false) => None,
            (None, true) => {
                reply(&ctx, msg.channel_id, "This command only works in a guild.").await;
                return;
            }
        };
        debug!(?command, guild_id = ?guild.map(|g| g.get()), "Dispatching command");

        match (command, guild) {
            (Command::Help, _) => reply(&ctx, msg.channel_id, HELP_TEXT).await,
            (Command::Gamble, guild) => self.gamble(&ctx, &msg, guild).await,
            (_, None) => {}
            (Command::Connect, Some(guild)) => self.connect(&ctx, &msg, guild).await,
            (Command::Disconnect, Some(guild)) => self.disconnect(&ctx, &msg, guild).await,
            (Command::Play(name), Some(guild)) => self.play(&ctx, &msg, guild, &name).await,
            (Command::YtPlay(url), Some(guild)) => self.ytplay(&ctx, &msg, guild, &url).await,
            (Command::Say(text), Some(guild)) => self.say(&ctx, &msg, guild, &text).await,
            (Command::Ask(question), Some(guild)) => match image_attachment(&msg.attachments) {
                Some((image, mime)) => self.see(&ctx, &msg, guild, &question, image, &mime).await,
                None => self.ask(&ctx, &msg, guild, &question).await,
            },
            (Command::See(prompt), Some(guild)) => match image_attachment(&msg.attachments) {
                Some((image, mime)) => self.see(&ctx, &msg, guild, &prompt, image, &mime).await,
                None => reply(&ctx, msg.channel_id, "❌ Attach an image for me to look at.").await,
            },
            (Command::Create(prompt), Some(guild)) => self.create(&ctx, &msg, guild, &prompt).await,
            (Command::Kill, Some(guild)) => self.kill(&ctx, &msg, guild).await,
            (Command::Shuffle, Some(guild)) => self.shuffle(&ctx, &msg, guild).await,
            (Command::Recall, Some(guild)) => self.recall(&ctx, &msg, guild).await,
            (Command::Shoot, Some(guild)) => self.shoot(&ctx, &msg, guild).await,
        }
    }

    /// Voice channel `user` is in: tracked state first, serenity cache second
    fn requester_channel(&self, ctx: &Context, guild: GuildId, user: UserId) -> Option<u64> {
        self.voice_states.channel_of(guild.get(), user.get()).or_else(|| {
            ctx.cache.guild(guild).and_then(|g| {
                g.voice_states
                    .get(&user)
                    .and_then(|vs| vs.channel_id)
                    .map(|c| c.get())
            })
        })
    }

    /// Join (or stay in) the requester's channel
    async fn ensure_connected(&self, ctx: &Context, msg: &Message, guild: GuildId) -> bool {
        let Some(channel) = self.requester_channel(ctx, guild, msg.author.id) else {
            reply(ctx, msg.channel_id, "User is not connected to a voice channel.").await;
            return false;
        };
        match self
            .manager
            .connect(TenantId(guild.get()), VoiceChannelId(channel))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Voice connect failed");
                reply(ctx, msg.channel_id, e.user_message()).await;
                false
            }
        }
    }

    /// Users in voice in `guild`, minus the bot itself
    fn voice_members(&self, ctx: &Context, guild: GuildId) -> Vec<VoiceMember> {
        let bot_id = ctx.cache.current_user().id.get();
        let mut members = self.voice_states.members(guild.get());
        members.retain(|m| m.user != bot_id);
        members
    }

    async fn connect(&self, ctx: &Context, msg: &Message, guild: GuildId) {
        if !self.ensure_connected(ctx, msg, guild).await {
            return;
        }
        reply(ctx, msg.channel_id, "✅ Connected to Voice Channel").await;

        if let Some(sound) = &self.connect_sound {
            self.play_sound(ctx, msg, guild, sound).await;
        }
    }

    async fn disconnect(&self, ctx: &Context, msg: &Message, guild: GuildId) {
        let text = if self.manager.disconnect(TenantId(guild.get())).await {
            "Good Bye 👋"
        } else {
            "I'm not connected to a voice channel in this guild."
        };
        reply(ctx, msg.channel_id, text).await;
    }

    async fn play(&self, ctx: &Context, msg: &Message, guild: GuildId, name: &str) {
        if self.ensure_connected(ctx, msg, guild).await {
            self.play_sound(ctx, msg, guild, name).await;
        }
    }

    async fn play_sound(&self, ctx: &Context, msg: &Message, guild: GuildId, name: &str) {
        let result = match resolve_sound(&self.sounds_dir, name) {
            Ok(path) => self.manager.play(TenantId(guild.get()), &path).await,
            Err(e) => Err(e),
        };
        report(ctx, msg, guild, "play", result).await;
    }

    async fn ytplay(&self, ctx: &Context, msg: &Message, guild: GuildId, url: &str) {
        if !self.ensure_connected(ctx, msg, guild).await {
            return;
        }
        reply(ctx, msg.channel_id, "⬇️ Downloading YouTube audio...").await;
        let result = self.manager.play_url(TenantId(guild.get()), url).await;
        report(ctx, msg, guild, "ytplay", result).await;
    }

    async fn say(&self, ctx: &Context, msg: &Message, guild: GuildId, text: &str) {
        if !self.manager.has_speech() {
            reply(ctx, msg.channel_id, "❌ Text-to-speech is not configured.").await;
            return;
        }
        if !self.ensure_connected(ctx, msg, guild).await {
            return;
        }
        let result = self.manager.speak(TenantId(guild.get()), text).await;
        report(ctx, msg, guild, "say", result).await;
    }

    async fn ask(&self, ctx: &Context, msg: &Message, guild: GuildId, question: &str) {
        let Some(text) = self.text.clone() else {
            reply(ctx, msg.channel_id, "❌ Gemini is not configured.").await;
            return;
        };
        reply(ctx, msg.channel_id, "🤖 Thinking...").await;

        let prompt = persona_prompt(question);
        let answer = self
            .manager
            .operations()
            .run(TenantId(guild.get()), OperationKind::Completion, |cancel| async move {
                text.complete(&prompt, cancel).await
            })
            .await;

        let answer = match answer {
            Ok(answer) => answer,
            Err(e) if e.is_cancelled() => {
                reply(ctx, msg.channel_id, "❌ Gemini operation cancelled.").await;
                return;
            }
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Gemini request failed");
                reply(ctx, msg.channel_id, format!("❌ Failed to get response from Gemini: {e}")).await;
                return;
            }
        };

        for chunk in split_message(&answer, MESSAGE_LIMIT) {
            reply(ctx, msg.channel_id, chunk).await;
        }
        if self.manager.has_speech() {
            self.say(ctx, msg, guild, &answer).await;
        }
    }

    async fn see(
        &self,
        ctx: &Context,
        msg: &Message,
        guild: GuildId,
        prompt: &str,
        attachment: &Attachment,
        mime: &str,
    ) {
        let Some(text) = self.text.clone() else {
            reply(ctx, msg.channel_id, "❌ Gemini is not configured.").await;
            return;
        };
        reply(ctx, msg.channel_id, "🤖 Thinking...").await;

        let prompt = vision_prompt(prompt);
        let answer = self
            .manager
            .with_image_attachment(
                TenantId(guild.get()),
                &attachment.url,
                mime,
                OperationKind::Vision,
                |image, cancel| async move { text.complete_with_image(&prompt, &image, cancel).await },
            )
            .await;

        let answer = match answer {
            Ok(answer) => answer,
            Err(e) if e.is_cancelled() => {
                reply(ctx, msg.channel_id, "❌ Gemini operation cancelled.").await;
                return;
            }
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Gemini image request failed");
                reply(ctx, msg.channel_id, format!("❌ Gemini image processing failed: {e}")).await;
                return;
            }
        };

        let answer = truncate_message(&answer, MESSAGE_LIMIT);
        reply(ctx, msg.channel_id, answer.as_str()).await;
        if self.manager.has_speech() {
            self.say(ctx, msg, guild, &answer).await;
        }
    }

    async fn create(&self, ctx: &Context, msg: &Message, guild: GuildId, prompt: &str) {
        let Some(images) = self.images.clone() else {
            reply(ctx, msg.channel_id, "❌ Image generation is not configured.").await;
            return;
        };
        reply(ctx, msg.channel_id, format!("🎨 Generating image for prompt: *{prompt}*...")).await;

        let tenant = TenantId(guild.get());
        let generated = match image_attachment(&msg.attachments) {
            Some((reference, mime)) => {
                self.manager
                    .with_image_attachment(
                        tenant,
                        &reference.url,
                        &mime,
                        OperationKind::ImageGeneration,
                        |image, cancel| async move {
                            images.generate_image(prompt, Some(image), cancel).await
                        },
                    )
                    .await
            }
            None => {
                self.manager
                    .operations()
                    .run(tenant, OperationKind::ImageGeneration, |cancel| async move {
                        images.generate_image(prompt, None, cancel).await
                    })
                    .await
            }
        };

        let result = match generated {
            Ok(image) => {
                info!(guild_id = %guild, mime = %image.mime_type, bytes = image.data.len(), "Image generated");
                self.manager
                    .with_generated_image(tenant, &image, |path| upload(ctx, msg.channel_id, path))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                reply(ctx, msg.channel_id, "❌ Image generation cancelled.").await;
            }
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Image generation failed");
                reply(ctx, msg.channel_id, format!("❌ Failed to generate image: {e}")).await;
            }
        }
    }

    async fn kill(&self, ctx: &Context, msg: &Message, guild: GuildId) {
        self.manager.kill_guild(TenantId(guild.get())).await;
        reply(ctx, msg.channel_id, "🛑 Killed all active operations for this server.").await;
    }

    async fn gamble(&self, ctx: &Context, msg: &Message, guild: Option<GuildId>) {
        let spin = Spin::roll(&mut rand::thread_rng());
        info!(win = spin.is_win(), reels = %spin.render(), "Slot machine spun");

        reply(ctx, msg.channel_id, format!("{}\n", spin.verdict())).await;
        reply(ctx, msg.channel_id, spin.render()).await;

        if let Some(guild) = guild {
            if self.manager.has_speech() {
                self.say(ctx, msg, guild, spin.verdict()).await;
            }
        }
    }

    async fn shuffle(&self, ctx: &Context, msg: &Message, guild: GuildId) {
        let channels = match voice_channels(ctx, guild).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Failed to list guild channels");
                reply(ctx, msg.channel_id, "❌ Failed to get guild channels.").await;
                return;
            }
        };
        let members = self.voice_members(ctx, guild);
        let plan = plan_shuffle(&members, &channels, &mut rand::thread_rng());

        match plan {
            Ok(moves) => {
                move_members(ctx, guild, &moves).await;
                reply(ctx, msg.channel_id, "🔀 Shuffled users into random voice channels.").await;
            }
            Err(e) => reply(ctx, msg.channel_id, e.to_string()).await,
        }
    }

    async fn recall(&self, ctx: &Context, msg: &Message, guild: GuildId) {
        let Some(target) = self.requester_channel(ctx, guild, msg.author.id) else {
            reply(ctx, msg.channel_id, "❌ You must be in a voice channel to use this command.").await;
            return;
        };
        let moves = plan_recall(&self.voice_members(ctx, guild), msg.author.id.get(), target);
        let moved = move_members(ctx, guild, &moves).await;
        reply(
            ctx,
            msg.channel_id,
            format!("📢 Moved {moved} user(s) to your voice channel."),
        )
        .await;
    }

    async fn shoot(&self, ctx: &Context, msg: &Message, guild: GuildId) {
        let Some(from) = self.requester_channel(ctx, guild, msg.author.id) else {
            reply(ctx, msg.channel_id, "❌ You must be in a voice channel to use this command.").await;
            return;
        };
        let channels = match voice_channels(ctx, guild).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Failed to list guild channels");
                reply(ctx, msg.channel_id, "❌ Failed to get guild channels.").await;
                return;
            }
        };
        let members = self.voice_members(ctx, guild);
        let plan = plan_shoot(&members, &channels, from, &mut rand::thread_rng());

        let shot = match plan {
            Ok(shot) => shot,
            Err(e) => {
                reply(ctx, msg.channel_id, e.to_string()).await;
                return;
            }
        };
        if move_members(ctx, guild, &[shot]).await == 1 {
            reply(ctx, msg.channel_id, format!("<@{}> 🔫 Has Been Shot", shot.user)).await;
        } else {
            reply(ctx, msg.channel_id, "❌ Failed to move the user.").await;
        }
    }
}

/// Send a message, logging rather than failing
async fn reply(ctx: &Context, channel: ChannelId, text: impl Into<String>) {
    if let Err(e) = channel.say(&ctx.http, text.into()).await {
        warn!(channel_id = %channel, error = %e, "Failed to send message");
    }
}

/// Send a file from disk as a message attachment
async fn upload(ctx: &Context, channel: ChannelId, path: PathBuf) -> Result<()> {
    let file = CreateAttachment::path(&path)
        .await
        .map_err(|e| WangError::transport(format!("cannot attach {}: {e}", path.display())))?;
    channel
        .send_message(ctx, CreateMessage::new().add_file(file))
        .await
        .map_err(|e| WangError::transport(format!("image upload failed: {e}")))?;
    Ok(())
}

/// Report a playback outcome: silent on success, one message on failure
async fn report(ctx: &Context, msg: &Message, guild: GuildId, what: &str, result: Result<usize>) {
    match result {
        Ok(frames) => debug!(guild_id = %guild, command = what, frames, "Playback finished"),
        Err(e) => {
            if e.is_cancelled() {
                debug!(guild_id = %guild, command = what, "Playback cancelled");
            } else {
                warn!(guild_id = %guild, command = what, error = %e, "Playback failed");
            }
            reply(ctx, msg.channel_id, e.user_message()).await;
        }
    }
}

/// Voice channel ids of `guild` in sidebar order
async fn voice_channels(ctx: &Context, guild: GuildId) -> serenity::Result<Vec<u64>> {
    let mut channels: Vec<_> = guild
        .channels(&ctx.http)
        .await?
        .into_values()
        .filter(|c| c.kind == ChannelType::Voice)
        .map(|c| (c.position, c.id.get()))
        .collect();
    channels.sort_unstable();
    Ok(channels.into_iter().map(|(_, id)| id).collect())
}

/// Apply moves, returning how many succeeded
async fn move_members(ctx: &Context, guild: GuildId, moves: &[MemberMove]) -> usize {
    let mut moved = 0;
    for m in moves {
        match guild
            .move_member(&ctx.http, UserId::new(m.user), ChannelId::new(m.channel))
            .await
        {
            Ok(_) => moved += 1,
            Err(e) => warn!(guild_id = %guild, user_id = m.user, error = %e, "Failed to move user"),
        }
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_prompt_embeds_question() {
        let prompt = persona_prompt("who built the pyramids");
        assert!(prompt.starts_with(PERSONA));
        assert!(prompt.contains("{who built the pyramids}"));
    }

    #[test]
    fn test_vision_prompt_keeps_length_hint() {
        let prompt = vision_prompt("what is on this plate");
        assert!(prompt.starts_with(PERSONA));
        assert!(prompt.contains("what is on this plate"));
        assert!(prompt.ends_with("{Keep your response under 3000 characters}"));
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime(Some("image/png"), "x.bin").as_deref(), Some("image/png"));
        assert_eq!(
            image_mime(Some("image/jpeg; charset=binary"), "x").as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(image_mime(None, "Cat.JPG").as_deref(), Some("image/jpeg"));
        assert_eq!(image_mime(Some("video/mp4"), "clip.mp4"), None);
        assert_eq!(image_mime(None, "notes.txt"), None);
        assert_eq!(image_mime(None, "noextension"), None);
    }
}
