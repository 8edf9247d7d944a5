//! Configuration management and environment variable loading

use crate::{Result, WangError};
use std::env;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Load environment variables from a .env file
///
/// Looks in the current directory and its parents. A missing file is not an
/// error; a malformed one is.
///
/// # Example
///
/// ```no_run
/// use wang_core::load_env;
///
/// load_env().ok();
/// let token = std::env::var("BOT_TOKEN").unwrap_or_default();
/// ```
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("✓ Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(WangError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::warn!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(WangError::config(format!("Failed to load .env file: {}", e))),
    }
}

/// Load environment variables from a specific file
pub fn load_env_from_path<P: AsRef<Path>>(path: P) -> Result<()> {
    match dotenvy::from_path(path.as_ref()) {
        Ok(_) => {
            tracing::info!("✓ Loaded environment from: {}", path.as_ref().display());
            Ok(())
        }
        Err(e) => Err(WangError::config(format!(
            "Failed to load {} environment file: {}",
            path.as_ref().display(),
            e
        ))),
    }
}

/// Environment view used while building [`BotConfig`]. Blank values count
/// as unset.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| {
            WangError::config(format!(
                "Required environment variable '{}' is not set. \
                 Check your .env file or system environment.",
                key
            ))
        })
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn path_or(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.or(key, default))
    }

    /// Parsed value; unparsable input falls back to `default` with a warning
    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
                default
            }),
            None => default,
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parsed(key, default.as_secs()))
    }
}

/// Upper bounds for readiness polling, by producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessWaits {
    /// Local sound files
    pub play: Duration,
    /// Freshly synthesized speech
    pub speech: Duration,
    /// Downloaded (and possibly transcoded) media
    pub download: Duration,
}

impl Default for ReadinessWaits {
    fn default() -> Self {
        Self {
            play: Duration::from_secs(15),
            speech: Duration::from_secs(10),
            download: Duration::from_secs(5),
        }
    }
}

/// Everything the bot reads from its environment
#[derive(Clone)]
pub struct BotConfig {
    /// Discord bot token
    pub bot_token: String,
    /// Gemini API key; `!ask` is disabled without it
    pub gemini_api_key: Option<String>,
    /// Gemini model name
    pub gemini_model: String,
    /// Gemini model used by `!create`
    pub gemini_image_model: String,
    /// Google Cloud Text-to-Speech API key; speech is disabled without it
    pub tts_api_key: Option<String>,
    /// BCP-47 language code of the synthesis voice
    pub tts_language_code: String,
    /// Synthesis voice name
    pub tts_voice_name: String,
    /// Synthesis voice gender
    pub tts_gender: String,
    /// Directory `!play` resolves sound names in
    pub sounds_dir: PathBuf,
    /// Directory generated speech and downloads are written to
    pub media_dir: PathBuf,
    /// Sound played after `!connect`
    pub connect_sound: Option<String>,
    /// ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// ffprobe binary
    pub ffprobe_path: PathBuf,
    /// yt-dlp binary
    pub ytdlp_path: PathBuf,
    /// Transport sink capacity in 20 ms frames
    pub frame_buffer: usize,
    /// Readiness polling limits
    pub waits: ReadinessWaits,
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("bot_token", &"<redacted>")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_model", &self.gemini_model)
            .field("gemini_image_model", &self.gemini_image_model)
            .field("tts_api_key", &self.tts_api_key.as_ref().map(|_| "<redacted>"))
            .field("tts_voice_name", &self.tts_voice_name)
            .field("sounds_dir", &self.sounds_dir)
            .field("media_dir", &self.media_dir)
            .field("frame_buffer", &self.frame_buffer)
            .field("waits", &self.waits)
            .finish()
    }
}

impl BotConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = ReadinessWaits::default();

        Ok(Self {
            bot_token: vars.required("BOT_TOKEN")?,
            gemini_api_key: vars.get("GEMINI_API_KEY"),
            gemini_model: vars.or("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_image_model: vars.or(
                "GEMINI_IMAGE_MODEL",
                "gemini-2.0-flash-preview-image-generation",
            ),
            tts_api_key: vars.get("GOOGLE_TTS_API_KEY"),
            tts_language_code: vars.or("TTS_LANGUAGE_CODE", "cmn-CN"),
            tts_voice_name: vars.or("TTS_VOICE_NAME", "cmn-CN-Chirp3-HD-Achird"),
            tts_gender: vars.or("TTS_GENDER", "MALE"),
            sounds_dir: vars.path_or("WANG_SOUNDS_DIR", "sounds"),
            media_dir: vars
                .get("WANG_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("wang-bot")),
            connect_sound: vars.get("WANG_CONNECT_SOUND"),
            ffmpeg_path: vars.path_or("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: vars.path_or("FFPROBE_PATH", "ffprobe"),
            ytdlp_path: vars.path_or("YTDLP_PATH", "yt-dlp"),
            frame_buffer: vars.parsed("WANG_FRAME_BUFFER", 10usize).max(1),
            waits: ReadinessWaits {
                play: vars.secs("WANG_PLAY_WAIT_SECS", defaults.play),
                speech: vars.secs("WANG_SPEECH_WAIT_SECS", defaults.speech),
                download: vars.secs("WANG_DOWNLOAD_WAIT_SECS", defaults.download),
            },
        })
    }
}

/// Resolve a user-supplied sound name to a file directly inside `dir`.
///
/// Names carrying directories, parent references or absolute paths are
/// rejected. A name without an extension gets `.mp3`.
pub fn resolve_sound(dir: &Path, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    let invalid = || WangError::other(format!("Invalid sound name '{}'", name));
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(invalid()),
    }

    let file = if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{name}.mp3")
    };
    Ok(dir.join(file))
}
