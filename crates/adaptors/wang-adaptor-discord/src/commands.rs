//! Chat command parsing

/// Discord's per-message character limit
pub const MESSAGE_LIMIT: usize = 2000;

/// Command list shown by `!help`
pub const HELP_TEXT: &str = "**🎮 Wang Bot Command List:**\n\
```\n\
💡 !help        → Show this command list\n\
🎵 !play        → Play a sound (e.g. !play Heyooo.mp3)\n\
📺 !ytplay      → Play audio from a YouTube link\n\
🔌 !connect     → Connect the bot to your voice channel\n\
❌ !disconnect  → Disconnect the bot from the voice channel\n\
🧠 !ask         → Ask Wang anything (attach an image to ask about it)\n\
👀 !see         → Show Wang an image and let him react\n\
🎨 !create      → Generate an image from a prompt (optional reference image)\n\
🗣️ !say         → Make the bot speak using text-to-speech\n\
🔀 !shuffle     → Shuffle users in voice channels randomly\n\
🎰 !gamble      → Spin the slot machine (big risk, big reward)\n\
📞 !recall      → Summon the whole squad to your voice channel\n\
🛑 !kill        → Stop all current bot actions\n\
🔫 !shoot       → Wang Bot shoots a random user\n\
```";

/// A recognised chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!help`
    Help,
    /// `!connect`
    Connect,
    /// `!disconnect`
    Disconnect,
    /// `!play <sound>`
    Play(String),
    /// `!ytplay <url>`
    YtPlay(String),
    /// `!say <text>`
    Say(String),
    /// `!ask <prompt>`, with an optional image attachment
    Ask(String),
    /// `!see [prompt]` with an image attachment
    See(String),
    /// `!create <prompt>`, with an optional reference image
    Create(String),
    /// `!kill`
    Kill,
    /// `!shuffle`
    Shuffle,
    /// `!recall`
    Recall,
    /// `!shoot`
    Shoot,
    /// `!gamble`
    Gamble,
}

const ARG_COMMANDS: [(&str, fn(String) -> Command); 5] = [
    ("!play ", Command::Play),
    ("!ytplay ", Command::YtPlay),
    ("!say ", Command::Say),
    ("!ask ", Command::Ask),
    ("!create ", Command::Create),
];

// Checked in order; the first keyword found anywhere in the message wins
const KEYWORD_COMMANDS: [(&str, Command); 8] = [
    ("!help", Command::Help),
    ("!kill", Command::Kill),
    ("!shuffle", Command::Shuffle),
    ("!disconnect", Command::Disconnect),
    ("!connect", Command::Connect),
    ("!gamble", Command::Gamble),
    ("!recall", Command::Recall),
    ("!shoot", Command::Shoot),
];

impl Command {
    /// Parse a message.
    ///
    /// Commands taking an argument must start the message and need a
    /// non-empty argument, except `!see` whose prompt is optional. Bare
    /// commands match anywhere in the text.
    pub fn parse(content: &str) -> Option<Self> {
        let content = content.trim_start();

        if let Some(rest) = content.strip_prefix("!see") {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return Some(Command::See(rest.trim().to_string()));
            }
        }

        for (prefix, build) in ARG_COMMANDS {
            if let Some(rest) = content.strip_prefix(prefix) {
                let arg = rest.trim();
                return (!arg.is_empty()).then(|| build(arg.to_string()));
            }
        }

        KEYWORD_COMMANDS
            .iter()
            .find(|(keyword, _)| content.contains(keyword))
            .map(|(_, command)| command.clone())
    }

    /// Whether the command needs a guild context
    pub fn needs_guild(&self) -> bool {
        !matches!(self, Command::Help | Command::Gamble)
    }
}

/// Split `text` into pieces of at most `limit` characters
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`
pub fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}
