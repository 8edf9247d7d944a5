use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use wang_adaptor_discord::{build_client, songbird, DiscordConfig, SongbirdGateway, WangBot};
use wang_core::{
    init_logging, load_env, load_env_from_path, AudioPipeline, BotConfig, FfmpegDecoder,
    FfprobeProbe, OpusFrameEncoder, VoiceManager, YtDlpDownloader,
};
use wang_provider_gemini::GeminiProvider;
use wang_provider_voice::GoogleSpeechEngine;

#[derive(Parser, Debug)]
#[command(name = "run-bot", about = "Run the Wang Discord bot")]
struct Cli {
    #[arg(long, env = "WANG_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Load environment from this file instead of searching for `.env`
    #[arg(long)]
    env_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    rt.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    std::env::set_var("WANG_LOG_LEVEL", &cli.log_level);
    init_logging();

    match &cli.env_file {
        Some(path) => load_env_from_path(path)?,
        None => load_env()?,
    }
    let config = BotConfig::from_env().context("invalid bot configuration")?;
    info!(?config, "Configuration loaded");

    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .with_context(|| format!("cannot create media dir {}", config.media_dir.display()))?;

    let songbird = songbird();
    let gateway = Arc::new(SongbirdGateway::new(songbird.clone(), config.frame_buffer));
    let pipeline = AudioPipeline::new(
        Arc::new(FfprobeProbe::new(&config.ffprobe_path)),
        Arc::new(FfmpegDecoder::new(&config.ffmpeg_path)),
        Arc::new(OpusFrameEncoder::new()),
    );

    let mut manager = VoiceManager::new(gateway, pipeline, &config.media_dir)
        .with_waits(config.waits)
        .with_downloader(Arc::new(YtDlpDownloader::new(
            &config.ytdlp_path,
            &config.ffmpeg_path,
            &config.media_dir,
        )));
    if config.tts_api_key.is_some() {
        manager = manager.with_speech(Arc::new(GoogleSpeechEngine::from_config(&config)));
    } else {
        warn!("GOOGLE_TTS_API_KEY not set - !say and spoken replies are disabled");
    }
    let manager = Arc::new(manager);

    let mut bot = WangBot::new(manager.clone(), &config.sounds_dir)
        .with_connect_sound(config.connect_sound.clone());
    if config.gemini_api_key.is_some() {
        let gemini = Arc::new(GeminiProvider::from_config(&config));
        bot = bot.with_text(gemini.clone()).with_images(gemini);
    } else {
        warn!("GEMINI_API_KEY not set - !ask, !see and !create are disabled");
    }

    let discord = DiscordConfig::from_bot_config(&config);
    let mut client = build_client(&discord, Arc::new(bot), songbird).await?;
    let shards = client.shard_manager.clone();

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!(error = %e, "Discord client stopped");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown requested");
        }
    }

    let report = manager.kill_all().await;
    info!(?report, "Voice state torn down");
    shards.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term.as_mut() {
                    Some(s) => { s.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
