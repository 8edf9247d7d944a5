//! Voice control surface used by command handlers
//!
//! [`VoiceManager`] owns the session, operation and temp-file registries
//! together with the audio pipeline, and sequences them for each kind of
//! playback: local sounds, synthesized speech and downloads. Image
//! attachments and generated images go through the same temp-file tracking
//! so `!kill` reclaims them too.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backends::{ImageData, SpeechBackend};
use crate::config::ReadinessWaits;
use crate::media::fetch::{fetch_to_file, MAX_ATTACHMENT_BYTES};
use crate::media::MediaDownloader;
use crate::operations::{OperationKind, OperationRegistry};
use crate::pipeline::AudioPipeline;
use crate::session::{PlaybackState, SessionRegistry, VoiceSession};
use crate::tempfiles::TempFileTracker;
use crate::transport::VoiceGateway;
use crate::types::{TenantId, VoiceChannelId};
use crate::{Result, WangError};

/// What a kill tore down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillReport {
    /// Operations cancelled
    pub operations: usize,
    /// Sessions removed
    pub sessions: usize,
    /// Temp files deleted
    pub files: usize,
}

/// Per-guild voice state and playback
pub struct VoiceManager {
    sessions: SessionRegistry,
    operations: Arc<OperationRegistry>,
    temp_files: TempFileTracker,
    pipeline: AudioPipeline,
    speech: Option<Arc<dyn SpeechBackend>>,
    downloader: Option<Arc<dyn MediaDownloader>>,
    media_dir: PathBuf,
    waits: ReadinessWaits,
}

impl VoiceManager {
    /// Manager joining through `gateway` and writing generated media to `media_dir`
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        pipeline: AudioPipeline,
        media_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(gateway),
            operations: Arc::new(OperationRegistry::new()),
            temp_files: TempFileTracker::new(),
            pipeline,
            speech: None,
            downloader: None,
            media_dir: media_dir.into(),
            waits: ReadinessWaits::default(),
        }
    }

    /// Enable `speak`
    pub fn with_speech(mut self, speech: Arc<dyn SpeechBackend>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Enable `play_url`
    pub fn with_downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Override readiness limits
    pub fn with_waits(mut self, waits: ReadinessWaits) -> Self {
        self.waits = waits;
        self
    }

    /// Swap in a tracker with a different readiness policy
    pub fn with_temp_files(mut self, temp_files: TempFileTracker) -> Self {
        self.temp_files = temp_files;
        self
    }

    /// Session registry
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Operation registry
    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    /// Temp-file tracker
    pub fn temp_files(&self) -> &TempFileTracker {
        &self.temp_files
    }

    /// Whether speech synthesis is configured
    pub fn has_speech(&self) -> bool {
        self.speech.is_some()
    }

    /// Join `channel`, reusing the session if the bot is already there.
    ///
    /// A session in a different channel of the same guild is torn down first.
    pub async fn connect(
        &self,
        tenant: TenantId,
        channel: VoiceChannelId,
    ) -> Result<Arc<VoiceSession>> {
        if let Some(session) = self.sessions.get(tenant) {
            if self.sessions.is_same_channel(tenant, channel) {
                return Ok(session);
            }
            info!(guild_id = %tenant, from = %session.channel_id(), to = %channel, "Moving voice session");
            self.sessions.remove(tenant).await;
        }
        self.sessions.get_or_create(tenant, channel).await
    }

    /// Leave the guild's voice channel. Returns false when not connected.
    pub async fn disconnect(&self, tenant: TenantId) -> bool {
        self.sessions.remove(tenant).await
    }

    fn ready_session(&self, tenant: TenantId) -> Result<Arc<VoiceSession>> {
        let session = self
            .sessions
            .get(tenant)
            .ok_or(WangError::NotConnected(tenant))?;
        if session.playback_state() == PlaybackState::Playing {
            return Err(WangError::Busy(tenant));
        }
        Ok(session)
    }

    async fn await_ready(
        &self,
        session: &VoiceSession,
        path: &Path,
        max_wait: Duration,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => Err(WangError::Cancelled),
            ready = self.temp_files.await_readiness(path, max_wait) => ready,
        }
    }

    /// Play a file the bot does not own (e.g. from the sounds directory).
    /// The file is never deleted.
    pub async fn play(&self, tenant: TenantId, path: &Path) -> Result<usize> {
        let session = self.ready_session(tenant)?;
        self.await_ready(&session, path, self.waits.play).await?;
        self.pipeline.stream(&session, path).await
    }

    /// Play a generated file and delete it afterwards, whatever the outcome.
    ///
    /// The file is tracked for `tenant` first so a concurrent kill can
    /// reclaim it; a file that never becomes ready is deleted without
    /// playback being attempted.
    pub async fn play_generated(
        &self,
        tenant: TenantId,
        path: &Path,
        max_wait: Duration,
    ) -> Result<usize> {
        self.temp_files.track(tenant, path);
        let result = async {
            let session = self.ready_session(tenant)?;
            self.await_ready(&session, path, max_wait).await?;
            self.pipeline.stream(&session, path).await
        }
        .await;
        self.temp_files.release_one(tenant, path).await;
        result
    }

    /// Synthesize `text` and play it
    pub async fn speak(&self, tenant: TenantId, text: &str) -> Result<usize> {
        let speech = self
            .speech
            .clone()
            .ok_or_else(|| WangError::config("speech synthesis is not configured"))?;
        self.ready_session(tenant)?;

        let path = self.media_path("tts", "mp3");
        self.temp_files.track(tenant, &path);

        let text = text.to_string();
        let target = path.clone();
        let synthesized = self
            .operations
            .run(tenant, OperationKind::Speech, move |cancel| async move {
                speech.synthesize_to_file(&text, &target, cancel).await
            })
            .await;
        if let Err(e) = synthesized {
            self.temp_files.release_one(tenant, &path).await;
            return Err(e);
        }

        self.play_generated(tenant, &path, self.waits.speech).await
    }

    /// Download `url` and play it
    pub async fn play_url(&self, tenant: TenantId, url: &str) -> Result<usize> {
        let downloader = self
            .downloader
            .clone()
            .ok_or_else(|| WangError::config("media download is not configured"))?;
        self.ready_session(tenant)?;

        let url = url.to_string();
        let path = self
            .operations
            .run(tenant, OperationKind::Download, move |cancel| async move {
                downloader.download(&url, cancel).await
            })
            .await?;

        self.play_generated(tenant, &path, self.waits.download).await
    }

    fn media_path(&self, prefix: &str, extension: &str) -> PathBuf {
        self.media_dir.join(format!(
            "{prefix}_{}.{extension}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Download an image attachment and run `work` on it under a `kind`
    /// operation scope.
    ///
    /// The downloaded file is tracked for `tenant` and deleted once `work`
    /// returns, fails or is killed.
    pub async fn with_image_attachment<T, F, Fut>(
        &self,
        tenant: TenantId,
        url: &str,
        mime_type: &str,
        kind: OperationKind,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(ImageData, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let extension = ImageData::new(mime_type, Vec::new()).extension();
        let path = self.media_path("attachment", extension);
        self.temp_files.track(tenant, &path);

        let target = path.as_path();
        let result = self
            .operations
            .run(tenant, kind, move |cancel| async move {
                let bytes = fetch_to_file(url, target, MAX_ATTACHMENT_BYTES, &cancel).await?;
                debug!(guild_id = %tenant, bytes, "Image attachment staged");
                let data = tokio::fs::read(target).await?;
                work(ImageData::new(mime_type, data), cancel).await
            })
            .await;

        if !self.temp_files.release_one(tenant, &path).await {
            // Already released by a kill; a write in flight may have recreated it
            let _ = tokio::fs::remove_file(&path).await;
        }
        result
    }

    /// Write a generated image to the media directory, hand its path to
    /// `deliver`, then delete it whatever `deliver` returns
    pub async fn with_generated_image<T, F, Fut>(
        &self,
        tenant: TenantId,
        image: &ImageData,
        deliver: F,
    ) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = self.media_path("generated", image.extension());
        self.temp_files.track(tenant, &path);

        let result = async {
            tokio::fs::create_dir_all(&self.media_dir).await?;
            tokio::fs::write(&path, &image.data).await?;
            deliver(path.clone()).await
        }
        .await;

        self.temp_files.release_one(tenant, &path).await;
        result
    }

    /// `!kill`: cancel the guild's operations, drop its session and delete
    /// its generated files
    pub async fn kill_guild(&self, tenant: TenantId) -> KillReport {
        let operations = self.operations.kill_tenant(tenant);
        let sessions = usize::from(self.sessions.remove(tenant).await);
        let files = self.temp_files.release_all(tenant).await;
        let report = KillReport {
            operations,
            sessions,
            files,
        };
        info!(guild_id = %tenant, ?report, "Killed guild operations");
        report
    }

    /// Process shutdown: tear down every guild
    pub async fn kill_all(&self) -> KillReport {
        let operations = self.operations.kill_all();
        let sessions = self.sessions.remove_all().await;
        let files = self.temp_files.release_everything().await;
        let report = KillReport {
            operations,
            sessions,
            files,
        };
        info!(?report, "Killed all operations");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockSpeechBackend;
    use crate::media::download::MockMediaDownloader;
    use crate::media::probe::MockMediaProbe;
    use crate::pipeline::encoder::MockFrameEncoder;
    use crate::pipeline::{FrameSource, FrameSourceFactory, PcmFrame};
    use crate::session::tests::RecordingTransport;
    use crate::transport::{MockVoiceGateway, VoiceTransport};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct SilenceFactory;

    struct Silence(usize);

    #[async_trait]
    impl FrameSource for Silence {
        async fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(PcmFrame::silence()))
        }

        async fn terminate(&mut self) {}
    }

    #[async_trait]
    impl FrameSourceFactory for SilenceFactory {
        async fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(Silence(3)))
        }
    }

    fn manager(media_dir: &Path) -> VoiceManager {
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().returning(|_, channel| {
            let transport: Arc<dyn VoiceTransport> = Arc::new(RecordingTransport {
                channel: channel.get(),
                ..Default::default()
            });
            Ok(transport)
        });
        let mut probe = MockMediaProbe::new();
        probe
            .expect_probe()
            .returning(|_| Ok(Duration::from_secs(1)));
        let mut encoder = MockFrameEncoder::new();
        encoder
            .expect_encode()
            .returning(|_| Ok(Bytes::from_static(b"opus")));

        let pipeline = AudioPipeline::new(
            Arc::new(probe),
            Arc::new(SilenceFactory),
            Arc::new(encoder),
        );
        VoiceManager::new(Arc::new(gateway), pipeline, media_dir).with_temp_files(
            TempFileTracker::with_policy(crate::tempfiles::ReadinessPolicy {
                interval: Duration::from_millis(10),
                stable_polls: 2,
            }),
        )
    }

    #[tokio::test]
    async fn test_connect_same_channel_reuses_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let first = manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();
        let again = manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let moved = manager.connect(TenantId(1), VoiceChannelId(6)).await.unwrap();
        assert!(first.is_cancelled());
        assert_eq!(moved.channel_id(), VoiceChannelId(6));
        assert_eq!(manager.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_play_requires_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let err = manager
            .play(TenantId(9), Path::new("sounds/Heyooo.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, WangError::NotConnected(TenantId(9))));
    }

    #[tokio::test]
    async fn test_play_keeps_static_file() {
        let dir = tempfile::tempdir().unwrap();
        let sound = dir.path().join("Heyooo.mp3");
        std::fs::write(&sound, vec![1u8; 256]).unwrap();
        let manager = manager(dir.path());
        manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();

        assert_eq!(manager.play(TenantId(1), &sound).await.unwrap(), 3);
        assert!(sound.exists());
    }

    #[tokio::test]
    async fn test_speak_plays_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut speech = MockSpeechBackend::new();
        speech
            .expect_synthesize_to_file()
            .withf(|text, _, _| text == "Hello WANG")
            .returning(|_, path, _| {
                std::fs::write(path, vec![7u8; 128])?;
                Ok(())
            });
        let manager = manager(dir.path()).with_speech(Arc::new(speech));
        manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();

        let frames = manager.speak(TenantId(1), "Hello WANG").await.unwrap();

        assert_eq!(frames, 3);
        assert_eq!(manager.temp_files().total(), 0);
        assert!(manager.operations().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_speak_without_backend() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let err = manager.speak(TenantId(1), "hi").await.unwrap_err();
        assert!(matches!(err, WangError::Config(_)));
    }

    #[tokio::test]
    async fn test_failed_synthesis_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut speech = MockSpeechBackend::new();
        speech
            .expect_synthesize_to_file()
            .returning(|_, _, _| Err(WangError::upstream("quota exceeded")));
        let manager = manager(dir.path()).with_speech(Arc::new(speech));
        manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();

        let err = manager.speak(TenantId(1), "hi").await.unwrap_err();
        assert!(matches!(err, WangError::Upstream(_)));
        assert_eq!(manager.temp_files().total(), 0);
        assert!(manager.operations().is_empty());
    }

    #[tokio::test]
    async fn test_play_url_plays_download_and_deletes_it() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("yt_audio_1_abcd1234.mp3");
        let written = target.clone();
        let mut downloader = MockMediaDownloader::new();
        downloader
            .expect_download()
            .withf(|url, _| url == "https://youtu.be/x")
            .returning(move |_, _| {
                std::fs::write(&written, vec![3u8; 512])?;
                Ok(written.clone())
            });
        let manager = manager(dir.path()).with_downloader(Arc::new(downloader));
        manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();

        let frames = manager
            .play_url(TenantId(1), "https://youtu.be/x")
            .await
            .unwrap();

        assert_eq!(frames, 3);
        assert!(!target.exists());
        assert_eq!(manager.temp_files().total(), 0);
        assert!(manager.operations().is_empty());
    }

    #[tokio::test]
    async fn test_play_url_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut downloader = MockMediaDownloader::new();
        downloader
            .expect_download()
            .returning(|_, _| Err(WangError::subprocess("yt-dlp", "exit status: 1", "ERROR")));
        let manager = manager(dir.path()).with_downloader(Arc::new(downloader));
        manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();

        let err = manager.play_url(TenantId(1), "bad").await.unwrap_err();

        assert!(matches!(err, WangError::Subprocess { ref program, .. } if program == "yt-dlp"));
        assert!(manager.operations().is_empty());
        assert_eq!(manager.temp_files().total(), 0);
    }

    #[tokio::test]
    async fn test_kill_guild_report() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.connect(TenantId(1), VoiceChannelId(5)).await.unwrap();
        let generated = dir.path().join("tts_1.mp3");
        std::fs::write(&generated, b"x").unwrap();
        manager.temp_files().track(TenantId(1), &generated);
        let _token = manager.operations().begin(crate::operations::OperationId::new(
            OperationKind::Completion,
            TenantId(1),
        ));

        let report = manager.kill_guild(TenantId(1)).await;
        assert_eq!(
            report,
            KillReport {
                operations: 1,
                sessions: 1,
                files: 1
            }
        );
        assert!(!generated.exists());
        assert_eq!(manager.kill_guild(TenantId(1)).await, KillReport::default());
    }

    fn media_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_image_attachment_is_tracked_then_released() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media);
        let (base, server) = crate::testing::serve_once("200 OK", "PNGDATA").await;

        let seen = &manager;
        let data = manager
            .with_image_attachment(
                TenantId(1),
                &format!("{base}/cat.png"),
                "image/png",
                OperationKind::Vision,
                move |image, _cancel| async move {
                    let tracked = seen.temp_files().tracked(TenantId(1));
                    assert_eq!(tracked.len(), 1);
                    assert!(tracked[0].exists());
                    assert_eq!(tracked[0].extension().and_then(|e| e.to_str()), Some("png"));
                    assert_eq!(seen.operations().len(), 1);
                    Ok(image)
                },
            )
            .await
            .unwrap();

        assert_eq!(data, ImageData::new("image/png", b"PNGDATA".to_vec()));
        assert_eq!(manager.temp_files().total(), 0);
        assert!(manager.operations().is_empty());
        assert_eq!(media_files(&media), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_image_attachment_failure_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let (base, server) = crate::testing::serve_once("403 Forbidden", "{}").await;

        let err = manager
            .with_image_attachment(
                TenantId(1),
                &base,
                "image/jpeg",
                OperationKind::Vision,
                |_image, _cancel| async { Ok(()) },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WangError::Upstream(_)));
        assert_eq!(manager.temp_files().total(), 0);
        assert!(manager.operations().is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_reclaims_image_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = Arc::new(manager(&media));
        let (base, _server) = crate::testing::serve_once("200 OK", "GIF89a").await;

        let asking = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_image_attachment(
                        TenantId(2),
                        &base,
                        "image/gif",
                        OperationKind::Vision,
                        |_image, cancel| async move {
                            cancel.cancelled().await;
                            Ok(())
                        },
                    )
                    .await
            })
        };
        tokio::time::timeout(Duration::from_secs(3), async {
            while manager.operations().is_empty() || media_files(&media) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("attachment never staged");

        let report = manager.kill_guild(TenantId(2)).await;
        assert_eq!(report.operations, 1);

        let err = asking.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(manager.temp_files().total(), 0);
        assert_eq!(media_files(&media), 0);
    }

    #[tokio::test]
    async fn test_generated_image_deleted_after_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let manager = manager(&media);
        let image = ImageData::new("image/png", b"\x89PNG".to_vec());

        let delivered = manager
            .with_generated_image(TenantId(3), &image, |path| async move {
                assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG");
                Ok(path)
            })
            .await
            .unwrap();

        assert!(delivered.starts_with(&media));
        assert!(!delivered.exists());
        assert_eq!(manager.temp_files().total(), 0);

        let err = manager
            .with_generated_image(TenantId(3), &image, |_path| async {
                Err::<(), _>(WangError::other("upload rejected"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WangError::Other(_)));
        assert_eq!(media_files(&media), 0);
    }
}
