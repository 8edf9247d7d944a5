//! End-to-end voice scenarios for the core
//!
//! A fake gateway stands in for Discord and paces frames like a real-time
//! sink. Decoding runs through a real subprocess: each "media file" is a
//! small shell script whose stdout is the PCM stream, so kill and cleanup
//! behavior is exercised against live processes.

#![cfg(unix)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use wang_core::*;

const FRAME_PERIOD: Duration = Duration::from_millis(20);

/// Upper bound from kill to the stream returning, with scheduling slack
const KILL_LATENCY: Duration = Duration::from_millis(150);

struct PacedTransport {
    channel: VoiceChannelId,
    frames: AtomicUsize,
    speaking: AtomicBool,
    /// Stop accepting frames once this many were taken
    stall_after: Option<usize>,
}

#[async_trait]
impl VoiceTransport for PacedTransport {
    fn channel_id(&self) -> VoiceChannelId {
        self.channel
    }

    async fn send_frame(&self, _frame: Bytes) -> Result<()> {
        if self
            .stall_after
            .is_some_and(|limit| self.frames.load(Ordering::SeqCst) >= limit)
        {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(FRAME_PERIOD).await;
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.speaking.store(speaking, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeGateway {
    transports: Mutex<Vec<Arc<PacedTransport>>>,
    stall_after: Option<usize>,
}

impl FakeGateway {
    fn frames_sent(&self) -> usize {
        self.transports
            .lock()
            .iter()
            .map(|t| t.frames.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn join(
        &self,
        _tenant: TenantId,
        channel: VoiceChannelId,
    ) -> Result<Arc<dyn VoiceTransport>> {
        let transport = Arc::new(PacedTransport {
            channel,
            frames: AtomicUsize::new(0),
            speaking: AtomicBool::new(false),
            stall_after: self.stall_after,
        });
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

struct AcceptingProbe;

#[async_trait]
impl MediaProbe for AcceptingProbe {
    async fn probe(&self, _path: &Path) -> Result<Duration> {
        Ok(Duration::from_secs(1))
    }
}

struct StubEncoder;

impl FrameEncoder for StubEncoder {
    fn encode(&self, _frame: &PcmFrame) -> Result<Bytes> {
        Ok(Bytes::from_static(b"opus"))
    }
}

/// Runs the media file itself as a shell script
#[derive(Default)]
struct ScriptDecoder {
    pids: Mutex<Vec<u32>>,
}

#[async_trait]
impl FrameSourceFactory for ScriptDecoder {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let mut cmd = Command::new("sh");
        cmd.arg(path);
        let source = ProcessFrameSource::spawn(cmd)?;
        if let Some(pid) = source.id() {
            self.pids.lock().push(pid);
        }
        Ok(Box::new(source))
    }
}

struct SilentSpeech;

#[async_trait]
impl SpeechBackend for SilentSpeech {
    async fn synthesize(&self, _text: &str, _cancel: CancellationToken) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

struct Harness {
    manager: Arc<VoiceManager>,
    gateway: Arc<FakeGateway>,
    decoder: Arc<ScriptDecoder>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_gateway(FakeGateway::default())
    }

    /// Harness whose sink blocks after `frames` frames
    fn stalling(frames: usize) -> Self {
        Self::with_gateway(FakeGateway {
            stall_after: Some(frames),
            ..Default::default()
        })
    }

    fn with_gateway(gateway: FakeGateway) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(gateway);
        let decoder = Arc::new(ScriptDecoder::default());
        let pipeline = AudioPipeline::new(
            Arc::new(AcceptingProbe),
            decoder.clone(),
            Arc::new(StubEncoder),
        );
        let manager = VoiceManager::new(gateway.clone(), pipeline, dir.path().join("media"))
            .with_speech(Arc::new(SilentSpeech))
            .with_temp_files(TempFileTracker::with_policy(ReadinessPolicy {
                interval: Duration::from_millis(10),
                stable_polls: 3,
            }))
            .with_waits(ReadinessWaits {
                play: Duration::from_secs(2),
                speech: Duration::from_millis(300),
                download: Duration::from_secs(2),
            });

        Self {
            manager: Arc::new(manager),
            gateway,
            decoder,
            dir,
        }
    }

    /// A media file that decodes to exactly `frames` frames
    fn finite_file(&self, name: &str, frames: usize) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("head -c {} /dev/zero\n", frames * 3840)).unwrap();
        path
    }

    /// A media file that never stops decoding
    fn endless_file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, "exec yes\n").unwrap();
        path
    }
}

async fn wait_for_playing(session: &VoiceSession) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while session.playback_state() != PlaybackState::Playing {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("playback never started");
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Scenario A: playing without a session reports NotConnected
#[tokio::test]
async fn test_play_without_session_is_not_connected() {
    let h = Harness::new();
    let file = h.finite_file("a.mp3", 5);

    let err = h.manager.play(TenantId(1), &file).await.unwrap_err();

    assert!(matches!(err, WangError::NotConnected(TenantId(1))));
    assert!(h.decoder.pids.lock().is_empty());
}

/// Scenario B: a second play while streaming is rejected and the first
/// stream completes untouched
#[tokio::test]
async fn test_second_play_is_busy_and_first_completes() {
    let h = Harness::new();
    let tenant = TenantId(1);
    let session = h.manager.connect(tenant, VoiceChannelId(10)).await.unwrap();
    let file_a = h.finite_file("a.mp3", 15);
    let file_b = h.finite_file("b.mp3", 15);

    let first = {
        let manager = h.manager.clone();
        let file_a = file_a.clone();
        tokio::spawn(async move { manager.play(tenant, &file_a).await })
    };
    wait_for_playing(&session).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = h.manager.play(tenant, &file_b).await.unwrap_err();
    assert!(matches!(err, WangError::Busy(TenantId(1))));

    let frames = first.await.unwrap().unwrap();
    assert_eq!(frames, 15);
    assert_eq!(h.gateway.frames_sent(), 15);
    assert_eq!(session.playback_state(), PlaybackState::Idle);
    assert!(file_a.exists(), "local sounds are never deleted");
}

/// Scenario C: kill mid-stream cancels the pipeline, reaps the decoder and
/// removes the session
#[tokio::test]
async fn test_kill_mid_stream() {
    let h = Harness::new();
    let tenant = TenantId(2);
    let session = h.manager.connect(tenant, VoiceChannelId(20)).await.unwrap();
    let file = h.endless_file("endless.mp3");

    let playing = {
        let manager = h.manager.clone();
        let file = file.clone();
        tokio::spawn(async move { manager.play(tenant, &file).await })
    };
    wait_for_playing(&session).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = h.manager.kill_guild(tenant).await;
    assert_eq!(report.sessions, 1);

    let err = tokio::time::timeout(Duration::from_secs(1), playing)
        .await
        .expect("pipeline ignored kill")
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(session.playback_state(), PlaybackState::Idle);
    assert!(h.manager.sessions().get(tenant).is_none());

    let pids = h.decoder.pids.lock().clone();
    assert_eq!(pids.len(), 1);
    #[cfg(target_os = "linux")]
    assert!(!process_alive(pids[0]), "decoder still running");
}

/// A kill reaches a stream parked on a backlogged sink within about a
/// frame, and nothing is sent afterwards
#[tokio::test]
async fn test_kill_unblocks_backlogged_sink() {
    let h = Harness::stalling(5);
    let tenant = TenantId(5);
    let session = h.manager.connect(tenant, VoiceChannelId(50)).await.unwrap();
    let file = h.endless_file("endless.mp3");

    let playing = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.play(tenant, &file).await })
    };
    wait_for_playing(&session).await;
    tokio::time::timeout(Duration::from_secs(3), async {
        while h.gateway.frames_sent() < 5 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("sink never filled");
    // Let the pipeline park inside send_frame
    tokio::time::sleep(FRAME_PERIOD * 3).await;

    let killed_at = Instant::now();
    let kill = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.kill_guild(tenant).await })
    };
    let err = tokio::time::timeout(Duration::from_secs(1), playing)
        .await
        .expect("pipeline stayed blocked on the sink")
        .unwrap()
        .unwrap_err();
    let latency = killed_at.elapsed();

    assert!(err.is_cancelled());
    assert!(latency < KILL_LATENCY, "stream took {latency:?} to stop");
    assert_eq!(kill.await.unwrap().sessions, 1);

    tokio::time::sleep(FRAME_PERIOD * 5).await;
    assert_eq!(h.gateway.frames_sent(), 5, "frames sent after cancel");
    assert_eq!(session.playback_state(), PlaybackState::Idle);
}

/// Scenario D: an empty synthesis result never becomes ready, is deleted,
/// and is never decoded
#[tokio::test]
async fn test_empty_speech_times_out_and_is_deleted() {
    let h = Harness::new();
    let tenant = TenantId(3);
    h.manager.connect(tenant, VoiceChannelId(30)).await.unwrap();

    let err = h.manager.speak(tenant, "hello").await.unwrap_err();

    assert!(matches!(err, WangError::FileNotReady { .. }));
    assert_eq!(h.manager.temp_files().total(), 0);
    assert!(h.manager.operations().is_empty());
    assert!(h.decoder.pids.lock().is_empty());
    assert_eq!(h.gateway.frames_sent(), 0);
    let leftovers = std::fs::read_dir(h.dir.path().join("media")).unwrap().count();
    assert_eq!(leftovers, 0);
}

/// Concurrent play requests for one guild: exactly one wins
#[tokio::test]
async fn test_concurrent_streams_one_winner() {
    let h = Harness::new();
    let session = h.manager.connect(TenantId(4), VoiceChannelId(40)).await.unwrap();
    let file = h.finite_file("race.mp3", 50);
    let pipeline = Arc::new(AudioPipeline::new(
        Arc::new(AcceptingProbe),
        h.decoder.clone(),
        Arc::new(StubEncoder),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        let session = session.clone();
        let file = file.clone();
        handles.push(tokio::spawn(async move { pipeline.stream(&session, &file).await }));
    }

    let mut ok = 0;
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(WangError::Busy(_)) => busy += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(busy, 7);
    assert_eq!(session.playback_state(), PlaybackState::Idle);
}

/// Shutdown empties every registry regardless of how many guilds had state
#[tokio::test]
async fn test_kill_all_empties_everything() {
    let h = Harness::new();
    let media = h.dir.path().join("media");
    std::fs::create_dir_all(&media).unwrap();

    for id in 1..=3u64 {
        let tenant = TenantId(id);
        h.manager.connect(tenant, VoiceChannelId(id * 100)).await.unwrap();
        let generated = media.join(format!("tts_{id}.mp3"));
        std::fs::write(&generated, b"audio").unwrap();
        h.manager.temp_files().track(tenant, &generated);
        let _ = h
            .manager
            .operations()
            .begin(OperationId::new(OperationKind::Speech, tenant));
    }

    let session = h.manager.sessions().get(TenantId(1)).unwrap();
    let file = h.endless_file("endless.mp3");
    let playing = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.play(TenantId(1), &file).await })
    };
    wait_for_playing(&session).await;

    let report = h.manager.kill_all().await;

    assert_eq!(report.sessions, 3);
    assert_eq!(report.operations, 3);
    assert_eq!(report.files, 3);
    assert!(h.manager.sessions().is_empty());
    assert!(h.manager.operations().is_empty());
    assert_eq!(h.manager.temp_files().total(), 0);
    assert_eq!(std::fs::read_dir(&media).unwrap().count(), 0);

    let err = playing.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}
