//! Discord voice transport over songbird
//!
//! Encoded Opus frames from the core pipeline are fed to songbird as a live
//! DCA stream, so the driver passes the packets through without re-encoding.
//! The channel between the pipeline and the driver is bounded; a full
//! buffer back-pressures the pipeline to real time. The driver side never
//! waits on the pipeline: an empty buffer is read as a silent frame.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use songbird::id::{ChannelId as SongbirdChannelId, GuildId as SongbirdGuildId};
use songbird::input::{AudioStream, Input, LiveInput};
use songbird::tracks::TrackHandle;
use songbird::{Call, Songbird};
use std::fmt::Display;
use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroU64;
use std::sync::Arc;
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use wang_core::pipeline::frame::{CHANNELS, SAMPLES_PER_CHANNEL, SAMPLE_RATE};
use wang_core::{Result, TenantId, VoiceChannelId, VoiceGateway, VoiceTransport, WangError};

/// Joins voice channels through the songbird instance registered on the
/// serenity client
pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
    frame_buffer: usize,
}

impl SongbirdGateway {
    /// Gateway buffering up to `frame_buffer` frames per connection
    pub fn new(songbird: Arc<Songbird>, frame_buffer: usize) -> Self {
        Self {
            songbird,
            frame_buffer: frame_buffer.max(1),
        }
    }
}

/// One 20 ms Opus frame of silence
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

fn nonzero(id: u64, what: &str) -> Result<NonZeroU64> {
    NonZeroU64::new(id).ok_or_else(|| WangError::join_failure(format!("invalid {what} id 0")))
}

/// Await `join`; when it fails, run `leave` before reporting so no
/// half-initialised call stays registered for the guild
async fn join_or_leave<T, E, J, L, LF>(join: J, leave: L) -> Result<T>
where
    E: Display,
    J: Future<Output = std::result::Result<T, E>>,
    L: FnOnce() -> LF,
    LF: Future<Output = ()>,
{
    match join.await {
        Ok(joined) => Ok(joined),
        Err(e) => {
            let reason = e.to_string();
            leave().await;
            Err(WangError::join_failure(reason))
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(
        &self,
        tenant: TenantId,
        channel: VoiceChannelId,
    ) -> Result<Arc<dyn VoiceTransport>> {
        let guild = SongbirdGuildId::from(nonzero(tenant.get(), "guild")?);
        let target = SongbirdChannelId::from(nonzero(channel.get(), "channel")?);

        let call = join_or_leave(self.songbird.join(guild, target), move || async move {
            if let Err(e) = self.songbird.remove(guild).await {
                debug!(guild_id = %tenant, error = %e, "No call to clean up after failed join");
            }
        })
        .await?;
        info!(guild_id = %tenant, channel_id = %channel, "Joined voice channel");

        Ok(Arc::new(SongbirdTransport {
            songbird: self.songbird.clone(),
            guild,
            tenant,
            channel,
            call,
            frame_buffer: self.frame_buffer,
            sink: Mutex::new(None),
            track: Mutex::new(None),
        }))
    }
}

/// One guild's voice connection
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    guild: SongbirdGuildId,
    tenant: TenantId,
    channel: VoiceChannelId,
    call: Arc<tokio::sync::Mutex<Call>>,
    frame_buffer: usize,
    sink: Mutex<Option<mpsc::Sender<Bytes>>>,
    track: Mutex<Option<TrackHandle>>,
}

impl SongbirdTransport {
    /// Start a live track fed from a fresh frame channel
    async fn open_track(&self) {
        let (tx, rx) = mpsc::channel(self.frame_buffer);
        let mut hint = Hint::new();
        hint.with_extension("dca");
        let input = Input::Live(
            LiveInput::Raw(AudioStream {
                input: Box::new(DcaStream::new(rx)) as Box<dyn MediaSource>,
                hint: Some(hint),
            }),
            None,
        );

        let handle = self.call.lock().await.play_only_input(input);
        *self.sink.lock() = Some(tx);
        *self.track.lock() = Some(handle);
        debug!(guild_id = %self.tenant, "Voice track opened");
    }

    /// End the stream; frames already buffered still play out
    fn close_sink(&self) -> bool {
        self.sink.lock().take().is_some()
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    fn channel_id(&self) -> VoiceChannelId {
        self.channel
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .clone()
            .ok_or_else(|| WangError::transport("no open voice track"))?;
        sink.send(frame)
            .await
            .map_err(|_| WangError::transport("voice track closed"))
    }

    // Songbird drives the speaking flag itself while a track is producing
    // audio; here it only opens and closes the track.
    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        if speaking {
            self.open_track().await;
        } else if self.close_sink() {
            debug!(guild_id = %self.tenant, "Voice track closed");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.close_sink();
        if let Some(track) = self.track.lock().take() {
            let _ = track.stop();
        }
        if let Err(e) = self.songbird.remove(self.guild).await {
            warn!(guild_id = %self.tenant, error = %e, "Error leaving voice channel");
        }
        info!(guild_id = %self.tenant, "Left voice channel");
        Ok(())
    }
}

/// DCA1 header describing 20 ms stereo Opus at 48 kHz
fn dca_header() -> Vec<u8> {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": SAMPLES_PER_CHANNEL,
            "abr": null,
            "vbr": true,
            "channels": CHANNELS,
        },
        "info": null,
        "origin": null,
        "extra": null,
    })
    .to_string();

    let mut header = Vec::with_capacity(8 + metadata.len());
    header.extend_from_slice(b"DCA1");
    header.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    header.extend_from_slice(metadata.as_bytes());
    header
}

/// Reader turning a frame channel into a DCA byte stream.
///
/// Read on songbird's mixer thread, so it never blocks: a frame that has not
/// arrived yet is replaced by [`OPUS_SILENCE`]. End of stream is the sender
/// being dropped.
pub(crate) struct DcaStream {
    frames: mpsc::Receiver<Bytes>,
    pending: Vec<u8>,
    pos: usize,
}

impl DcaStream {
    pub(crate) fn new(frames: mpsc::Receiver<Bytes>) -> Self {
        Self {
            frames,
            pending: dca_header(),
            pos: 0,
        }
    }

    fn refill(&mut self) -> io::Result<bool> {
        let packet = match self.frames.try_recv() {
            Ok(packet) => packet,
            Err(TryRecvError::Empty) => Bytes::from_static(&OPUS_SILENCE),
            Err(TryRecvError::Disconnected) => return Ok(false),
        };
        let len = i16::try_from(packet.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "opus packet too large"))?;
        self.pending.clear();
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending.extend_from_slice(&packet);
        self.pos = 0;
        Ok(true)
    }
}

impl Read for DcaStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            if !self.refill()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for DcaStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live voice stream is not seekable",
        ))
    }
}

impl MediaSource for DcaStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
