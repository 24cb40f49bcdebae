//! Voice capture from a Discord call
//!
//! A single [`VoiceReceiver`] is attached to each joined call. It maps RTP
//! SSRCs to Discord users and fans decoded audio out over a broadcast
//! channel; every recording subscribes to that channel and keeps only the
//! frames of its own user.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use songbird::model::payload::{ClientDisconnect, Speaking};
use songbird::{Call, CoreEvent, Event, EventContext};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Sample rate of decoded Discord audio
pub const SAMPLE_RATE: u32 = 48_000;

/// Decoded Discord audio is interleaved stereo
pub const CHANNELS: u16 = 2;

/// Frames buffered per subscriber (20ms each)
const FRAME_BUFFER: usize = 512;

/// One 20ms slice of decoded audio from one user
#[derive(Debug, Clone)]
pub struct VoiceFrame {
    /// Discord user the audio belongs to
    pub user_id: u64,

    /// Interleaved signed 16-bit samples
    pub samples: Arc<[i16]>,
}

/// When a capture stops
#[derive(Debug, Clone, Copy)]
pub struct CaptureLimits {
    /// Silence after the last frame that ends the capture
    pub silence: Duration,

    /// Longest wait for the first frame
    pub idle_timeout: Duration,

    /// Longest recording, counted from the first frame
    pub max_duration: Duration,
}

/// Records one user's speech to a raw file
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Record `user_id` into `dest`, replacing any previous contents
    ///
    /// Returns the number of bytes written.
    async fn record(&self, user_id: u64, dest: &Path, cancel: &CancellationToken) -> Result<u64>;
}

/// Songbird event handler that publishes decoded voice per user
#[derive(Clone)]
pub struct VoiceReceiver {
    users: Arc<Mutex<HashMap<u32, u64>>>,
    frames: broadcast::Sender<VoiceFrame>,
}

impl Default for VoiceReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceReceiver {
    #[must_use]
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            users: Arc::new(Mutex::new(HashMap::new())),
            frames,
        }
    }

    /// Create a receiver and register it on `call`
    pub fn attach(call: &mut Call) -> Self {
        let receiver = Self::new();
        call.add_global_event(CoreEvent::SpeakingStateUpdate.into(), receiver.clone());
        call.add_global_event(CoreEvent::VoiceTick.into(), receiver.clone());
        call.add_global_event(CoreEvent::ClientDisconnect.into(), receiver.clone());
        tracing::debug!("voice receiver attached");
        receiver
    }

    /// Subscribe to frames published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceFrame> {
        self.frames.subscribe()
    }

    fn map_speaker(&self, speaking: &Speaking) {
        if let Some(user) = speaking.user_id {
            if let Ok(mut users) = self.users.lock() {
                users.insert(speaking.ssrc, user.0);
            }
        }
    }

    fn forget(&self, disconnect: &ClientDisconnect) {
        if let Ok(mut users) = self.users.lock() {
            users.retain(|_, user| *user != disconnect.user_id.0);
        }
    }

    fn publish<'a>(&self, speaking: impl Iterator<Item = (&'a u32, Option<&'a Vec<i16>>)>) {
        let Ok(users) = self.users.lock() else {
            return;
        };

        for (ssrc, decoded) in speaking {
            let (Some(user_id), Some(decoded)) = (users.get(ssrc), decoded) else {
                continue;
            };

            // No subscribers is fine: nobody is recording right now
            let _ = self.frames.send(VoiceFrame {
                user_id: *user_id,
                samples: Arc::from(decoded.as_slice()),
            });
        }
    }
}

#[async_trait]
impl songbird::EventHandler for VoiceReceiver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(speaking) => self.map_speaker(speaking),
            EventContext::VoiceTick(tick) => self.publish(
                tick.speaking
                    .iter()
                    .map(|(ssrc, data)| (ssrc, data.decoded_voice.as_ref())),
            ),
            EventContext::ClientDisconnect(disconnect) => self.forget(disconnect),
            _ => {}
        }
        None
    }
}

/// [`Recorder`] backed by a call's [`VoiceReceiver`]
pub struct SongbirdRecorder {
    receiver: VoiceReceiver,
    limits: CaptureLimits,
}

impl SongbirdRecorder {
    #[must_use]
    pub const fn new(receiver: VoiceReceiver, limits: CaptureLimits) -> Self {
        Self { receiver, limits }
    }
}

#[async_trait]
impl Recorder for SongbirdRecorder {
    async fn record(&self, user_id: u64, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
        let mut frames = self.receiver.subscribe();
        capture_frames(&mut frames, user_id, dest, self.limits, cancel).await
    }
}

/// Write `user_id`'s frames to `dest` until they go silent
///
/// The file is truncated first so each capture holds exactly the audio of
/// this turn. Frames from other users neither get written nor extend the
/// silence window. A user who never pauses is cut off after
/// `limits.max_duration`.
///
/// # Errors
///
/// * `Error::IdleTimeout` if no frame arrives within `limits.idle_timeout`
/// * `Error::Cancelled` if `cancel` fires
/// * `Error::Capture` if the file cannot be written or the receiver closes
///   before any audio arrived
pub async fn capture_frames(
    frames: &mut broadcast::Receiver<VoiceFrame>,
    user_id: u64,
    dest: &Path,
    limits: CaptureLimits,
    cancel: &CancellationToken,
) -> Result<u64> {
    let file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::Capture(format!("cannot create {}: {e}", dest.display())))?;
    let mut out = BufWriter::new(file);
    let mut written: u64 = 0;
    let mut deadline = Instant::now() + limits.idle_timeout;
    let mut cutoff: Option<Instant> = None;

    tracing::info!(user_id, path = %dest.display(), "listening");

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            next = tokio::time::timeout_at(deadline, frames.recv()) => next,
        };

        match next {
            Err(_) if written == 0 => return Err(Error::IdleTimeout(limits.idle_timeout)),
            Err(_) => {
                if cutoff.is_some_and(|c| Instant::now() >= c) {
                    tracing::info!(user_id, limit = ?limits.max_duration, "recording cut off");
                }
                break;
            }
            Ok(Ok(frame)) if frame.user_id == user_id => {
                let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
                for sample in frame.samples.iter() {
                    bytes.extend_from_slice(&sample.to_le_bytes());
                }
                out.write_all(&bytes)
                    .await
                    .map_err(|e| Error::Capture(format!("write failed: {e}")))?;
                written += bytes.len() as u64;
                let now = Instant::now();
                let cutoff = *cutoff.get_or_insert(now + limits.max_duration);
                deadline = (now + limits.silence).min(cutoff);
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(user_id, skipped, "capture fell behind, frames dropped");
            }
            Ok(Err(RecvError::Closed)) if written == 0 => {
                return Err(Error::Capture("voice receiver closed".to_string()));
            }
            Ok(Err(RecvError::Closed)) => break,
        }
    }

    out.flush()
        .await
        .map_err(|e| Error::Capture(format!("flush failed: {e}")))?;

    tracing::info!(user_id, bytes = written, "recorded");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> CaptureLimits {
        CaptureLimits {
            silence: Duration::from_millis(60),
            idle_timeout: Duration::from_millis(300),
            max_duration: Duration::from_secs(5),
        }
    }

    fn frame(user_id: u64, len: usize) -> VoiceFrame {
        VoiceFrame {
            user_id,
            samples: Arc::from(vec![7i16; len]),
        }
    }

    #[tokio::test]
    async fn records_only_the_target_user() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1.pcm");
        let (tx, mut rx) = broadcast::channel(16);

        tokio::spawn(async move {
            for _ in 0..3 {
                tx.send(frame(1, 960)).unwrap();
                tx.send(frame(2, 960)).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            // Keep the sender alive past the silence window
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let written = capture_frames(&mut rx, 1, &dest, limits(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 3 * 960 * 2);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), written);
    }

    #[tokio::test]
    async fn previous_recording_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1.pcm");
        std::fs::write(&dest, vec![1u8; 10_000]).unwrap();
        let (tx, mut rx) = broadcast::channel(16);

        tokio::spawn(async move {
            tx.send(frame(1, 10)).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        capture_frames(&mut rx, 1, &dest, limits(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn other_users_do_not_hold_the_capture_open() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1.pcm");
        let (tx, mut rx) = broadcast::channel(64);

        tokio::spawn(async move {
            tx.send(frame(1, 10)).unwrap();
            for _ in 0..40 {
                let _ = tx.send(frame(2, 10));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let started = std::time::Instant::now();
        capture_frames(&mut rx, 1, &dest, limits(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn endless_speech_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1.pcm");
        let (tx, mut rx) = broadcast::channel(64);

        tokio::spawn(async move {
            for _ in 0..200 {
                if tx.send(frame(1, 10)).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let limits = CaptureLimits {
            max_duration: Duration::from_millis(100),
            ..limits()
        };
        let started = std::time::Instant::now();
        let written = capture_frames(&mut rx, 1, &dest, limits, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(written > 0);
        assert!(written < 200 * 20);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), written);
    }

    #[tokio::test]
    async fn idle_timeout_without_speech() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, mut rx) = broadcast::channel::<VoiceFrame>(4);

        let err = capture_frames(
            &mut rx,
            1,
            &dir.path().join("1.pcm"),
            limits(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::IdleTimeout(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, mut rx) = broadcast::channel::<VoiceFrame>(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = capture_frames(&mut rx, 1, &dir.path().join("1.pcm"), limits(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn closed_receiver_before_audio_is_a_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel::<VoiceFrame>(4);
        drop(tx);

        let err = capture_frames(
            &mut rx,
            1,
            &dir.path().join("1.pcm"),
            limits(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Capture(_)));
    }
}
