//! Audio playback into a Discord call

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use songbird::Call;
use songbird::error::ControlError;
use songbird::input::File as FileInput;
use songbird::tracks::{PlayMode, ReadyState, Track, TrackHandle};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Longest wait for a track to become active
pub const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest wait for a track to finish; long enough to never matter in practice
pub const FINISH_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Plays audio files into a voice session
///
/// The session has a single output: callers must not overlap `play` calls.
/// Sessions sharing one call go through [`SerializedPlayer`].
#[async_trait]
pub trait Player: Send + Sync {
    /// Play `path` at `volume` (0.0 to 1.0) and wait until it has finished
    async fn play(&self, path: &Path, volume: f32, cancel: &CancellationToken) -> Result<()>;
}

/// Coarse state of a playing track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackStatus {
    /// Queued or loading
    Pending,
    /// Audible
    Playing,
    /// Ended or stopped
    Finished,
    /// Errored
    Failed(String),
}

/// Something that can report a track's status
#[async_trait]
pub trait TrackProbe: Send + Sync {
    async fn status(&self) -> TrackStatus;

    /// Stop the track early
    fn stop(&self);
}

/// Map songbird's track state to a [`TrackStatus`]
///
/// A fresh track reports `PlayMode::Play` while its input is still being
/// created, so it only counts as playing once it is also `Playable`.
#[must_use]
pub fn track_status(playing: &PlayMode, ready: ReadyState) -> TrackStatus {
    match (playing, ready) {
        (PlayMode::Play, ReadyState::Playable) => TrackStatus::Playing,
        (PlayMode::End | PlayMode::Stop, _) => TrackStatus::Finished,
        (PlayMode::Errored(e), _) => TrackStatus::Failed(format!("{e:?}")),
        _ => TrackStatus::Pending,
    }
}

#[async_trait]
impl TrackProbe for TrackHandle {
    async fn status(&self) -> TrackStatus {
        match self.get_info().await {
            Ok(state) => track_status(&state.playing, state.ready),
            Err(ControlError::Finished) => TrackStatus::Finished,
            Err(e) => TrackStatus::Failed(e.to_string()),
        }
    }

    fn stop(&self) {
        if let Err(e) = TrackHandle::stop(self) {
            tracing::debug!(error = %e, "track already gone");
        }
    }
}

/// Bounds for [`await_playback`]
#[derive(Debug, Clone, Copy)]
pub struct PlaybackLimits {
    /// Wait for the track to become active
    pub start: Duration,

    /// Wait for the track to finish once active
    pub finish: Duration,

    /// Status polling interval
    pub poll: Duration,
}

impl Default for PlaybackLimits {
    fn default() -> Self {
        Self {
            start: START_TIMEOUT,
            finish: FINISH_TIMEOUT,
            poll: Duration::from_millis(50),
        }
    }
}

/// Wait for a track to start, then to finish
///
/// # Errors
///
/// * `Error::PlaybackStart` if the track is not active within `limits.start`
///   or fails before becoming active
/// * `Error::Playback` if the track fails while playing
/// * `Error::PlaybackTimeout` if it does not finish within `limits.finish`
/// * `Error::Cancelled` if `cancel` fires; the track is stopped
pub async fn await_playback<P>(
    track: &P,
    limits: PlaybackLimits,
    cancel: &CancellationToken,
) -> Result<()>
where
    P: TrackProbe + ?Sized,
{
    let started = tokio::select! {
        () = cancel.cancelled() => {
            track.stop();
            return Err(Error::Cancelled);
        }
        status = tokio::time::timeout(
            limits.start,
            poll_until(track, limits.poll, |s| *s != TrackStatus::Pending),
        ) => status,
    };

    match started {
        Err(_) => {
            track.stop();
            return Err(Error::PlaybackStart(format!(
                "track not active within {:?}",
                limits.start
            )));
        }
        Ok(TrackStatus::Failed(e)) => return Err(Error::PlaybackStart(e)),
        Ok(TrackStatus::Finished) => return Ok(()),
        Ok(_) => {}
    }

    let finished = tokio::select! {
        () = cancel.cancelled() => {
            track.stop();
            return Err(Error::Cancelled);
        }
        status = tokio::time::timeout(
            limits.finish,
            poll_until(track, limits.poll, |s| {
                matches!(s, TrackStatus::Finished | TrackStatus::Failed(_))
            }),
        ) => status,
    };

    match finished {
        Err(_) => {
            track.stop();
            Err(Error::PlaybackTimeout(format!(
                "track still playing after {:?}",
                limits.finish
            )))
        }
        Ok(TrackStatus::Failed(e)) => Err(Error::Playback(e)),
        Ok(_) => Ok(()),
    }
}

async fn poll_until<P, F>(track: &P, interval: Duration, done: F) -> TrackStatus
where
    P: TrackProbe + ?Sized,
    F: Fn(&TrackStatus) -> bool,
{
    loop {
        let status = track.status().await;
        if done(&status) {
            return status;
        }
        tokio::time::sleep(interval).await;
    }
}

/// [`Player`] that plays files into a songbird call
pub struct SongbirdPlayer {
    call: Arc<Mutex<Call>>,
    limits: PlaybackLimits,
}

impl SongbirdPlayer {
    #[must_use]
    pub fn new(call: Arc<Mutex<Call>>) -> Self {
        Self {
            call,
            limits: PlaybackLimits::default(),
        }
    }
}

#[async_trait]
impl Player for SongbirdPlayer {
    async fn play(&self, path: &Path, volume: f32, cancel: &CancellationToken) -> Result<()> {
        if !path.exists() {
            return Err(Error::PlaybackStart(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let input = FileInput::new(path.to_path_buf());
        let track = Track::new(input.into()).volume(volume.clamp(0.0, 1.0));

        // play_only stops anything else on this call's output
        let handle = self.call.lock().await.play_only(track);

        tracing::debug!(path = %path.display(), volume, "playback started");
        await_playback(&handle, self.limits, cancel).await?;
        tracing::debug!(path = %path.display(), "playback finished");
        Ok(())
    }
}

/// [`Player`] that holds an output lock for the whole of each `play`
///
/// Every session in a guild shares the bot's one call, and songbird's
/// `play_only` drops whatever else is on it. Players built over the same
/// lock take turns instead of cutting each other off.
pub struct SerializedPlayer<P> {
    inner: P,
    output: Arc<Mutex<()>>,
}

impl<P: Player> SerializedPlayer<P> {
    #[must_use]
    pub const fn new(inner: P, output: Arc<Mutex<()>>) -> Self {
        Self { inner, output }
    }
}

#[async_trait]
impl<P: Player> Player for SerializedPlayer<P> {
    async fn play(&self, path: &Path, volume: f32, cancel: &CancellationToken) -> Result<()> {
        let _guard = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.output.lock() => guard,
        };

        self.inner.play(path, volume, cancel).await
    }
}
