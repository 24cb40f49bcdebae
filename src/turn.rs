//! Turn orchestration
//!
//! One turn is record → encode → transcribe → generate → synthesize → play,
//! followed by a pacing pause and a notification tone. Steps run strictly in
//! order; the first failing step ends the turn and nothing after it runs.
//! The raw recording is deleted after every turn, successful or not.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channels::{Channel, DISCORD_MESSAGE_LIMIT, OutgoingMessage, split_message};
use crate::config::Config;
use crate::conversation::ConversationBuffer;
use crate::llm::ReplyGenerator;
use crate::session::Session;
use crate::voice::{Encoder, Player, Recorder, Synthesizer, Transcriber};
use crate::{Error, Result};

/// Where a session's turn loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    Idle,
    Capturing,
    Encoding,
    Transcribing,
    Generating,
    Synthesizing,
    Playing,
    Pacing,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Encoding => "encoding",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Playing => "playing",
            Self::Pacing => "pacing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Pause after playback, proportional to reply length in characters
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pacing_delay(reply: &str, secs_per_char: f64) -> Duration {
    let chars = reply.chars().count() as f64;
    Duration::from_secs_f64((secs_per_char * chars).max(0.0))
}

/// What a completed turn produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub transcript: String,
    pub reply: String,
    pub pacing: Duration,
}

/// How a session's loop ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Stopped from outside (stop command, user left, shutdown)
    Cancelled,
    /// The user never started speaking
    Idle,
    /// A stage failed
    Failed(Error),
}

/// The collaborators a turn calls, one per stage
#[derive(Clone)]
pub struct Stages {
    pub recorder: Arc<dyn Recorder>,
    pub encoder: Arc<dyn Encoder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub replies: ReplyGenerator,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub player: Arc<dyn Player>,
    pub channel: Arc<dyn Channel>,
}

/// Timing and audio settings for the loop
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub history_capacity: usize,
    pub pacing_secs_per_char: f64,
    pub reply_volume: f32,
    pub tone_path: PathBuf,
    pub tone_volume: f32,
    pub settle: Duration,
    pub notify_failures: bool,
}

impl TurnSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_capacity: config.voice.history_capacity,
            pacing_secs_per_char: config.voice.pacing_secs_per_char,
            reply_volume: 1.0,
            tone_path: config.voice.tone_path.clone(),
            tone_volume: config.voice.tone_volume,
            settle: config.voice.settle,
            notify_failures: config.notify_failures,
        }
    }
}

/// Runs the conversational loop for one session
pub struct TurnOrchestrator {
    session: Session,
    stages: Stages,
    settings: TurnSettings,
    buffer: ConversationBuffer,
    state: TurnState,
    cancel: CancellationToken,
}

impl TurnOrchestrator {
    #[must_use]
    pub fn new(
        session: Session,
        stages: Stages,
        settings: TurnSettings,
        cancel: CancellationToken,
    ) -> Self {
        let buffer = ConversationBuffer::new(settings.history_capacity);
        Self {
            session,
            stages,
            settings,
            buffer,
            state: TurnState::Idle,
            cancel,
        }
    }

    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    #[must_use]
    pub const fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Run turns until one fails or the session is cancelled
    pub async fn run(mut self) -> SessionOutcome {
        tracing::info!(user_id = self.session.user_id, "session started");

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break SessionOutcome::Cancelled;
            }

            match self.run_turn().await {
                Ok(report) => {
                    tracing::debug!(
                        user_id = self.session.user_id,
                        pacing_ms = report.pacing.as_millis(),
                        "turn complete"
                    );
                }
                Err(Error::Cancelled) => break SessionOutcome::Cancelled,
                Err(Error::IdleTimeout(_)) => break SessionOutcome::Idle,
                Err(e) => break SessionOutcome::Failed(e),
            }
        };

        if let SessionOutcome::Failed(e) = &outcome {
            if self.settings.notify_failures {
                let notice = format!(
                    "I lost track of our conversation ({e}). Say the word to start again."
                );
                self.post(&notice).await;
            }
        }

        tracing::info!(user_id = self.session.user_id, outcome = ?outcome, "session ended");
        outcome
    }

    /// Run a single turn
    ///
    /// The raw recording is removed afterwards whatever the result, and the
    /// orchestrator can run another turn after a failure.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that failed
    pub async fn run_turn(&mut self) -> Result<TurnReport> {
        let result = self.turn_steps().await;

        match &result {
            Ok(_) => self.enter(TurnState::Idle),
            Err(e) if e.is_quiet_exit() => self.enter(TurnState::Idle),
            Err(e) => {
                tracing::error!(
                    user_id = self.session.user_id,
                    stage = %e.stage().map_or_else(|| self.state.to_string(), |s| s.to_string()),
                    error = %e,
                    "turn failed"
                );
                self.enter(TurnState::Failed);
            }
        }

        self.remove_recording().await;
        result
    }

    async fn turn_steps(&mut self) -> Result<TurnReport> {
        let user_id = self.session.user_id;
        let raw = self.session.raw_path();
        let encoded = self.session.encoded_path();
        let answer = self.session.answer_path();

        self.enter(TurnState::Capturing);
        self.stages
            .recorder
            .record(user_id, &raw, &self.cancel)
            .await?;

        self.enter(TurnState::Encoding);
        self.stages.encoder.encode(&raw, &encoded).await?;

        self.enter(TurnState::Transcribing);
        let transcript = self.stages.transcriber.transcribe(&encoded).await?;

        self.enter(TurnState::Generating);
        let reply = self
            .stages
            .replies
            .generate(&mut self.buffer, &transcript)
            .await?;
        tracing::info!(user_id, transcript = %transcript, reply = %reply, "reply generated");

        self.enter(TurnState::Synthesizing);
        self.stages.synthesizer.synthesize(&reply, &answer).await?;

        self.enter(TurnState::Playing);
        self.stages
            .player
            .play(&answer, self.settings.reply_volume, &self.cancel)
            .await?;

        self.post(&reply).await;

        self.enter(TurnState::Pacing);
        let pacing = pacing_delay(&reply, self.settings.pacing_secs_per_char);
        tracing::debug!(user_id, delay_ms = pacing.as_millis(), "pacing");
        self.pause(pacing).await?;

        match self
            .stages
            .player
            .play(&self.settings.tone_path, self.settings.tone_volume, &self.cancel)
            .await
        {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => tracing::warn!(user_id, error = %e, "notification tone failed"),
        }

        self.pause(self.settings.settle).await?;

        Ok(TurnReport {
            transcript,
            reply,
            pacing,
        })
    }

    fn enter(&mut self, state: TurnState) {
        tracing::debug!(
            user_id = self.session.user_id,
            from = %self.state,
            to = %state,
            "turn state"
        );
        self.state = state;
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Post text to the session's text channel; failures only warn
    async fn post(&self, content: &str) {
        let channel_id = self.session.text_channel_id.to_string();
        for chunk in split_message(content, DISCORD_MESSAGE_LIMIT) {
            let message = OutgoingMessage::text(channel_id.clone(), chunk);
            if let Err(e) = self.stages.channel.send(message).await {
                tracing::warn!(
                    channel = self.stages.channel.name(),
                    channel_id = %channel_id,
                    error = %e,
                    "failed to post message"
                );
                return;
            }
        }
    }

    /// Best-effort removal of this turn's raw capture
    async fn remove_recording(&self) {
        let raw = self.session.raw_path();
        match tokio::fs::remove_file(&raw).await {
            Ok(()) => tracing::debug!(path = %raw.display(), "recording removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %raw.display(), error = %e, "failed to remove recording");
            }
        }
    }
}
