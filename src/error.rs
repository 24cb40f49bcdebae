//! Error types for the Yui voice companion

use thiserror::Error;

use crate::turn::TurnState;

/// Result type alias for Yui operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Recording the user's voice failed
    #[error("capture error: {0}")]
    Capture(String),

    /// Transcoding the raw recording failed
    #[error("encode error: {0}")]
    Encode(String),

    /// Speech-to-text error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Chat completion error
    #[error("completion error: {0}")]
    Completion(String),

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Playback never became active
    #[error("playback did not start: {0}")]
    PlaybackStart(String),

    /// Track failed while playing
    #[error("playback failed: {0}")]
    Playback(String),

    /// Playback never returned to idle
    #[error("playback timed out: {0}")]
    PlaybackTimeout(String),

    /// No speech arrived before the idle timeout
    #[error("no speech within {0:?}")]
    IdleTimeout(std::time::Duration),

    /// The session was cancelled
    #[error("session cancelled")]
    Cancelled,

    /// Channel error
    #[error("channel error: {0}")]
    Channel(String),
}

impl Error {
    /// Turn stage this error is attributed to, if any
    #[must_use]
    pub const fn stage(&self) -> Option<TurnState> {
        match self {
            Self::Capture(_) | Self::IdleTimeout(_) => Some(TurnState::Capturing),
            Self::Encode(_) => Some(TurnState::Encoding),
            Self::Transcription(_) => Some(TurnState::Transcribing),
            Self::Completion(_) => Some(TurnState::Generating),
            Self::Synthesis(_) => Some(TurnState::Synthesizing),
            Self::PlaybackStart(_) | Self::Playback(_) | Self::PlaybackTimeout(_) => {
                Some(TurnState::Playing)
            }
            _ => None,
        }
    }

    /// Whether this error ends a session without being a failure
    #[must_use]
    pub const fn is_quiet_exit(&self) -> bool {
        matches!(self, Self::Cancelled | Self::IdleTimeout(_))
    }
}
