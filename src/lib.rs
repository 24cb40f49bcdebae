//! Yui - a Discord voice companion
//!
//! Yui joins a voice channel, listens to one user at a time and talks back:
//! - Voice capture from the call and ffmpeg encoding
//! - Whisper transcription and chat completion with a short memory
//! - VOICEVOX synthesis played back into the call
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Discord gateway                      │
//! │   !record / !stop  │  voice state  │  songbird call  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one task per session
//! ┌────────────────────▼────────────────────────────────┐
//! │                Turn orchestrator                     │
//! │ capture → encode → transcribe → generate →           │
//! │ synthesize → play → pace → tone → capture ...        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   ffmpeg  │  Whisper  │  Chat completions  │ VOICEVOX │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod session;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use conversation::{ChatMessage, ConversationBuffer, Role};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use llm::{ChatCompleter, OpenAiChat, ReplyGenerator};
pub use session::{Session, SessionRegistry};
pub use turn::{SessionOutcome, Stages, TurnOrchestrator, TurnReport, TurnSettings, TurnState};
