//! Configuration management for the Yui voice companion

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Persona used when neither `YUI_PERSONA` nor `YUI_PERSONA_FILE` is set
pub const DEFAULT_PERSONA: &str = "You are Yui, a cheerful companion chatting over voice. \
Answer in one or two short spoken sentences.";

/// Development profile layered over `.env`
const DEVELOPMENT_ENV_FILE: &str = ".env.development";

/// Yui configuration, read-only after startup
#[derive(Debug, Clone)]
pub struct Config {
    /// API keys and tokens
    pub api_keys: ApiKeys,

    /// Persona instruction sent first in every completion request
    pub persona: String,

    /// Remote model endpoints
    pub models: ModelConfig,

    /// Speech synthesis configuration
    pub synthesis: SynthesisConfig,

    /// Turn loop configuration
    pub voice: VoiceConfig,

    /// Chat triggers
    pub commands: CommandConfig,

    /// Post a notice in the text channel when a session fails
    pub notify_failures: bool,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Discord bot token
    pub discord: Option<SecretString>,

    /// `OpenAI` API key (transcription and chat completion)
    pub openai: Option<SecretString>,
}

/// Transcription and completion endpoints
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Provider base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Transcription model identifier
    pub stt_model: String,

    /// Chat completion model identifier
    pub llm_model: String,

    /// Timeout applied to every HTTP request
    pub http_timeout: Duration,
}

/// VOICEVOX-style synthesis engine settings
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Engine base URL, e.g. `http://127.0.0.1:50021`
    pub base_url: String,

    /// Speaker (voice) identifier
    pub speaker: u32,
}

/// Turn loop settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Directory holding per-user recordings
    pub recordings_dir: PathBuf,

    /// Notification tone played before each new capture
    pub tone_path: PathBuf,

    /// Tone volume (0.0 to 1.0)
    pub tone_volume: f32,

    /// Conversation buffer capacity
    pub history_capacity: usize,

    /// Silence that ends a capture
    pub silence: Duration,

    /// Longest wait for the user to start speaking
    pub idle_timeout: Duration,

    /// Longest single recording
    pub max_recording: Duration,

    /// Pacing delay per reply character, in seconds
    pub pacing_secs_per_char: f64,

    /// Wait between the tone and the next capture
    pub settle: Duration,

    /// Encoder program
    pub ffmpeg_path: PathBuf,

    /// Encoder bitrate in kbit/s
    pub mp3_bitrate_kbps: u32,
}

/// Exact-match chat triggers
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Starts a session for the author
    pub record: String,

    /// Stops the author's session
    pub stop: String,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// Reads `.env` first, then lets `.env.development` override it. Both
    /// files are optional.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to read .env"),
        }

        match dotenvy::from_filename_override(DEVELOPMENT_ENV_FILE) {
            Ok(path) => tracing::info!(path = %path.display(), "applied development overrides"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to read {DEVELOPMENT_ENV_FILE}"),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or is out of range
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_keys = ApiKeys {
            discord: get("DISCORD_TOKEN").map(SecretString::from),
            openai: get("OPENAI_API_KEY").map(SecretString::from),
        };

        let persona = match get("YUI_PERSONA_FILE") {
            Some(path) => std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("failed to read persona file {path}: {e}")))?
                .trim()
                .to_string(),
            None => get("YUI_PERSONA").unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
        };

        let models = ModelConfig {
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            stt_model: get("YUI_STT_MODEL").unwrap_or_else(|| "whisper-1".to_string()),
            llm_model: get("YUI_LLM_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            http_timeout: Duration::from_secs(parse_or(&get, "YUI_HTTP_TIMEOUT_SECS", 60)?),
        };

        let synthesis = SynthesisConfig {
            base_url: normalize_endpoint(
                &get("VOICEVOX_ENDPOINT").unwrap_or_else(|| "127.0.0.1:50021".to_string()),
            ),
            speaker: parse_or(&get, "YUI_SPEAKER", 14)?,
        };

        let history_capacity: usize = parse_or(&get, "YUI_HISTORY_CAPACITY", 5)?;
        if history_capacity == 0 {
            return Err(Error::Config(
                "YUI_HISTORY_CAPACITY must be at least 1".to_string(),
            ));
        }

        let tone_volume: f32 = parse_or(&get, "YUI_TONE_VOLUME", 0.1)?;
        if !(0.0..=1.0).contains(&tone_volume) {
            return Err(Error::Config(format!(
                "YUI_TONE_VOLUME must be within 0.0..=1.0, got {tone_volume}"
            )));
        }

        let pacing_secs_per_char: f64 = parse_or(&get, "YUI_PACING_SECS_PER_CHAR", 0.225)?;
        if !pacing_secs_per_char.is_finite() || pacing_secs_per_char < 0.0 {
            return Err(Error::Config(format!(
                "YUI_PACING_SECS_PER_CHAR must be non-negative, got {pacing_secs_per_char}"
            )));
        }

        let max_recording: u64 = parse_or(&get, "YUI_MAX_RECORDING_SECS", 60)?;
        if max_recording == 0 {
            return Err(Error::Config("YUI_MAX_RECORDING_SECS must be at least 1".to_string()));
        }

        let voice = VoiceConfig {
            recordings_dir: get("YUI_RECORDINGS_DIR")
                .map_or_else(|| PathBuf::from("./recordings"), PathBuf::from),
            tone_path: get("YUI_TONE_PATH")
                .map_or_else(|| PathBuf::from("./sounds/tone.wav"), PathBuf::from),
            tone_volume,
            history_capacity,
            silence: Duration::from_millis(parse_or(&get, "YUI_SILENCE_MS", 1500)?),
            idle_timeout: Duration::from_secs(parse_or(&get, "YUI_IDLE_TIMEOUT_SECS", 300)?),
            max_recording: Duration::from_secs(max_recording),
            pacing_secs_per_char,
            settle: Duration::from_millis(parse_or(&get, "YUI_SETTLE_MS", 1000)?),
            ffmpeg_path: get("YUI_FFMPEG").map_or_else(|| PathBuf::from("ffmpeg"), PathBuf::from),
            mp3_bitrate_kbps: parse_or(&get, "YUI_MP3_BITRATE_KBPS", 96)?,
        };

        let commands = CommandConfig {
            record: get("YUI_RECORD_TRIGGER").unwrap_or_else(|| "!record".to_string()),
            stop: get("YUI_STOP_TRIGGER").unwrap_or_else(|| "!stop".to_string()),
        };

        let notify_failures = flag_or(&get, "YUI_NOTIFY_FAILURES", true)?;

        Ok(Self {
            api_keys,
            persona,
            models,
            synthesis,
            voice,
            commands,
            notify_failures,
        })
    }
}

/// Parse an optional value, falling back to a default when unset
fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {key}={raw}: {e}")))
    })
}

/// Parse an optional on/off switch
fn flag_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "invalid {key}={raw}: expected true/false, yes/no, on/off or 1/0"
        ))),
    }
}

/// Accept either `host:port` or a full URL
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}
