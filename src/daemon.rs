//! Daemon - the main bot service
//!
//! Builds the shared stage clients, connects to the Discord gateway and runs
//! until interrupted.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::channels::discord::{self, SharedStages, VoiceHandler};
use crate::llm::{OpenAiChat, ReplyGenerator};
use crate::session::SessionRegistry;
use crate::voice::{FfmpegEncoder, VoicevoxClient, WhisperClient};
use crate::{Config, Error, Result};

/// The Yui daemon - one Discord connection, many voice sessions
pub struct Daemon {
    config: Arc<Config>,
    registry: SessionRegistry,
}

impl Daemon {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            registry: SessionRegistry::new(),
        }
    }

    /// Run until Ctrl-C or the gateway closes
    ///
    /// # Errors
    ///
    /// Returns error if the Discord token is missing, a stage client cannot
    /// be built, or the gateway connection fails
    pub async fn run(&self) -> Result<()> {
        let token = self
            .config
            .api_keys
            .discord
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("DISCORD_TOKEN is required".to_string()))?;

        if !self.config.voice.tone_path.exists() {
            tracing::warn!(
                path = %self.config.voice.tone_path.display(),
                "notification tone not found, turns will continue without it"
            );
        }

        let shared = shared_stages(&self.config)?;
        let handler = VoiceHandler::new(Arc::clone(&self.config), shared, self.registry.clone());
        let mut client = discord::build_client(&token, handler).await?;

        let shard_manager = Arc::clone(&client.shard_manager);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(sessions = registry.len(), "shutdown requested");
                registry.cancel_all();
                shard_manager.shutdown_all().await;
            }
        });

        tracing::info!(
            record = %self.config.commands.record,
            stop = %self.config.commands.stop,
            "yui ready"
        );

        client
            .start()
            .await
            .map_err(|e| Error::Channel(format!("Discord gateway error: {e}")))?;

        tracing::info!("gateway closed");
        Ok(())
    }
}

/// Build the stage clients every session shares
///
/// # Errors
///
/// Returns error if the `OpenAI` key is missing or an HTTP client cannot be
/// built
pub fn shared_stages(config: &Config) -> Result<SharedStages> {
    let models = &config.models;

    let transcriber = WhisperClient::new(
        &models.base_url,
        config.api_keys.openai.clone(),
        models.stt_model.clone(),
        models.http_timeout,
    )?;

    let completer = OpenAiChat::new(
        &models.base_url,
        config.api_keys.openai.clone(),
        models.llm_model.clone(),
        models.http_timeout,
    )?;

    let synthesizer = VoicevoxClient::new(
        &config.synthesis.base_url,
        config.synthesis.speaker,
        models.http_timeout,
    )?;

    let encoder = FfmpegEncoder::new(
        config.voice.ffmpeg_path.clone(),
        config.voice.mp3_bitrate_kbps,
    );

    tracing::debug!(
        stt_model = %models.stt_model,
        llm_model = %models.llm_model,
        speaker = config.synthesis.speaker,
        "stage clients ready"
    );

    Ok(SharedStages {
        encoder: Arc::new(encoder),
        transcriber: Arc::new(transcriber),
        replies: ReplyGenerator::new(config.persona.clone(), Arc::new(completer)),
        synthesizer: Arc::new(synthesizer),
    })
}
