//! Text-to-speech (TTS) processing
//!
//! Talks to a VOICEVOX-compatible engine: `/audio_query` returns synthesis
//! parameters for a phrase, `/synthesis` renders them to WAV.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Renders reply text to an audio file
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` and write the audio to `dest`
    async fn synthesize(&self, text: &str, dest: &Path) -> Result<()>;
}

/// Two-round-trip VOICEVOX client
pub struct VoicevoxClient {
    client: reqwest::Client,
    base_url: String,
    speaker: u32,
}

impl VoicevoxClient {
    /// Create a new VOICEVOX client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, speaker: u32, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            speaker,
        })
    }

    /// Request synthesis parameters for `text`
    async fn audio_query(&self, text: &str) -> Result<serde_json::Value> {
        let speaker = self.speaker.to_string();
        let response = self
            .client
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("audio_query request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "audio_query error {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Synthesis(format!("malformed audio_query payload: {e}")))
    }

    /// Render synthesis parameters to WAV bytes
    async fn render(&self, query: &serde_json::Value) -> Result<Vec<u8>> {
        let speaker = self.speaker.to_string();
        let response = self
            .client
            .post(format!("{}/synthesis", self.base_url))
            .query(&[
                ("speaker", speaker.as_str()),
                ("enable_interrogative_upspeak", "true"),
            ])
            .header(reqwest::header::ACCEPT, "audio/wav")
            .json(query)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("synthesis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("synthesis error {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.starts_with("audio/") {
            return Err(Error::Synthesis(format!(
                "expected audio payload, got '{content_type}'"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to read audio: {e}")))?;

        hound::WavReader::new(Cursor::new(audio.as_ref()))
            .map_err(|e| Error::Synthesis(format!("payload is not WAV audio: {e}")))?;

        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for VoicevoxClient {
    async fn synthesize(&self, text: &str, dest: &Path) -> Result<()> {
        tracing::debug!(chars = text.chars().count(), speaker = self.speaker, "synthesizing");

        let query = self.audio_query(text).await?;
        let audio = self.render(&query).await?;

        tokio::fs::write(dest, &audio).await.map_err(|e| {
            Error::Synthesis(format!("failed to write {}: {e}", dest.display()))
        })?;

        tracing::debug!(path = %dest.display(), bytes = audio.len(), "synthesis written");
        Ok(())
    }
}
