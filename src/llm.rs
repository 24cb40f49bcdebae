//! Reply generation via a chat-completion API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::conversation::{ChatMessage, ConversationBuffer, Role};
use crate::{Error, Result};

/// Backend that turns a message list into a single reply
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Complete the conversation, returning the assistant's text
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// `OpenAI`-compatible `/chat/completions` client
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiChat {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for chat".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        tracing::debug!(messages = messages.len(), model = %self.model, "requesting completion");

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::Completion(format!("API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Completion(format!("failed to parse response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::Completion("response has no usable choice".to_string()))
    }
}

/// Builds completion requests from the persona and a session's history
#[derive(Clone)]
pub struct ReplyGenerator {
    persona: String,
    completer: Arc<dyn ChatCompleter>,
}

impl ReplyGenerator {
    #[must_use]
    pub fn new(persona: String, completer: Arc<dyn ChatCompleter>) -> Self {
        Self { persona, completer }
    }

    /// Persona first, then the buffer, then the new transcript
    #[must_use]
    pub fn build_request(&self, buffer: &ConversationBuffer, transcript: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(buffer.len() + 2);
        messages.push(ChatMessage::new(Role::System, self.persona.as_str()));
        messages.extend(buffer.iter().cloned());
        messages.push(ChatMessage::new(Role::User, transcript));
        messages
    }

    /// Generate a reply and record the exchange in `buffer`
    ///
    /// The buffer is only touched once the completion has succeeded, so a
    /// failed request leaves the history exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns `Error::Completion` if the backend fails
    pub async fn generate(
        &self,
        buffer: &mut ConversationBuffer,
        transcript: &str,
    ) -> Result<String> {
        let messages = self.build_request(buffer, transcript);
        let reply = self.completer.complete(&messages).await?;

        buffer.append(Role::User, transcript);
        buffer.append(Role::Assistant, reply.as_str());
        buffer.trim_to_capacity();

        Ok(reply)
    }
}
