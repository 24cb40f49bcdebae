//! Text channel adapters
//!
//! Voice sessions are started and stopped from chat, and replies are posted
//! back as text. Each adapter implements the `Channel` trait for the outgoing
//! half.

mod chunking;
pub mod discord;

use async_trait::async_trait;

pub use chunking::{DISCORD_MESSAGE_LIMIT, split_message};
pub use discord::DiscordChannel;

use crate::Result;
use crate::config::CommandConfig;

/// A message to send to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Channel identifier
    pub channel_id: String,

    /// Message content
    pub content: String,
}

impl OutgoingMessage {
    /// Create a simple `text` message
    #[must_use]
    pub const fn text(channel_id: String, content: String) -> Self {
        Self {
            channel_id,
            content,
        }
    }
}

/// Trait for text channel adapters
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &'static str;

    /// Send a message
    async fn send(&self, message: OutgoingMessage) -> Result<()>;
}

/// Chat commands the bot reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Start a voice session for the author
    Record,
    /// Stop the author's voice session
    Stop,
}

impl BotCommand {
    /// Match `content` against the configured triggers
    ///
    /// Surrounding whitespace is ignored; anything else must match exactly.
    #[must_use]
    pub fn parse(content: &str, commands: &CommandConfig) -> Option<Self> {
        let content = content.trim();
        if content == commands.record {
            Some(Self::Record)
        } else if content == commands.stop {
            Some(Self::Stop)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> CommandConfig {
        CommandConfig {
            record: "!record".to_string(),
            stop: "!stop".to_string(),
        }
    }

    #[test]
    fn parses_exact_triggers() {
        assert_eq!(BotCommand::parse("!record", &commands()), Some(BotCommand::Record));
        assert_eq!(BotCommand::parse("  !stop\n", &commands()), Some(BotCommand::Stop));
    }

    #[test]
    fn ignores_everything_else() {
        assert_eq!(BotCommand::parse("!record please", &commands()), None);
        assert_eq!(BotCommand::parse("!RECORD", &commands()), None);
        assert_eq!(BotCommand::parse("hello", &commands()), None);
    }
}
