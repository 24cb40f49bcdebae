//! Discord adapter using serenity and songbird
//!
//! Chat commands start and stop voice sessions. Each session runs its own
//! turn loop on a spawned task; the bot joins the author's voice channel on
//! the first session in a guild and leaves when the last one ends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::Client;
use serenity::all::{
    ChannelId, Context, EventHandler, GatewayIntents, GuildId, Message, Ready, VoiceState,
};
use serenity::http::Http;
use songbird::driver::DecodeMode;
use songbird::{SerenityInit, Songbird};
use tokio::sync::Mutex;

use super::{BotCommand, Channel, OutgoingMessage};
use crate::config::Config;
use crate::llm::ReplyGenerator;
use crate::session::{Session, SessionRegistry, SessionTicket};
use crate::turn::{Stages, TurnOrchestrator, TurnSettings};
use crate::voice::{
    CaptureLimits, Encoder, SerializedPlayer, SongbirdPlayer, SongbirdRecorder, Synthesizer,
    Transcriber, VoiceReceiver,
};
use crate::{Error, Result};

/// Gateway intents needed for commands and voice
pub const INTENTS: GatewayIntents = GatewayIntents::GUILDS
    .union(GatewayIntents::GUILD_MESSAGES)
    .union(GatewayIntents::MESSAGE_CONTENT)
    .union(GatewayIntents::GUILD_VOICE_STATES);

/// Posts text to Discord channels
pub struct DiscordChannel {
    http: Arc<Http>,
}

impl DiscordChannel {
    #[must_use]
    pub const fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let channel_id: u64 = message
            .channel_id
            .parse()
            .map_err(|_| Error::Channel("Invalid channel ID".to_string()))?;

        ChannelId::new(channel_id)
            .say(&self.http, &message.content)
            .await
            .map_err(|e| Error::Channel(format!("Discord send error: {e}")))?;

        tracing::debug!(channel_id = %message.channel_id, "Discord message sent");
        Ok(())
    }
}

/// Stages shared by every session; per-call stages are built on join
#[derive(Clone)]
pub struct SharedStages {
    pub encoder: Arc<dyn Encoder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub replies: ReplyGenerator,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Per-guild state shared by every session on the bot's call
#[derive(Clone)]
struct GuildVoice {
    receiver: VoiceReceiver,
    /// Held for the whole of each playback on the call
    output: Arc<Mutex<()>>,
}

/// Discord event handler driving voice sessions
pub struct VoiceHandler {
    config: Arc<Config>,
    shared: SharedStages,
    registry: SessionRegistry,
    /// One entry per joined call; the lock also serializes join and leave
    guilds: Arc<Mutex<HashMap<GuildId, GuildVoice>>>,
}

impl VoiceHandler {
    #[must_use]
    pub fn new(config: Arc<Config>, shared: SharedStages, registry: SessionRegistry) -> Self {
        Self {
            config,
            shared,
            registry,
            guilds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn notify(ctx: &Context, channel_id: ChannelId, content: &str) {
        if let Err(e) = channel_id.say(&ctx.http, content).await {
            tracing::warn!(error = %e, "failed to post notice");
        }
    }

    async fn start_session(&self, ctx: &Context, msg: &Message, guild_id: GuildId) {
        // Cache refs must not be held across an await
        let voice_channel = msg.guild(&ctx.cache).and_then(|guild| {
            guild
                .voice_states
                .get(&msg.author.id)
                .and_then(|state| state.channel_id)
        });

        let Some(voice_channel) = voice_channel else {
            Self::notify(ctx, msg.channel_id, "Join a voice channel first.").await;
            return;
        };

        let Some(manager) = songbird::get(ctx).await else {
            tracing::error!("songbird voice client not registered");
            return;
        };

        let session = Session::new(
            msg.author.id.get(),
            guild_id.get(),
            voice_channel.get(),
            msg.channel_id.get(),
            &self.config.voice.recordings_dir,
        );

        if let Err(e) = tokio::fs::create_dir_all(session.recordings_dir()).await {
            tracing::error!(error = %e, "cannot create recordings directory");
            Self::notify(ctx, msg.channel_id, "I can't record right now.").await;
            return;
        }

        let mut guilds = self.guilds.lock().await;

        if let Some(call) = manager.get(guild_id) {
            let current = call.lock().await.current_channel();
            if current.is_some_and(|c| c != songbird::id::ChannelId::from(voice_channel)) {
                drop(guilds);
                Self::notify(ctx, msg.channel_id, "I'm already in another voice channel here.")
                    .await;
                return;
            }
        }

        let Some(ticket) = self.registry.register(&session) else {
            drop(guilds);
            Self::notify(ctx, msg.channel_id, "I'm already listening to you.").await;
            return;
        };

        let call = match manager.join(guild_id, voice_channel).await {
            Ok(call) => call,
            Err(e) => {
                tracing::error!(guild_id = %guild_id, error = %e, "failed to join voice");
                if self.registry.finish(&ticket) == 0 {
                    guilds.remove(&guild_id);
                }
                drop(guilds);
                Self::notify(ctx, msg.channel_id, "I couldn't join your voice channel.").await;
                return;
            }
        };

        let voice = match guilds.get(&guild_id) {
            Some(voice) => voice.clone(),
            None => {
                let voice = GuildVoice {
                    receiver: VoiceReceiver::attach(&mut *call.lock().await),
                    output: Arc::new(Mutex::new(())),
                };
                guilds.insert(guild_id, voice.clone());
                voice
            }
        };
        drop(guilds);

        let limits = CaptureLimits {
            silence: self.config.voice.silence,
            idle_timeout: self.config.voice.idle_timeout,
            max_duration: self.config.voice.max_recording,
        };
        let stages = Stages {
            recorder: Arc::new(SongbirdRecorder::new(voice.receiver, limits)),
            encoder: Arc::clone(&self.shared.encoder),
            transcriber: Arc::clone(&self.shared.transcriber),
            replies: self.shared.replies.clone(),
            synthesizer: Arc::clone(&self.shared.synthesizer),
            player: Arc::new(SerializedPlayer::new(SongbirdPlayer::new(call), voice.output)),
            channel: Arc::new(DiscordChannel::new(Arc::clone(&ctx.http))),
        };

        let orchestrator = TurnOrchestrator::new(
            session,
            stages,
            TurnSettings::from_config(&self.config),
            ticket.cancel.clone(),
        );

        tracing::info!(
            user = %msg.author.name,
            guild_id = %guild_id,
            channel_id = %voice_channel,
            "voice session starting"
        );
        Self::notify(ctx, msg.channel_id, &format!("Listening, {}.", msg.author.name)).await;

        let registry = self.registry.clone();
        let guilds = Arc::clone(&self.guilds);
        tokio::spawn(async move {
            let outcome = orchestrator.run().await;
            tracing::debug!(guild_id = %guild_id, ?outcome, "session task finished");
            end_session(&manager, &registry, &guilds, &ticket, guild_id).await;
        });
    }
}

/// Unregister a session and leave voice if it was the guild's last
async fn end_session(
    manager: &Songbird,
    registry: &SessionRegistry,
    guilds: &Mutex<HashMap<GuildId, GuildVoice>>,
    ticket: &SessionTicket,
    guild_id: GuildId,
) {
    let mut guilds = guilds.lock().await;
    if registry.finish(ticket) > 0 {
        return;
    }

    guilds.remove(&guild_id);
    if let Err(e) = manager.remove(guild_id).await {
        tracing::warn!(guild_id = %guild_id, error = %e, "failed to leave voice");
    } else {
        tracing::info!(guild_id = %guild_id, "left voice channel");
    }
}

#[async_trait]
impl EventHandler for VoiceHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "Discord bot ready");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(command) = BotCommand::parse(&msg.content, &self.config.commands) else {
            return;
        };

        let Some(guild_id) = msg.guild_id else {
            Self::notify(&ctx, msg.channel_id, "Voice sessions only work in servers.").await;
            return;
        };

        tracing::debug!(author = %msg.author.name, ?command, "command received");

        match command {
            BotCommand::Record => self.start_session(&ctx, &msg, guild_id).await,
            BotCommand::Stop => {
                if !self.registry.cancel(msg.author.id.get()) {
                    Self::notify(&ctx, msg.channel_id, "I'm not listening to you.").await;
                }
            }
        }
    }

    async fn voice_state_update(&self, _ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let user_id = new.user_id.get();
        let channel = new.channel_id.map(ChannelId::get);

        if self.registry.cancel_if_left(user_id, channel) {
            tracing::info!(user_id, "user left the session's voice channel");
        }
    }
}

/// Build a gateway client with voice receive enabled
///
/// # Errors
///
/// Returns error if the client cannot be built
pub async fn build_client(token: &str, handler: VoiceHandler) -> Result<Client> {
    let voice_config = songbird::Config::default().decode_mode(DecodeMode::Decode);

    Client::builder(token, INTENTS)
        .event_handler(handler)
        .register_songbird_from_config(voice_config)
        .await
        .map_err(|e| Error::Channel(format!("Discord client error: {e}")))
}
