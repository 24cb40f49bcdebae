//! Voice sessions and their lifecycle
//!
//! A [`Session`] identifies who Yui is listening to and where the per-user
//! audio files live. The [`SessionRegistry`] tracks live sessions so they can
//! be cancelled from outside the turn loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// A conversation with one user in one voice channel
#[derive(Debug, Clone)]
pub struct Session {
    /// Discord user being listened to
    pub user_id: u64,

    /// Guild the voice channel belongs to
    pub guild_id: u64,

    /// Voice channel the bot joined
    pub voice_channel_id: u64,

    /// Text channel where replies are posted
    pub text_channel_id: u64,

    recordings_dir: PathBuf,
}

impl Session {
    #[must_use]
    pub fn new(
        user_id: u64,
        guild_id: u64,
        voice_channel_id: u64,
        text_channel_id: u64,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            user_id,
            guild_id,
            voice_channel_id,
            text_channel_id,
            recordings_dir: recordings_dir.into(),
        }
    }

    #[must_use]
    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Raw capture, `{user}.pcm`
    #[must_use]
    pub fn raw_path(&self) -> PathBuf {
        self.recordings_dir.join(format!("{}.pcm", self.user_id))
    }

    /// Encoded upload, `{user}.mp3`
    #[must_use]
    pub fn encoded_path(&self) -> PathBuf {
        self.recordings_dir.join(format!("{}.mp3", self.user_id))
    }

    /// Synthesized reply, `{user}-answer.wav`
    #[must_use]
    pub fn answer_path(&self) -> PathBuf {
        self.recordings_dir.join(format!("{}-answer.wav", self.user_id))
    }
}

/// Registry entry for a running session
#[derive(Debug, Clone)]
struct LiveSession {
    id: u64,
    guild_id: u64,
    voice_channel_id: u64,
    cancel: CancellationToken,
}

/// Ticket returned when a session is registered
#[derive(Debug, Clone)]
pub struct SessionTicket {
    id: u64,
    user_id: u64,
    /// Fires when the session should stop
    pub cancel: CancellationToken,
}

/// Live sessions keyed by user, at most one per user
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<u64, LiveSession>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `session.user_id`
    ///
    /// Returns `None` if that user already has a live session.
    #[must_use]
    pub fn register(&self, session: &Session) -> Option<SessionTicket> {
        let mut sessions = self.sessions.lock().ok()?;
        if sessions.contains_key(&session.user_id) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        sessions.insert(
            session.user_id,
            LiveSession {
                id,
                guild_id: session.guild_id,
                voice_channel_id: session.voice_channel_id,
                cancel: cancel.clone(),
            },
        );

        Some(SessionTicket {
            id,
            user_id: session.user_id,
            cancel,
        })
    }

    /// Remove a finished session
    ///
    /// Returns how many sessions are still live in the same guild.
    pub fn finish(&self, ticket: &SessionTicket) -> usize {
        let Ok(mut sessions) = self.sessions.lock() else {
            return 0;
        };

        let guild_id = match sessions.get(&ticket.user_id) {
            Some(live) if live.id == ticket.id => live.guild_id,
            _ => return 0,
        };
        sessions.remove(&ticket.user_id);

        sessions.values().filter(|s| s.guild_id == guild_id).count()
    }

    /// Cancel `user_id`'s session, if any
    pub fn cancel(&self, user_id: u64) -> bool {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(&user_id).map(|s| s.cancel.clone()))
            .is_some_and(|token| {
                token.cancel();
                true
            })
    }

    /// Cancel `user_id`'s session unless they are still in its voice channel
    pub fn cancel_if_left(&self, user_id: u64, current_channel: Option<u64>) -> bool {
        let token = self.sessions.lock().ok().and_then(|sessions| {
            sessions
                .get(&user_id)
                .filter(|s| Some(s.voice_channel_id) != current_channel)
                .map(|s| s.cancel.clone())
        });

        token.is_some_and(|token| {
            token.cancel();
            true
        })
    }

    /// Cancel every live session
    pub fn cancel_all(&self) {
        if let Ok(sessions) = self.sessions.lock() {
            for session in sessions.values() {
                session.cancel.cancel();
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().map_or(0, |sessions| sessions.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user_id: u64, guild_id: u64, voice_channel_id: u64) -> Session {
        Session::new(user_id, guild_id, voice_channel_id, 900, "/tmp/recordings")
    }

    #[test]
    fn paths_are_keyed_by_user() {
        let s = session(42, 1, 10);
        assert_eq!(s.raw_path(), PathBuf::from("/tmp/recordings/42.pcm"));
        assert_eq!(s.encoded_path(), PathBuf::from("/tmp/recordings/42.mp3"));
        assert_eq!(
            s.answer_path(),
            PathBuf::from("/tmp/recordings/42-answer.wav")
        );
    }

    #[test]
    fn one_session_per_user() {
        let registry = SessionRegistry::new();
        let ticket = registry.register(&session(42, 1, 10)).unwrap();

        assert!(registry.register(&session(42, 1, 10)).is_none());
        assert_eq!(registry.len(), 1);

        registry.finish(&ticket);
        assert!(registry.is_empty());
        assert!(registry.register(&session(42, 1, 10)).is_some());
    }

    #[test]
    fn finish_reports_remaining_in_guild() {
        let registry = SessionRegistry::new();
        let a = registry.register(&session(1, 7, 10)).unwrap();
        let _b = registry.register(&session(2, 7, 10)).unwrap();
        let _c = registry.register(&session(3, 8, 20)).unwrap();

        assert_eq!(registry.finish(&a), 1);
    }

    #[test]
    fn stale_ticket_does_not_remove_newer_session() {
        let registry = SessionRegistry::new();
        let old = registry.register(&session(42, 1, 10)).unwrap();
        registry.finish(&old);
        let _new = registry.register(&session(42, 1, 10)).unwrap();

        registry.finish(&old);
        assert_eq!(registry.len(), 1);
        assert!(registry.cancel(42));
    }

    #[test]
    fn cancel_if_left_ignores_same_channel() {
        let registry = SessionRegistry::new();
        let ticket = registry.register(&session(42, 1, 10)).unwrap();

        assert!(!registry.cancel_if_left(42, Some(10)));
        assert!(!ticket.cancel.is_cancelled());

        assert!(registry.cancel_if_left(42, None));
        assert!(ticket.cancel.is_cancelled());
    }

    #[test]
    fn cancel_all_fires_every_token() {
        let registry = SessionRegistry::new();
        let a = registry.register(&session(1, 7, 10)).unwrap();
        let b = registry.register(&session(2, 8, 20)).unwrap();

        registry.cancel_all();

        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
        assert!(!registry.cancel(3));
    }
}
