//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use yui_voice::channels::{Channel, OutgoingMessage};
use yui_voice::voice::{Encoder, Player, Recorder, Synthesizer, Transcriber};
use yui_voice::{
    ChatCompleter, ChatMessage, Error, ReplyGenerator, Result, Session, Stages, TurnSettings,
};

pub const USER_ID: u64 = 4242;
pub const TEXT_CHANNEL_ID: u64 = 900;
pub const PERSONA: &str = "You are Yui";

/// Serve `router` on an ephemeral port and return its base URL
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("no local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server failed");
    });

    format!("http://{addr}")
}

/// A short, valid mono WAV file
pub fn wav_bytes() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 24_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for i in 0..2400 {
            writer.write_sample((i % 100) as i16).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

pub fn session(dir: &Path) -> Session {
    Session::new(USER_ID, 1, 10, TEXT_CHANNEL_ID, dir)
}

/// Settings with no waiting between turns
pub fn settings(dir: &Path) -> TurnSettings {
    TurnSettings {
        history_capacity: 5,
        pacing_secs_per_char: 0.0,
        reply_volume: 1.0,
        tone_path: dir.join("tone.wav"),
        tone_volume: 0.1,
        settle: Duration::ZERO,
        notify_failures: true,
    }
}

/// Writes a scripted number of bytes per turn; ends with `IdleTimeout`
/// once the script runs out
#[derive(Default)]
pub struct ScriptedRecorder {
    takes: Mutex<VecDeque<usize>>,
    pub calls: AtomicUsize,
}

impl ScriptedRecorder {
    pub fn new(takes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            takes: Mutex::new(takes.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Recorder for ScriptedRecorder {
    async fn record(&self, _user_id: u64, dest: &Path, cancel: &CancellationToken) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let next = self.takes.lock().unwrap().pop_front();
        match next {
            Some(bytes) => {
                tokio::fs::write(dest, vec![0u8; bytes])
                    .await
                    .map_err(|e| Error::Capture(e.to_string()))?;
                Ok(bytes as u64)
            }
            None => Err(Error::IdleTimeout(Duration::from_millis(1))),
        }
    }
}

/// Copies the raw file so downstream stages see it; respects empty input
#[derive(Default)]
pub struct CopyEncoder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Encoder for CopyEncoder {
    async fn encode(&self, input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = tokio::fs::read(input)
            .await
            .map_err(|e| Error::Encode(e.to_string()))?;
        if raw.is_empty() {
            return Err(Error::Encode("recording is empty".to_string()));
        }
        tokio::fs::write(output, raw)
            .await
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(())
    }
}

/// Returns scripted transcripts in order
pub struct ScriptedTranscriber {
    transcripts: Mutex<VecDeque<Result<String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(transcripts: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            transcripts: Mutex::new(transcripts.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn saying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok((*t).to_string())))
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(path.exists(), "transcriber called without encoded audio");
        self.transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transcription("script exhausted".to_string())))
    }
}

/// Returns scripted replies and keeps every request it saw
pub struct ScriptedCompleter {
    replies: Mutex<VecDeque<Result<String>>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompleter {
    pub fn new(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok((*t).to_string())))
    }
}

#[async_trait]
impl ChatCompleter for ScriptedCompleter {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Completion("script exhausted".to_string())))
    }
}

/// Writes a small WAV, or fails when told to
#[derive(Default)]
pub struct FakeSynthesizer {
    pub fail: bool,
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, dest: &Path) -> Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(Error::Synthesis("engine unavailable".to_string()));
        }
        tokio::fs::write(dest, wav_bytes())
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        Ok(())
    }
}

/// Logs what was played; optionally fails files ending in `fail_suffix`
#[derive(Default)]
pub struct RecordingPlayer {
    pub played: Mutex<Vec<(PathBuf, f32)>>,
    pub fail_suffix: Option<&'static str>,
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn play(&self, path: &Path, volume: f32, _cancel: &CancellationToken) -> Result<()> {
        self.played.lock().unwrap().push((path.to_path_buf(), volume));
        if self
            .fail_suffix
            .is_some_and(|suffix| path.to_string_lossy().ends_with(suffix))
        {
            return Err(Error::PlaybackStart(format!("{} unplayable", path.display())));
        }
        Ok(())
    }
}

/// Keeps every message sent
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutgoingMessage>>,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "test"
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Handles to every fake so tests can inspect them after a run
pub struct Fakes {
    pub recorder: Arc<ScriptedRecorder>,
    pub encoder: Arc<CopyEncoder>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub completer: Arc<ScriptedCompleter>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub player: Arc<RecordingPlayer>,
    pub channel: Arc<RecordingChannel>,
}

impl Fakes {
    pub fn new(
        recorder: ScriptedRecorder,
        transcriber: ScriptedTranscriber,
        completer: ScriptedCompleter,
    ) -> Self {
        Self {
            recorder: Arc::new(recorder),
            encoder: Arc::new(CopyEncoder::default()),
            transcriber: Arc::new(transcriber),
            completer: Arc::new(completer),
            synthesizer: Arc::new(FakeSynthesizer::default()),
            player: Arc::new(RecordingPlayer::default()),
            channel: Arc::new(RecordingChannel::default()),
        }
    }

    pub fn stages(&self) -> Stages {
        Stages {
            recorder: self.recorder.clone(),
            encoder: self.encoder.clone(),
            transcriber: self.transcriber.clone(),
            replies: ReplyGenerator::new(PERSONA.to_string(), self.completer.clone()),
            synthesizer: self.synthesizer.clone(),
            player: self.player.clone(),
            channel: self.channel.clone(),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.channel
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }
}
