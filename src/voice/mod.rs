//! Voice processing module
//!
//! One trait per turn stage, each with the production implementation
//! beside it: songbird capture and playback, ffmpeg encoding, Whisper
//! transcription and VOICEVOX synthesis.

mod capture;
mod encode;
mod playback;
mod stt;
mod tts;

pub use capture::{
    CHANNELS, CaptureLimits, Recorder, SAMPLE_RATE, SongbirdRecorder, VoiceFrame, VoiceReceiver,
    capture_frames,
};
pub use encode::{Encoder, FfmpegEncoder};
pub use playback::{
    FINISH_TIMEOUT, PlaybackLimits, Player, START_TIMEOUT, SerializedPlayer, SongbirdPlayer,
    TrackProbe, TrackStatus, await_playback, track_status,
};
pub use stt::{Transcriber, WhisperClient};
pub use tts::{Synthesizer, VoicevoxClient};
