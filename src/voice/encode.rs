//! Raw PCM to MP3 transcoding via an external ffmpeg process

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::capture::{CHANNELS, SAMPLE_RATE};
use crate::{Error, Result};

/// Converts a raw recording into an upload-friendly format
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode `input` into `output`, returning once `output` is complete
    async fn encode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Encodes signed 16-bit little-endian PCM to MP3 with ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    bitrate_kbps: u32,
}

impl FfmpegEncoder {
    #[must_use]
    pub const fn new(program: PathBuf, bitrate_kbps: u32) -> Self {
        Self {
            program,
            bitrate_kbps,
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            CHANNELS.to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-b:a".to_string(),
            format!("{}k", self.bitrate_kbps),
            "-f".to_string(),
            "mp3".to_string(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, input: &Path, output: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(input)
            .await
            .map_err(|e| Error::Encode(format!("cannot read {}: {e}", input.display())))?;

        if metadata.len() == 0 {
            return Err(Error::Encode(format!(
                "recording {} is empty",
                input.display()
            )));
        }

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            bytes = metadata.len(),
            "encoding recording"
        );

        // ffmpeg exits only after the whole input is consumed and the
        // output is flushed
        let result = Command::new(&self.program)
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::Encode(format!("failed to run {}: {e}", self.program.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            tracing::error!(status = %result.status, stderr = %stderr.trim(), "ffmpeg failed");
            return Err(Error::Encode(format!(
                "encoder exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        let written = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(Error::Encode(format!(
                "encoder produced no output at {}",
                output.display()
            )));
        }

        tracing::debug!(bytes = written, "encoding complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_recording_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("42.pcm");
        std::fs::write(&input, b"").unwrap();

        let encoder = FfmpegEncoder::new(PathBuf::from("/nonexistent/ffmpeg"), 96);
        let err = encoder
            .encode(&input, &dir.path().join("42.mp3"))
            .await
            .unwrap_err();

        match err {
            Error::Encode(msg) => assert!(msg.contains("empty"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_recording_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FfmpegEncoder::new(PathBuf::from("ffmpeg"), 96);

        let err = encoder
            .encode(&dir.path().join("missing.pcm"), &dir.path().join("out.mp3"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Encode(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("42.pcm");
        std::fs::write(&input, [0u8; 64]).unwrap();

        let encoder = FfmpegEncoder::new(PathBuf::from("false"), 96);
        let err = encoder
            .encode(&input, &dir.path().join("42.mp3"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn args_describe_raw_input() {
        let encoder = FfmpegEncoder::new(PathBuf::from("ffmpeg"), 96);
        let args = encoder.args(Path::new("in.pcm"), Path::new("out.mp3"));

        let joined = args.join(" ");
        assert!(joined.contains("-f s16le -ar 48000 -ac 2 -i in.pcm"));
        assert!(joined.contains("-b:a 96k"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp3"));
    }
}
