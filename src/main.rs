use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use yui_voice::daemon::shared_stages;
use yui_voice::{Config, ConversationBuffer, Daemon};

/// Yui - a Discord voice companion
#[derive(Parser)]
#[command(name = "yui", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Connect to Discord and serve voice sessions (default)
    Run,
    /// Synthesize text to a WAV file
    TestTts {
        /// Text to speak
        #[arg(default_value = "こんにちは、ユイです。")]
        text: String,
        /// Output file
        #[arg(short, long, default_value = "test-tts.wav")]
        out: PathBuf,
    },
    /// Transcribe an audio file
    TestStt {
        /// Audio file (mp3)
        file: PathBuf,
    },
    /// Send one message through the persona and print the reply
    Chat {
        /// What to say
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = match cli.verbose {
        0 => "info,yui_voice=info",
        1 => "info,yui_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!("starting yui");
            Daemon::new(config).run().await?;
        }
        Command::TestTts { text, out } => test_tts(&config, &text, &out).await?,
        Command::TestStt { file } => test_stt(&config, &file).await?,
        Command::Chat { text } => chat(&config, &text).await?,
    }

    Ok(())
}

/// Synthesize `text` and report where the audio went
async fn test_tts(config: &Config, text: &str, out: &Path) -> anyhow::Result<()> {
    let stages = shared_stages(config)?;

    println!("Synthesizing with speaker {}...", config.synthesis.speaker);
    stages.synthesizer.synthesize(text, out).await?;

    let bytes = tokio::fs::metadata(out).await?.len();
    println!("Wrote {bytes} bytes to {}", out.display());
    Ok(())
}

async fn test_stt(config: &Config, file: &Path) -> anyhow::Result<()> {
    let stages = shared_stages(config)?;

    println!("Transcribing {}...", file.display());
    let transcript = stages.transcriber.transcribe(file).await?;
    println!("{transcript}");
    Ok(())
}

async fn chat(config: &Config, text: &str) -> anyhow::Result<()> {
    let stages = shared_stages(config)?;
    let mut buffer = ConversationBuffer::new(config.voice.history_capacity);

    let reply = stages.replies.generate(&mut buffer, text).await?;
    println!("{reply}");
    Ok(())
}
