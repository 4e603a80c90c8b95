//! Main Entrypoint for the Voicebridge Service
//!
//! This binary is responsible for:
//! 1. Parsing command-line options for the local audio endpoints.
//! 2. Loading configuration from the environment.
//! 3. Initializing logging.
//! 4. Running the agent session until it closes or `Ctrl+C` is pressed.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use voicebridge::{
    audio::{InputSource, OutputTarget},
    config::Config,
    orchestrator::{self, AudioOptions},
};

#[derive(Parser, Debug)]
#[command(version, about = "Bridges local audio to a hosted voice agent")]
struct Args {
    /// Raw 16-bit mono PCM to send as microphone audio: a file path, or `-` for stdin.
    #[arg(long, conflicts_with = "mic")]
    input: Option<PathBuf>,

    /// File to write the agent's raw PCM audio to. Audio is discarded otherwise.
    #[arg(long, conflicts_with = "speaker")]
    output: Option<PathBuf>,

    /// Capture from the default input device (requires the `device-audio` feature).
    #[arg(long)]
    mic: bool,

    /// Play on the default output device (requires the `device-audio` feature).
    #[arg(long)]
    speaker: bool,
}

impl Args {
    fn audio_options(&self) -> AudioOptions {
        let input = match &self.input {
            Some(path) if path.as_os_str() == "-" => InputSource::Stdin,
            Some(path) => InputSource::File(path.clone()),
            None if self.mic => InputSource::Device,
            None => InputSource::None,
        };
        let output = match &self.output {
            Some(path) => OutputTarget::File(path.clone()),
            None if self.speaker => OutputTarget::Device,
            None => OutputTarget::Discard,
        };
        AudioOptions { input, output }
    }
}

/// Listens for the `Ctrl+C` signal to shut the session down.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Parse Arguments ---
    let args = Args::parse();

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 3. Initialize Logging ---
    // Logs go to stderr so stdout stays free for piping.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 4. Run the Session ---
    let audio = args.audio_options();
    info!(
        agent_url = %config.agent_url,
        think_model = %config.think_model,
        input = ?audio.input,
        output = ?audio.output,
        "Configuration loaded. Starting agent session..."
    );
    orchestrator::run(config, audio, shutdown_signal()).await?;

    info!("Session has shut down.");
    Ok(())
}
