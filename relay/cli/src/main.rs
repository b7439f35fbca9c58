//! Relay CLI - Talk to a model server through the relay core
//!
//! A thin front end over `relay-core` for exercising a deployment by hand:
//! chat with the configured model, push audio through the speech services,
//! or inspect the effective configuration.
//!
//! # Usage
//!
//! ```bash
//! # Interactive chat, streamed
//! relay chat
//!
//! # Point at another model server
//! relay --llm-url http://gpu-box:8000/v1 --model qwen2.5 chat
//!
//! # Speech round trip
//! relay synthesize "Good morning" --output morning.pcm
//! relay transcribe recording.wav
//!
//! # Show effective config
//! relay config
//!
//! # Verbose logging
//! RELAY_LOG=debug relay chat
//! ```

mod chat;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use relay_core::speech::{AsrAdapter, Synthesizer, Transcriber, TtsAdapter, TtsOptions};
use relay_core::{load_config, ConfigOverrides, RelayConfig};

/// Relay - real-time assistant plumbing from the command line
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG", default_value = "warn", global = true)]
    log_level: String,

    /// Model server base URL
    #[arg(long, value_name = "URL", global = true)]
    llm_url: Option<String>,

    /// Model name
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// Voice for synthesis
    #[arg(long, global = true)]
    voice: Option<String>,

    /// System prompt sent ahead of every conversation
    #[arg(long, value_name = "TEXT", global = true)]
    system_prompt: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat with the model
    Chat {
        /// Conversation title
        #[arg(short = 't', long, default_value = "CLI chat")]
        title: String,

        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Print model reasoning as it arrives
        #[arg(long)]
        show_reasoning: bool,
    },

    /// Transcribe an audio file
    Transcribe {
        /// Audio file
        file: PathBuf,

        /// Container format, defaults to the file extension
        #[arg(short = 'f', long)]
        format: Option<String>,
    },

    /// Synthesise speech to a file
    Synthesize {
        /// Text to speak
        text: String,

        /// Output file
        #[arg(short = 'o', long, value_name = "FILE")]
        output: PathBuf,

        /// Output container (pcm, mp3, opus, ...)
        #[arg(short = 'f', long)]
        format: Option<String>,

        /// Playback speed multiplier
        #[arg(long)]
        speed: Option<f32>,
    },

    /// Print the effective configuration
    Config,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file and environment, then layer the command line on top
fn resolve_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => relay_core::config::load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(url) = &args.llm_url {
        overrides = overrides.with_llm_url(url.clone());
    }
    if let Some(model) = &args.model {
        overrides = overrides.with_model(model.clone());
    }
    if let Some(voice) = &args.voice {
        overrides = overrides.with_voice(voice.clone());
    }
    if let Some(prompt) = &args.system_prompt {
        overrides = overrides.with_system_prompt(prompt.clone());
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    debug!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

fn format_from_extension(file: &std::path::Path) -> String {
    file.extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(|| "wav".to_string(), str::to_ascii_lowercase)
}

async fn transcribe(config: &RelayConfig, file: PathBuf, format: Option<String>) -> Result<()> {
    let audio = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read audio file: {file:?}"))?;
    let format = format.unwrap_or_else(|| format_from_extension(&file));

    let asr = AsrAdapter::new(&config.speech_config()).context("Failed to create ASR client")?;
    let transcription = asr
        .transcribe(&audio, &format)
        .await
        .context("Transcription failed")?;

    info!(
        language = ?transcription.language,
        segments = transcription.segments.len(),
        "Transcribed"
    );
    println!("{}", transcription.text);
    if let Some(confidence) = transcription.confidence {
        eprintln!("confidence: {confidence:.2}");
    }
    Ok(())
}

async fn synthesize(
    config: &RelayConfig,
    text: &str,
    output: PathBuf,
    options: TtsOptions,
) -> Result<()> {
    let tts = TtsAdapter::new(&config.speech_config()).context("Failed to create TTS client")?;
    let synthesis = tts
        .synthesize(text, &options)
        .await
        .context("Synthesis failed")?;

    tokio::fs::write(&output, &synthesis.audio)
        .await
        .with_context(|| format!("Failed to write audio file: {output:?}"))?;

    eprintln!(
        "wrote {} bytes of {} (~{} ms) to {}",
        synthesis.audio.len(),
        synthesis.format,
        synthesis.duration_ms,
        output.display()
    );
    Ok(())
}

fn print_config(config: &RelayConfig) -> Result<()> {
    let rendered = config.to_toml_string().context("Failed to render configuration")?;
    println!("# source: {}", config.source());
    if let Some(path) = &config.config_file_path {
        println!("# file: {}", path.display());
    }
    print!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    debug!("Version: {}", env!("CARGO_PKG_VERSION"));
    let config = resolve_config(&args)?;

    match args.command {
        Command::Chat {
            title,
            no_stream,
            show_reasoning,
        } => {
            let options = chat::ChatOptions {
                title,
                stream: !no_stream,
                show_reasoning,
            };
            chat::run(&config, options).await
        }
        Command::Transcribe { file, format } => transcribe(&config, file, format).await,
        Command::Synthesize {
            text,
            output,
            format,
            speed,
        } => {
            let options = TtsOptions {
                voice: None,
                speed,
                format,
            };
            synthesize(&config, &text, output, options).await
        }
        Command::Config => print_config(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_global_overrides_after_subcommand() {
        let args = Args::try_parse_from([
            "relay",
            "chat",
            "--model",
            "qwen2.5",
            "--llm-url",
            "http://gpu-box:8000/v1",
            "--no-stream",
        ])
        .unwrap();

        assert_eq!(args.model.as_deref(), Some("qwen2.5"));
        assert_eq!(args.llm_url.as_deref(), Some("http://gpu-box:8000/v1"));
        assert!(matches!(args.command, Command::Chat { no_stream: true, .. }));
    }

    #[test]
    fn test_synthesize_requires_output() {
        assert!(Args::try_parse_from(["relay", "synthesize", "hello"]).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(format_from_extension(std::path::Path::new("a/b.MP3")), "mp3");
        assert_eq!(format_from_extension(std::path::Path::new("noext")), "wav");
    }

    #[test]
    fn test_resolve_config_applies_cli_overrides() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let args = Args::try_parse_from([
            "relay",
            "--config",
            file.path().to_str().unwrap(),
            "--model",
            "tiny",
            "config",
        ])
        .unwrap();

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.llm.model, "tiny");
        assert_eq!(config.source(), relay_core::ConfigSource::Cli);
    }
}
