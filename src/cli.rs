//! Command-line interface for parley
//!
//! Provides argument parsing using clap derive macros.

use crate::config::{DialogueBackendKind, Overrides};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to a language model, out loud
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Real-time voice conversation with a language model")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Conversation language (default: auto-detect). Examples: auto, en, ja
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Type instead of speaking: stdin lines in, replies on stdout
    #[arg(long)]
    pub text: bool,

    /// Audio input device name
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device name
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Dialogue backend (anthropic, openai, ollama)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<DialogueBackendKind>,

    /// Dialogue model name
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Keep talking when the user speaks over a reply
    #[arg(long)]
    pub no_barge_in: bool,

    /// Write every utterance sent for transcription to this directory
    #[arg(long, value_name = "DIR")]
    pub dump_audio: Option<PathBuf>,

    /// Listen to a WAV file instead of the microphone
    #[arg(long, value_name = "FILE", conflicts_with = "text")]
    pub input_wav: Option<PathBuf>,

    /// Per-request timeout for backend calls. Examples: 30, 45s, 2m
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,
}

impl Cli {
    /// The options that override the configuration file.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            language: self.language.clone(),
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            backend: self.backend,
            model: self.model.clone(),
            no_barge_in: self.no_barge_in,
            dump_audio: self.dump_audio.clone(),
            request_timeout: self.timeout,
        }
    }
}

/// Parse a timeout. Bare numbers are seconds; anything else goes through
/// `humantime` (`45s`, `2m`, `1m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let timeout = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if timeout.is_zero() {
        return Err("timeout must be positive".to_string());
    }
    Ok(timeout)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
