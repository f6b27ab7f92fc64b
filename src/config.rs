use crate::defaults;
use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub stt: SttConfig,
    pub dialogue: DialogueConfig,
    pub tts: TtsConfig,
    pub pipeline: PipelineSettings,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub channels: u16,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// Speech segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    pub silence_threshold: f32,
    pub silence_duration_ms: u32,
    pub min_utterance_ms: u32,
    pub max_utterance_ms: u32,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    pub backend: SttBackend,
    /// Model name. Backend default when unset.
    pub model: Option<String>,
    /// `auto` or a language code that is forced on every transcript.
    pub language: String,
    /// Transcripts detected in other languages are dropped. Empty allows all.
    pub allowed_languages: Vec<String>,
    /// Path to a local ggml model file for the whisper backend.
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SttBackend {
    OpenAi,
    Whisper,
}

/// Reply generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DialogueConfig {
    pub backend: DialogueBackendKind,
    /// Model name. Backend default when unset.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub history_turns: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Offer the built-in tools (local time, working directory, memory search).
    pub tools: bool,
    /// Save conversation summaries as notes the model can search.
    pub memory: bool,
    /// Where notes live. The user data directory when unset.
    pub memory_dir: Option<PathBuf>,
    /// Summarize and clear the history once it holds this many turns.
    /// 0 keeps the sliding window only.
    pub compact_after_turns: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DialogueBackendKind {
    Anthropic,
    OpenAi,
    Ollama,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub backend: TtsBackend,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    /// Program and arguments for the `command` backend. It reads the text
    /// on stdin and writes a WAV to stdout. `{voice}`, `{speed}` and
    /// `{text}` in arguments are substituted; with `{text}` stdin is empty.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    OpenAi,
    /// A local program such as piper or espeak-ng.
    Command,
}

/// Pipeline wiring configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub barge_in: BargeIn,
    pub synthesis_workers: usize,
    pub frame_queue: usize,
    pub utterance_queue: usize,
    pub transcript_queue: usize,
    pub chunk_queue: usize,
    pub segment_queue: usize,
    pub request_timeout_secs: u64,
    /// Directory where every forwarded utterance is written as WAV.
    pub dump_audio: Option<PathBuf>,
}

/// What to do when the user starts speaking while a reply is playing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BargeIn {
    /// Stop playback and discard the rest of the reply.
    #[default]
    Interrupt,
    /// Keep playing. New speech is queued behind the reply.
    Ignore,
    /// Half-duplex: ignore the microphone while the assistant speaks.
    Mute,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
            channels: defaults::CHANNELS,
            input_device: None,
            output_device: None,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            min_utterance_ms: defaults::MIN_UTTERANCE_MS,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackend::OpenAi,
            model: None,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            allowed_languages: defaults::DEFAULT_ALLOWED_LANGUAGES
                .iter()
                .map(|l| l.to_string())
                .collect(),
            model_path: None,
        }
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            backend: DialogueBackendKind::Anthropic,
            model: None,
            max_tokens: defaults::MAX_TOKENS,
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            history_turns: defaults::HISTORY_TURNS,
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            tools: true,
            memory: true,
            memory_dir: None,
            compact_after_turns: defaults::COMPACT_AFTER_TURNS,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::OpenAi,
            model: defaults::DEFAULT_TTS_MODEL.to_string(),
            voice: defaults::DEFAULT_TTS_VOICE.to_string(),
            speed: defaults::DEFAULT_TTS_SPEED,
            command: Vec::new(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            barge_in: BargeIn::Interrupt,
            synthesis_workers: defaults::SYNTHESIS_WORKERS,
            frame_queue: defaults::FRAME_QUEUE_CAPACITY,
            utterance_queue: defaults::UTTERANCE_QUEUE_CAPACITY,
            transcript_queue: defaults::TRANSCRIPT_QUEUE_CAPACITY,
            chunk_queue: defaults::CHUNK_QUEUE_CAPACITY,
            segment_queue: defaults::SEGMENT_QUEUE_CAPACITY,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            dump_audio: None,
        }
    }
}

impl SttConfig {
    pub fn model_name(&self) -> &str {
        match (&self.model, self.backend) {
            (Some(model), _) => model,
            (None, SttBackend::OpenAi) => defaults::DEFAULT_STT_MODEL,
            (None, SttBackend::Whisper) => defaults::DEFAULT_WHISPER_MODEL,
        }
    }

    /// The forced language, or `None` for auto-detection.
    pub fn forced_language(&self) -> Option<&str> {
        if self.language.is_empty() || self.language == defaults::AUTO_LANGUAGE {
            None
        } else {
            Some(&self.language)
        }
    }
}

impl DialogueConfig {
    pub fn model_name(&self) -> &str {
        match (&self.model, self.backend) {
            (Some(model), _) => model,
            (None, DialogueBackendKind::Anthropic) => defaults::DEFAULT_ANTHROPIC_MODEL,
            (None, DialogueBackendKind::OpenAi) => defaults::DEFAULT_OPENAI_MODEL,
            (None, DialogueBackendKind::Ollama) => defaults::DEFAULT_OLLAMA_MODEL,
        }
    }
}

impl PipelineSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AudioConfig {
    /// Samples in one captured frame.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms as u64 / 1000) as usize
    }
}

impl FromStr for DialogueBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "unknown dialogue backend '{other}' (expected anthropic, openai or ollama)"
            )),
        }
    }
}

impl fmt::Display for DialogueBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

impl FromStr for BargeIn {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interrupt" => Ok(Self::Interrupt),
            "ignore" => Ok(Self::Ignore),
            "mute" => Ok(Self::Mute),
            other => Err(format!(
                "unknown barge-in mode '{other}' (expected interrupt, ignore or mute)"
            )),
        }
    }
}

/// Startup options that override the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub language: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub backend: Option<DialogueBackendKind>,
    pub model: Option<String>,
    pub no_barge_in: bool,
    pub dump_audio: Option<PathBuf>,
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Malformed TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ParleyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(ParleyError::Io(e)) => Err(ParleyError::Configuration {
                message: format!("cannot read {}: {e}", path.display()),
            }),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PARLEY_LANGUAGE → stt.language
    /// - PARLEY_INPUT_DEVICE → audio.input_device
    /// - PARLEY_OUTPUT_DEVICE → audio.output_device
    /// - PARLEY_DIALOGUE_BACKEND → dialogue.backend
    /// - PARLEY_DIALOGUE_MODEL → dialogue.model
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(language) = non_empty_env("PARLEY_LANGUAGE") {
            self.stt.language = language;
        }
        if let Some(device) = non_empty_env("PARLEY_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }
        if let Some(device) = non_empty_env("PARLEY_OUTPUT_DEVICE") {
            self.audio.output_device = Some(device);
        }
        if let Some(backend) = non_empty_env("PARLEY_DIALOGUE_BACKEND") {
            self.dialogue.backend =
                backend
                    .parse()
                    .map_err(|message| ParleyError::ConfigInvalidValue {
                        key: "PARLEY_DIALOGUE_BACKEND".to_string(),
                        message,
                    })?;
        }
        if let Some(model) = non_empty_env("PARLEY_DIALOGUE_MODEL") {
            self.dialogue.model = Some(model);
        }
        Ok(self)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(language) = &overrides.language {
            self.stt.language = language.clone();
        }
        if let Some(device) = &overrides.input_device {
            self.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &overrides.output_device {
            self.audio.output_device = Some(device.clone());
        }
        if let Some(backend) = overrides.backend {
            if backend != self.dialogue.backend && overrides.model.is_none() {
                // A model configured for one backend is meaningless on another.
                self.dialogue.model = None;
            }
            self.dialogue.backend = backend;
        }
        if let Some(model) = &overrides.model {
            self.dialogue.model = Some(model.clone());
        }
        if overrides.no_barge_in {
            self.pipeline.barge_in = BargeIn::Ignore;
        }
        if let Some(dir) = &overrides.dump_audio {
            self.pipeline.dump_audio = Some(dir.clone());
        }
        if let Some(timeout) = overrides.request_timeout {
            self.pipeline.request_timeout_secs = timeout.as_secs().max(1);
        }
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(ParleyError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate", "must be positive");
        }
        if self.audio.frame_duration_ms == 0 {
            return invalid("audio.frame_duration_ms", "must be positive");
        }
        if self.audio.frame_samples() == 0 {
            return invalid("audio.frame_duration_ms", "frame holds no samples");
        }
        if self.audio.channels != 1 {
            return invalid("audio.channels", "only mono capture is supported");
        }
        let threshold = self.vad.silence_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return invalid("vad.silence_threshold", "must be between 0 and 1");
        }
        if self.vad.silence_duration_ms == 0 {
            return invalid("vad.silence_duration_ms", "must be positive");
        }
        if self.vad.max_utterance_ms < self.vad.min_utterance_ms {
            return invalid(
                "vad.max_utterance_ms",
                "must not be shorter than vad.min_utterance_ms",
            );
        }
        if self.dialogue.max_attempts == 0 {
            return invalid("dialogue.max_attempts", "must be at least 1");
        }
        if self.dialogue.history_turns < 2 {
            return invalid("dialogue.history_turns", "must hold at least one exchange");
        }
        let compact = self.dialogue.compact_after_turns;
        if compact == 1 {
            return invalid("dialogue.compact_after_turns", "must be 0 or at least 2");
        }
        if compact > self.dialogue.history_turns {
            return invalid(
                "dialogue.compact_after_turns",
                "must not exceed dialogue.history_turns",
            );
        }
        if self.tts.speed <= 0.0 {
            return invalid("tts.speed", "must be positive");
        }
        if self.tts.backend == TtsBackend::Command
            && self.tts.command.first().is_none_or(|program| program.trim().is_empty())
        {
            return invalid("tts.command", "the command backend needs a program to run");
        }
        if self.pipeline.synthesis_workers == 0 {
            return invalid("pipeline.synthesis_workers", "must be at least 1");
        }
        let queues = [
            ("pipeline.frame_queue", self.pipeline.frame_queue),
            ("pipeline.utterance_queue", self.pipeline.utterance_queue),
            ("pipeline.transcript_queue", self.pipeline.transcript_queue),
            ("pipeline.chunk_queue", self.pipeline.chunk_queue),
            ("pipeline.segment_queue", self.pipeline.segment_queue),
        ];
        for (key, capacity) in queues {
            if capacity == 0 {
                return invalid(key, "queue capacity must be at least 1");
            }
        }
        if self.pipeline.request_timeout_secs == 0 {
            return invalid("pipeline.request_timeout_secs", "must be positive");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ParleyError::Configuration {
            message: format!("cannot serialize configuration: {e}"),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/parley/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("config.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Collaborator credentials and endpoints, read from the environment only.
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub ollama_host: String,
    pub ollama_port: u16,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("ollama_host", &self.ollama_host)
            .field("ollama_port", &self.ollama_port)
            .finish()
    }
}

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| non_empty_env(key))
    }

    /// Build credentials from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ollama_port = match lookup("OLLAMA_PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| ParleyError::ConfigInvalidValue {
                    key: "OLLAMA_PORT".to_string(),
                    message: format!("'{port}' is not a port number"),
                })?,
            None => defaults::OLLAMA_PORT,
        };

        Ok(Self {
            anthropic_api_key: lookup("ANTHROPIC_API_KEY"),
            openai_api_key: lookup("OPENAI_API_KEY"),
            openai_base_url: lookup("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string()),
            ollama_host: lookup("OLLAMA_HOST").unwrap_or_else(|| defaults::OLLAMA_HOST.to_string()),
            ollama_port,
        })
    }

    pub fn require_anthropic(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| ParleyError::MissingCredential {
                var: "ANTHROPIC_API_KEY".to_string(),
            })
    }

    pub fn require_openai(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ParleyError::MissingCredential {
                var: "OPENAI_API_KEY".to_string(),
            })
    }

    /// OpenAI-compatible endpoint of the local Ollama server.
    pub fn ollama_base_url(&self) -> String {
        let host = self.ollama_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}/v1", self.ollama_port)
        } else {
            format!("http://{host}:{}/v1", self.ollama_port)
        }
    }
}
