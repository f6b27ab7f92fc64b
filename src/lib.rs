//! parley - talk to a language model, out loud
//!
//! Listens on the microphone, transcribes each utterance, streams a reply
//! from a language model and speaks it back, one exchange at a time.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dialogue;
pub mod error;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod stt;
pub mod tts;

// Collaborator traits
pub use audio::output::AudioOutput;
pub use audio::recorder::AudioSource;
pub use dialogue::engine::DialogueBackend;
pub use stt::transcriber::Transcriber;
pub use tts::synthesizer::Synthesizer;

// Pipeline
pub use pipeline::orchestrator::{Pipeline, PipelineConfig, PipelineHandle, PipelineReport, VoiceBackends};

// Error handling
pub use error::{ParleyError, Result};

// Config
pub use config::{Config, Credentials};

// Station framework
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{version}+{hash}"),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {ver}"
        );
    }

    #[test]
    fn test_version_string_hash_is_separated_by_plus() {
        let ver = version_string();
        if let Some((_, hash)) = ver.split_once('+') {
            assert!(!hash.is_empty());
        }
    }

    #[test]
    fn test_default_build_has_microphone_and_speaker() {
        let manifest: toml::Table = toml::from_str(include_str!("../Cargo.toml")).unwrap();
        let features = manifest["features"].as_table().unwrap();
        let names = |key: &str| -> Vec<String> {
            features[key]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        };
        assert_eq!(names("default"), vec!["full"]);
        assert!(names("full").contains(&"cpal-audio".to_string()));
        assert!(names("full").contains(&"whisper".to_string()));
    }
}
