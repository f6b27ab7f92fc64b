//! Text-to-speech backends.

pub mod command;
pub mod openai;
pub mod synthesizer;

pub use synthesizer::{MockSynthesizer, SynthesizedAudio, Synthesizer};

use crate::config::{Credentials, TtsBackend, TtsConfig};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured synthesizer. Missing credentials fail here.
pub fn create_synthesizer(
    config: &TtsConfig,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Arc<dyn Synthesizer>> {
    match config.backend {
        TtsBackend::OpenAi => Ok(Arc::new(openai::OpenAiSynthesizer::new(
            credentials.require_openai()?,
            &credentials.openai_base_url,
            &config.model,
            &config.voice,
            config.speed,
            timeout,
        )?)),
        TtsBackend::Command => Ok(Arc::new(command::CommandSynthesizer::new(
            &config.command,
            &config.voice,
            config.speed,
            timeout,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_backend_needs_no_credentials() {
        let config = TtsConfig {
            backend: TtsBackend::Command,
            command: vec!["piper".to_string(), "--output_file".to_string(), "-".to_string()],
            ..TtsConfig::default()
        };
        let synth = create_synthesizer(&config, &Credentials::default(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(synth.name(), "command");
    }

    #[test]
    fn test_openai_backend_requires_key() {
        let config = TtsConfig::default();
        let err = create_synthesizer(&config, &Credentials::default(), Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
