//! Speech-to-text backends and transcript clean-up.

pub mod openai;
pub mod transcriber;
pub mod whisper;

pub use transcriber::{MockTranscriber, Transcriber, TranscriptionResult};

use crate::config::{Credentials, SttBackend, SttConfig};
use crate::error::{ParleyError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Build the configured transcriber. Missing credentials or model files
/// fail here, at startup.
pub fn create_transcriber(
    config: &SttConfig,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Arc<dyn Transcriber>> {
    let transcriber: Arc<dyn Transcriber> = match config.backend {
        SttBackend::OpenAi => Arc::new(openai::OpenAiTranscriber::new(
            credentials.require_openai()?,
            &credentials.openai_base_url,
            config.model_name(),
            timeout,
        )?),
        SttBackend::Whisper => {
            let path = config
                .model_path
                .clone()
                .ok_or_else(|| ParleyError::ConfigInvalidValue {
                    key: "stt.model_path".to_string(),
                    message: "required for the whisper backend".to_string(),
                })?;
            Arc::new(whisper::WhisperTranscriber::new(whisper::WhisperConfig::new(
                path,
            ))?)
        }
    };
    tracing::info!(model = transcriber.model_name(), "transcriber ready");
    Ok(transcriber)
}

/// Remove non-speech annotations such as `[BLANK_AUDIO]`, `(music)` or
/// `*cough*`, then collapse whitespace. An opener without a matching closer
/// is kept as text.
pub fn clean_transcription(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        let after = &rest[c.len_utf8()..];
        let closer = match c {
            '[' => Some(']'),
            '(' => Some(')'),
            '*' => Some('*'),
            _ => None,
        };
        match closer.and_then(|close| after.find(close).map(|i| (i, close))) {
            Some((i, close)) => rest = &after[i + close.len_utf8()..],
            None => {
                out.push(c);
                rest = after;
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the text contains anything a person could have said.
pub fn has_speech_content(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_backend_requires_model_path() {
        let config = SttConfig {
            backend: SttBackend::Whisper,
            model_path: None,
            ..SttConfig::default()
        };
        let credentials = Credentials::from_lookup(|_| None).unwrap();
        let err = create_transcriber(&config, &credentials, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ParleyError::ConfigInvalidValue { .. }));
    }

    #[test]
    fn test_openai_backend_requires_key() {
        let credentials = Credentials::from_lookup(|_| None).unwrap();
        let err = create_transcriber(&SttConfig::default(), &credentials, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ParleyError::MissingCredential { .. }));
    }

    #[test]
    fn test_clean_strips_annotations() {
        assert_eq!(clean_transcription("[BLANK_AUDIO]"), "");
        assert_eq!(clean_transcription(" (music) hello  there *cough*"), "hello there");
        assert_eq!(clean_transcription("plain text."), "plain text.");
    }

    #[test]
    fn test_clean_keeps_unmatched_opener() {
        assert_eq!(clean_transcription("hi [inaudible"), "hi [inaudible");
        assert_eq!(clean_transcription("2 * 3"), "2 * 3");
    }

    #[test]
    fn test_speech_content() {
        assert!(has_speech_content("ok"));
        assert!(has_speech_content("こんにちは"));
        assert!(!has_speech_content("..."));
        assert!(!has_speech_content("  ♪ ♪ "));
        assert!(!has_speech_content(""));
    }
}
