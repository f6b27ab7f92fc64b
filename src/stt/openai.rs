//! Transcription through an OpenAI-compatible `/audio/transcriptions` endpoint.

use crate::audio::wav::encode_wav;
use crate::error::{ParleyError, Result};
use crate::http;
use crate::stt::transcriber::{Transcriber, TranscriptionResult};
use reqwest::blocking::multipart;
use serde::Deserialize;
use std::time::Duration;

/// Remote Whisper-API transcriber.
pub struct OpenAiTranscriber {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTranscriber")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

impl OpenAiTranscriber {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

/// verbose_json reports languages by name ("english"); map the common ones
/// back to codes so they compare against `allowed_languages`.
fn normalize_language(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    let code = match lower.as_str() {
        "english" => "en",
        "japanese" => "ja",
        "spanish" => "es",
        "french" => "fr",
        "german" => "de",
        "italian" => "it",
        "portuguese" => "pt",
        "chinese" => "zh",
        "korean" => "ko",
        "russian" => "ru",
        "dutch" => "nl",
        _ => return lower,
    };
    code.to_string()
}

impl Transcriber for OpenAiTranscriber {
    fn transcribe(
        &self,
        audio: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let wav = encode_wav(audio, sample_rate)?;
        let file = multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(ParleyError::Http)?;

        let mut form = multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        tracing::debug!(
            model = %self.model,
            samples = audio.len(),
            language = language.unwrap_or("auto"),
            "sending transcription request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| http::transport_error("transcription", e))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| http::transport_error("transcription", e))?;
        if !status.is_success() {
            return Err(ParleyError::Transcription {
                message: format!("HTTP {}: {}", status.as_u16(), http::excerpt(&body)),
            });
        }

        let parsed: VerboseTranscription =
            serde_json::from_str(&body).map_err(|e| ParleyError::Transcription {
                message: format!("unexpected transcription response: {e}"),
            })?;

        Ok(TranscriptionResult {
            text: parsed.text.trim().to_string(),
            language: parsed
                .language
                .as_deref()
                .filter(|l| !l.is_empty())
                .map(normalize_language),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
