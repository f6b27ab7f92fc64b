//! Speech through an OpenAI-compatible `/audio/speech` endpoint.

use crate::audio::wav::decode_pcm_le;
use crate::defaults::TTS_SAMPLE_RATE;
use crate::error::{ParleyError, Result};
use crate::http;
use crate::tts::synthesizer::{SynthesizedAudio, Synthesizer};
use serde_json::json;
use std::time::Duration;

/// Requests raw `pcm` output: 24 kHz mono signed 16-bit little-endian.
pub struct OpenAiSynthesizer {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    speed: f32,
}

impl std::fmt::Debug for OpenAiSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSynthesizer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("speed", &self.speed)
            .finish_non_exhaustive()
    }
}

impl OpenAiSynthesizer {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        voice: &str,
        speed: f32,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            voice: voice.to_string(),
            speed,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }

    fn body(&self, text: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "speed": self.speed,
            "response_format": "pcm",
        })
    }
}

impl Synthesizer for OpenAiSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        tracing::debug!(model = %self.model, voice = %self.voice, chars = text.len(), "speech request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.body(text))
            .send()
            .map_err(|e| http::transport_error("speech synthesis", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ParleyError::Synthesis {
                message: format!("HTTP {}: {}", status.as_u16(), http::excerpt(&body)),
            });
        }

        let bytes = response
            .bytes()
            .map_err(|e| http::transport_error("speech synthesis", e))?;
        Ok(SynthesizedAudio {
            samples: decode_pcm_le(&bytes),
            sample_rate: TTS_SAMPLE_RATE,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
