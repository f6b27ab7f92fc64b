//! Transcriber station: utterance audio in, transcripts that open an
//! exchange out.

use crate::pipeline::control::{PipelineControl, TurnGate, TurnPermit};
use crate::pipeline::error::StationError;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{Transcript, Utterance};
use crate::stt::transcriber::Transcriber;
use crate::stt::{clean_transcription, has_speech_content};
use std::sync::Arc;
use std::time::Instant;

/// Language tag used when nothing was forced or detected.
const FALLBACK_LANGUAGE: &str = "en";

/// Takes one utterance per turn permit, so only one exchange is in flight.
pub struct TranscriberStation {
    transcriber: Arc<dyn Transcriber>,
    control: Arc<PipelineControl>,
    gate: TurnGate,
    permit: Option<TurnPermit>,
    forced_language: Option<String>,
    allowed_languages: Vec<String>,
    warned_backpressure: bool,
}

impl TranscriberStation {
    pub fn new(transcriber: Arc<dyn Transcriber>, control: Arc<PipelineControl>, gate: TurnGate) -> Self {
        Self {
            transcriber,
            control,
            gate,
            permit: None,
            forced_language: None,
            allowed_languages: Vec::new(),
            warned_backpressure: false,
        }
    }

    /// Pass this language to the backend and tag every transcript with it.
    pub fn with_forced_language(mut self, language: Option<String>) -> Self {
        self.forced_language = language;
        self
    }

    /// Drop transcripts detected in any other language. Empty allows all.
    pub fn with_allowed_languages(mut self, languages: Vec<String>) -> Self {
        self.allowed_languages = languages.into_iter().map(|l| l.to_lowercase()).collect();
        self
    }

    fn language_allowed(&self, language: &str) -> bool {
        self.allowed_languages.is_empty()
            || self.allowed_languages.iter().any(|l| l == &language.to_lowercase())
    }

    fn resolve_language(&self, detected: Option<String>) -> Result<String, String> {
        if let Some(forced) = &self.forced_language {
            return Ok(forced.clone());
        }
        match detected {
            Some(language) if self.language_allowed(&language) => Ok(language),
            Some(language) => Err(language),
            None => Ok(self
                .allowed_languages
                .first()
                .cloned()
                .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string())),
        }
    }
}

impl Station for TranscriberStation {
    type Input = Utterance;
    type Output = Transcript;

    fn name(&self) -> &'static str {
        "transcriber"
    }

    fn prepare(&mut self) -> Result<(), StationError> {
        if self.permit.is_none() {
            self.permit = Some(self.gate.acquire(&self.control).ok_or(StationError::Closed)?);
        }
        Ok(())
    }

    fn process(&mut self, utterance: Utterance, out: &Outlet<Transcript>) -> Result<(), StationError> {
        // Held until the transcript is forwarded. Every early return frees it.
        let Some(permit) = self.permit.take() else {
            return Err(StationError::Closed);
        };

        let start = Instant::now();
        let duration_ms = utterance.duration_ms();
        let result = self
            .transcriber
            .transcribe(&utterance.samples, utterance.sample_rate, self.forced_language.as_deref())
            .map_err(|e| StationError::Recoverable(format!("Transcription failed: {e}")))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if !self.warned_backpressure && elapsed_ms > duration_ms {
            self.warned_backpressure = true;
            tracing::warn!(
                elapsed_ms,
                audio_ms = duration_ms,
                model = self.transcriber.model_name(),
                "transcription slower than real time"
            );
        }

        let text = clean_transcription(&result.text);
        if !has_speech_content(&text) {
            tracing::debug!(raw = %result.text, "no speech in transcription");
            return Ok(());
        }

        let language = match self.resolve_language(result.language) {
            Ok(language) => language,
            Err(rejected) => {
                tracing::info!(language = %rejected, text = %text, "dropping transcript in unexpected language");
                return Ok(());
            }
        };

        if self.control.is_shutdown() {
            return Err(StationError::Closed);
        }

        let exchange = self.control.begin_exchange();
        tracing::info!(exchange, language = %language, elapsed_ms, "heard: {text}");
        out.send(Transcript {
            text,
            language,
            exchange,
            permit: Some(permit),
        })
    }
}
