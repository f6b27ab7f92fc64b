use crate::error::{ParleyError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of one transcription call.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    /// Detected language code, if the backend reports one.
    pub language: Option<String>,
}

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (HTTP API, local Whisper, mock).
/// Implementations are stateless per call.
pub trait Transcriber: Send + Sync {
    /// Transcribe mono 16-bit PCM audio.
    ///
    /// `language` is a hint; `None` asks the backend to detect it.
    fn transcribe(
        &self,
        audio: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<TranscriptionResult>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool {
        true
    }
}

/// Implement Transcriber for Arc<T> to allow sharing.
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(
        &self,
        audio: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        (**self).transcribe(audio, sample_rate, language)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing
///
/// Scripted responses are returned in order, then the default response
/// repeats.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    language: Option<String>,
    script: Arc<Mutex<VecDeque<Option<String>>>>,
    should_fail: bool,
    delay: Duration,
    calls: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            language: Some("en".to_string()),
            script: Arc::new(Mutex::new(VecDeque::new())),
            should_fail: false,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queue one response. `None` queues a failure.
    pub fn then(self, response: Option<&str>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response.map(str::to_string));
        }
        self
    }

    /// Detected language reported with every response.
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language.map(str::to_string);
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Block every call for this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Language hints received, one entry per call.
    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn failure() -> ParleyError {
        ParleyError::Transcription {
            message: "mock transcription failure".to_string(),
        }
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(
        &self,
        _audio: &[i16],
        _sample_rate: u32,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(language.map(str::to_string));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.should_fail {
            return Err(Self::failure());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let text = match scripted {
            Some(Some(text)) => text,
            Some(None) => return Err(Self::failure()),
            None => self.response.clone(),
        };

        Ok(TranscriptionResult {
            text,
            language: self.language.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}
