use crate::error::{ParleyError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mono PCM produced for one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Text-to-speech. Stateless per call and shared between worker threads.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;

    fn name(&self) -> &str;
}

impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        (**self).synthesize(text)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock synthesizer for testing.
///
/// The "audio" is the UTF-8 bytes of the text, one sample per byte, so a
/// played clip can be decoded back with [`MockSynthesizer::decode`].
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    fail_on: Vec<String>,
    delays: HashMap<String, Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub const SAMPLE_RATE: u32 = 24000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Fail whenever the text equals `text`.
    pub fn fail_on(mut self, text: &str) -> Self {
        self.fail_on.push(text.to_string());
        self
    }

    /// Take this long to synthesize `text`.
    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    /// Texts received, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn encode(text: &str) -> Vec<i16> {
        text.bytes().map(|b| b as i16).collect()
    }

    pub fn decode(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().map(|&s| s as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        if let Some(delay) = self.delays.get(text) {
            std::thread::sleep(*delay);
        }
        if self.fail_on.iter().any(|t| t == text) {
            return Err(ParleyError::Synthesis {
                message: format!("mock synthesis failure for {text:?}"),
            });
        }
        Ok(SynthesizedAudio {
            samples: Self::encode(text),
            sample_rate: Self::SAMPLE_RATE,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
