use crate::error::{ParleyError, Result};
use std::collections::VecDeque;

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples arrived since the last call. May be empty.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Sample rate of the samples returned by [`read_samples`](Self::read_samples).
    fn sample_rate(&self) -> u32;

    /// A finite source is exhausted once it returns an empty read.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    chunks: VecDeque<Vec<i16>>,
    repeat: Option<Vec<i16>>,
    sample_rate: u32,
    should_fail_start: bool,
    fail_read_after: Option<usize>,
    reads: usize,
    error_message: String,
}

impl MockAudioSource {
    /// Create a mock that returns 10ms of silence on every read, forever.
    pub fn new() -> Self {
        Self {
            is_started: false,
            chunks: VecDeque::new(),
            repeat: Some(vec![0i16; 160]),
            sample_rate: crate::defaults::SAMPLE_RATE,
            should_fail_start: false,
            fail_read_after: None,
            reads: 0,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Return these samples on every read, forever.
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.repeat = Some(samples);
        self.chunks.clear();
        self
    }

    /// Return the given chunks in order, then report exhaustion.
    pub fn with_chunks(mut self, chunks: Vec<Vec<i16>>) -> Self {
        self.chunks = chunks.into();
        self.repeat = None;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Succeed for `reads` reads, then fail every read after.
    pub fn with_read_failure_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    fn device_error(&self) -> ParleyError {
        ParleyError::Device {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(self.device_error())
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if let Some(limit) = self.fail_read_after
            && self.reads >= limit
        {
            return Err(self.device_error());
        }
        self.reads += 1;

        if let Some(samples) = &self.repeat {
            return Ok(samples.clone());
        }
        Ok(self.chunks.pop_front().unwrap_or_default())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.repeat.is_none()
    }
}
