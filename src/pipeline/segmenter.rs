//! Voice activity segmentation state machine.
//!
//! Pure and synchronous: timing is derived from sample counts, never from a
//! wall clock, so the same frames always produce the same utterances.

use crate::audio::vad::is_speech;
use crate::config::VadConfig;
use crate::pipeline::types::{AudioFrame, Utterance};

/// Parameters for [`Segmenter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    /// RMS level above which a frame is speech.
    pub silence_threshold: f32,
    /// Consecutive silence that ends an utterance.
    pub silence_duration_ms: u32,
    /// Force emission once an utterance reaches this length. 0 disables.
    pub max_utterance_ms: u32,
    pub sample_rate: u32,
}

impl SegmenterConfig {
    pub fn from_vad(vad: &VadConfig, sample_rate: u32) -> Self {
        Self {
            silence_threshold: vad.silence_threshold,
            silence_duration_ms: vad.silence_duration_ms,
            max_utterance_ms: vad.max_utterance_ms,
            sample_rate,
        }
    }
}

/// Why an utterance was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitReason {
    Silence,
    MaxDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Speaking,
}

/// Groups frames into utterances.
#[derive(Debug)]
pub struct Segmenter {
    config: SegmenterConfig,
    state: SegmenterState,
    buffer: Vec<i16>,
    first_frame: u64,
    last_frame: u64,
    silence_samples: u64,
    next_sequence: u64,
    last_reason: Option<EmitReason>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            first_frame: 0,
            last_frame: 0,
            silence_samples: 0,
            next_sequence: 0,
            last_reason: None,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == SegmenterState::Speaking
    }

    /// Reason for the most recent emission.
    pub fn last_reason(&self) -> Option<EmitReason> {
        self.last_reason
    }

    /// Feed one frame. Returns a complete utterance when one ends here.
    pub fn feed(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let speech = is_speech(&frame.samples, self.config.silence_threshold);

        match self.state {
            SegmenterState::Idle => {
                if !speech {
                    return None;
                }
                self.state = SegmenterState::Speaking;
                self.first_frame = frame.sequence;
                self.silence_samples = 0;
            }
            SegmenterState::Speaking => {
                if speech {
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += frame.samples.len() as u64;
                }
            }
        }

        self.last_frame = frame.sequence;
        self.buffer.extend_from_slice(&frame.samples);

        if self.reached(self.silence_samples, self.config.silence_duration_ms) {
            return Some(self.emit(EmitReason::Silence));
        }
        if self.config.max_utterance_ms > 0
            && self.reached(self.buffer.len() as u64, self.config.max_utterance_ms)
        {
            return Some(self.emit(EmitReason::MaxDuration));
        }
        None
    }

    /// Drop any partial utterance and return to idle.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.silence_samples = 0;
    }

    fn reached(&self, samples: u64, duration_ms: u32) -> bool {
        duration_ms > 0 && samples * 1000 >= duration_ms as u64 * self.config.sample_rate as u64
    }

    fn emit(&mut self, reason: EmitReason) -> Utterance {
        let utterance = Utterance {
            samples: std::mem::take(&mut self.buffer),
            sample_rate: self.config.sample_rate,
            first_frame: self.first_frame,
            last_frame: self.last_frame,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.last_reason = Some(reason);
        self.state = SegmenterState::Idle;
        self.silence_samples = 0;
        utterance
    }
}
