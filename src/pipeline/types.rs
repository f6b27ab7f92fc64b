//! Data handed between pipeline stations.
//!
//! Every item is moved through a channel and owned by exactly one station at
//! a time. Items that carry a [`TurnPermit`] release it when dropped, so an
//! exchange discarded anywhere in the pipeline lets the next one start.

use crate::pipeline::control::TurnPermit;
use std::time::{Duration, Instant};

/// A frame of raw audio samples with timing information.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Timestamp when this frame was captured.
    pub timestamp: Instant,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(samples: Vec<i16>, timestamp: Instant, sequence: u64) -> Self {
        Self {
            samples,
            timestamp,
            sequence,
        }
    }
}

/// One detected speech episode, from onset through the end of the trailing
/// silence run.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Sequence number of the onset frame.
    pub first_frame: u64,
    /// Sequence number of the last frame included.
    pub last_frame: u64,
    /// Utterance counter assigned by the segmenter.
    pub sequence: u64,
}

impl Utterance {
    pub fn frame_count(&self) -> u64 {
        self.last_frame - self.first_frame + 1
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / self.sample_rate as u64)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration().as_millis() as u64
    }
}

/// Transcribed user speech that starts an exchange.
#[derive(Debug)]
pub struct Transcript {
    pub text: String,
    /// Language tag, detected or forced.
    pub language: String,
    /// Exchange identifier, strictly increasing over the session.
    pub exchange: u64,
    pub permit: Option<TurnPermit>,
}

/// One piece of generated reply text.
#[derive(Debug)]
pub struct ReplyChunk {
    pub exchange: u64,
    /// Position within the reply, starting at 0.
    pub index: u32,
    /// May be empty, e.g. the closing marker of a streamed reply.
    pub text: String,
    /// Last chunk of the reply.
    pub is_final: bool,
    /// Carried by the first chunk only.
    pub permit: Option<TurnPermit>,
}

/// Synthesized audio for exactly one [`ReplyChunk`].
#[derive(Debug)]
pub struct AudioSegment {
    pub exchange: u64,
    pub index: u32,
    pub is_final: bool,
    /// Empty when the chunk had no text or its synthesis failed.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub permit: Option<TurnPermit>,
}

impl AudioSegment {
    /// A segment that keeps the ordering slot of a chunk without any audio.
    pub fn skipped(chunk: ReplyChunk) -> Self {
        Self {
            exchange: chunk.exchange,
            index: chunk.index,
            is_final: chunk.is_final,
            samples: Vec::new(),
            sample_rate: 0,
            permit: chunk.permit,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.samples.is_empty()
    }

    /// Ordering key used by playback.
    pub fn key(&self) -> (u64, u32) {
        (self.exchange, self.index)
    }
}
