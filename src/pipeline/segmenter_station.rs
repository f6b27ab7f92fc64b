//! Station that turns audio frames into utterances and detects barge-in.

use crate::audio::vad::{calculate_rms, rms_to_dbfs};
use crate::audio::wav::UtteranceDump;
use crate::config::BargeIn;
use crate::pipeline::control::PipelineControl;
use crate::pipeline::error::StationError;
use crate::pipeline::segmenter::{Segmenter, SegmenterConfig};
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{AudioFrame, Utterance};
use std::sync::Arc;

pub struct SegmenterStation {
    segmenter: Segmenter,
    control: Arc<PipelineControl>,
    barge_in: BargeIn,
    min_utterance_ms: u64,
    dump: Option<UtteranceDump>,
    muted: bool,
}

impl SegmenterStation {
    pub fn new(config: SegmenterConfig, control: Arc<PipelineControl>) -> Self {
        Self {
            segmenter: Segmenter::new(config),
            control,
            barge_in: BargeIn::default(),
            min_utterance_ms: 0,
            dump: None,
            muted: false,
        }
    }

    pub fn with_barge_in(mut self, barge_in: BargeIn) -> Self {
        self.barge_in = barge_in;
        self
    }

    /// Utterances shorter than this are treated as noise and dropped.
    pub fn with_min_utterance_ms(mut self, min_utterance_ms: u64) -> Self {
        self.min_utterance_ms = min_utterance_ms;
        self
    }

    pub fn with_dump(mut self, dump: Option<UtteranceDump>) -> Self {
        self.dump = dump;
        self
    }

    fn on_onset(&self, level: f32) {
        tracing::debug!(dbfs = rms_to_dbfs(level), "speech onset");
        if self.barge_in != BargeIn::Interrupt || !self.control.is_speaking() {
            return;
        }
        if let Some(exchange) = self.control.interrupt() {
            tracing::info!(exchange, "user barged in, cancelling reply");
        }
    }
}

impl Station for SegmenterStation {
    type Input = AudioFrame;
    type Output = Utterance;

    fn name(&self) -> &'static str {
        "segmenter"
    }

    fn process(&mut self, frame: AudioFrame, out: &Outlet<Utterance>) -> Result<(), StationError> {
        if self.barge_in == BargeIn::Mute && self.control.is_speaking() {
            if !self.muted {
                self.segmenter.reset();
                self.muted = true;
                tracing::debug!("microphone muted while the assistant speaks");
            }
            return Ok(());
        }
        self.muted = false;

        let was_speaking = self.segmenter.is_speaking();
        let level = calculate_rms(&frame.samples);
        let utterance = self.segmenter.feed(frame);
        if !was_speaking && (self.segmenter.is_speaking() || utterance.is_some()) {
            self.on_onset(level);
        }

        let Some(utterance) = utterance else {
            return Ok(());
        };

        if utterance.duration_ms() < self.min_utterance_ms {
            tracing::debug!(
                duration_ms = utterance.duration_ms(),
                min_ms = self.min_utterance_ms,
                "discarding short utterance"
            );
            return Ok(());
        }

        tracing::debug!(
            sequence = utterance.sequence,
            duration_ms = utterance.duration_ms(),
            reason = ?self.segmenter.last_reason(),
            "utterance complete"
        );

        if let Some(dump) = &self.dump {
            match dump.write(utterance.sequence, &utterance.samples, utterance.sample_rate) {
                Ok(path) => tracing::debug!(path = %path.display(), "utterance written"),
                Err(e) => tracing::warn!(error = %e, "failed to dump utterance"),
            }
        }

        out.send(utterance)
    }
}
