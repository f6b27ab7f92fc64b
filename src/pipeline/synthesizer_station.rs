//! Synthesizer station: reply chunks in, audio segments out.
//!
//! Several instances may share one input queue. Segments can then leave
//! out of order; playback restores the order by `(exchange, index)`.

use crate::pipeline::control::PipelineControl;
use crate::pipeline::error::StationError;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{AudioSegment, ReplyChunk};
use crate::tts::synthesizer::Synthesizer;
use std::sync::Arc;
use std::time::Instant;

pub struct SynthesizerStation {
    synthesizer: Arc<dyn Synthesizer>,
    control: Arc<PipelineControl>,
    worker: usize,
}

impl SynthesizerStation {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, control: Arc<PipelineControl>) -> Self {
        Self {
            synthesizer,
            control,
            worker: 0,
        }
    }

    /// Worker number, for logs only.
    pub fn with_worker(mut self, worker: usize) -> Self {
        self.worker = worker;
        self
    }
}

impl Station for SynthesizerStation {
    type Input = ReplyChunk;
    type Output = AudioSegment;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    fn process(&mut self, chunk: ReplyChunk, out: &Outlet<AudioSegment>) -> Result<(), StationError> {
        if self.control.is_cancelled(chunk.exchange) {
            tracing::trace!(exchange = chunk.exchange, index = chunk.index, "dropping cancelled chunk");
            return Ok(());
        }

        if chunk.text.trim().is_empty() {
            return out.send(AudioSegment::skipped(chunk));
        }

        let start = Instant::now();
        let result = self.synthesizer.synthesize(&chunk.text);
        if self.control.is_cancelled(chunk.exchange) {
            return Ok(());
        }

        match result {
            Ok(audio) => {
                tracing::debug!(
                    worker = self.worker,
                    exchange = chunk.exchange,
                    index = chunk.index,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    samples = audio.samples.len(),
                    "chunk synthesized"
                );
                out.send(AudioSegment {
                    exchange: chunk.exchange,
                    index: chunk.index,
                    is_final: chunk.is_final,
                    samples: audio.samples,
                    sample_rate: audio.sample_rate,
                    permit: chunk.permit,
                })
            }
            Err(e) => {
                let (exchange, index) = (chunk.exchange, chunk.index);
                // Playback still needs the slot, or it would wait forever.
                out.send(AudioSegment::skipped(chunk))?;
                Err(StationError::Recoverable(format!(
                    "Synthesis of chunk {index} in exchange {exchange} failed: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::synthesizer::MockSynthesizer;
    use crossbeam_channel::{Receiver, bounded};

    fn chunk(exchange: u64, index: u32, text: &str, is_final: bool) -> ReplyChunk {
        ReplyChunk {
            exchange,
            index,
            text: text.to_string(),
            is_final,
            permit: None,
        }
    }

    fn setup(mock: MockSynthesizer) -> (SynthesizerStation, Outlet<AudioSegment>, Receiver<AudioSegment>, Arc<PipelineControl>) {
        let control = PipelineControl::new();
        let (tx, rx) = bounded(8);
        let station = SynthesizerStation::new(Arc::new(mock), control.clone());
        (station, Outlet::new(tx, control.clone()), rx, control)
    }

    #[test]
    fn test_synthesizes_chunk() {
        let (mut station, outlet, rx, control) = setup(MockSynthesizer::new());
        let exchange = control.begin_exchange();
        station.process(chunk(exchange, 0, "Hello.", false), &outlet).unwrap();

        let segment = rx.try_recv().unwrap();
        assert_eq!(segment.key(), (exchange, 0));
        assert_eq!(segment.sample_rate, MockSynthesizer::SAMPLE_RATE);
        assert_eq!(MockSynthesizer::decode(&segment.samples), "Hello.");
    }

    #[test]
    fn test_empty_text_becomes_skipped_segment() {
        let mock = MockSynthesizer::new();
        let (mut station, outlet, rx, control) = setup(mock.clone());
        let exchange = control.begin_exchange();
        station.process(chunk(exchange, 3, "  ", true), &outlet).unwrap();

        let segment = rx.try_recv().unwrap();
        assert!(segment.is_skipped());
        assert!(segment.is_final);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_failure_keeps_the_slot() {
        let (mut station, outlet, rx, control) = setup(MockSynthesizer::new().fail_on("Broken."));
        let exchange = control.begin_exchange();
        let err = station
            .process(chunk(exchange, 1, "Broken.", false), &outlet)
            .unwrap_err();
        assert!(matches!(err, StationError::Recoverable(_)));

        let segment = rx.try_recv().unwrap();
        assert_eq!(segment.key(), (exchange, 1));
        assert!(segment.is_skipped());
    }

    #[test]
    fn test_cancelled_chunks_are_dropped() {
        let mock = MockSynthesizer::new();
        let (mut station, outlet, rx, control) = setup(mock.clone());
        let exchange = control.begin_exchange();
        control.interrupt();

        station.process(chunk(exchange, 0, "Too late.", false), &outlet).unwrap();
        assert!(rx.try_recv().is_err());
        assert!(mock.calls().is_empty());
    }
}
