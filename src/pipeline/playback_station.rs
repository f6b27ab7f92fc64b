//! Playback station: plays audio segments strictly in reply order.

use crate::audio::output::{AudioOutput, PlaybackOutcome};
use crate::pipeline::control::PipelineControl;
use crate::pipeline::error::StationError;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::AudioSegment;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reorders segments by `(exchange, index)` and plays them one at a time.
///
/// An exchange starts only with its segment 0 and ends with its final
/// segment. Segments of cancelled or already finished exchanges are
/// discarded without playing.
pub struct PlaybackStation {
    output: Box<dyn AudioOutput>,
    control: Arc<PipelineControl>,
    pending: BTreeMap<(u64, u32), AudioSegment>,
    /// Exchange being played and the index it waits for next.
    current: Option<(u64, u32)>,
    finished_through: u64,
    clips_played: u64,
}

impl PlaybackStation {
    pub fn new(output: Box<dyn AudioOutput>, control: Arc<PipelineControl>) -> Self {
        Self {
            output,
            control,
            pending: BTreeMap::new(),
            current: None,
            finished_through: 0,
            clips_played: 0,
        }
    }

    fn is_stale(&self, exchange: u64) -> bool {
        exchange <= self.finished_through || self.control.is_cancelled(exchange)
    }

    fn discard_stale(&mut self) {
        if let Some((exchange, _)) = self.current
            && self.control.is_cancelled(exchange)
        {
            self.current = None;
            self.control.set_speaking(false);
            tracing::info!(exchange, "playback flushed");
        }

        let before = self.pending.len();
        let finished_through = self.finished_through;
        let control = self.control.clone();
        self.pending
            .retain(|&(exchange, _), _| exchange > finished_through && !control.is_cancelled(exchange));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded stale segments");
        }
    }

    fn next_segment(&mut self) -> Option<AudioSegment> {
        match self.current {
            Some(key) => self.pending.remove(&key),
            None => {
                let (&key, _) = self.pending.first_key_value()?;
                if key.1 != 0 {
                    return None;
                }
                self.current = Some(key);
                self.pending.remove(&key)
            }
        }
    }

    /// Play everything that is ready, in order.
    fn drain(&mut self) -> Result<(), StationError> {
        loop {
            if self.control.is_shutdown() {
                return Ok(());
            }
            self.discard_stale();
            let Some(mut segment) = self.next_segment() else {
                return Ok(());
            };
            let (exchange, index) = segment.key();

            // The reply is now audible, so the next turn may be listened for.
            drop(segment.permit.take());
            if index == 0 {
                self.control.set_speaking(true);
                tracing::debug!(exchange, "speaking");
            }

            if !segment.is_skipped() {
                let control = self.control.clone();
                // Shutdown lets the clip in flight finish; drain starts no new one.
                let stop = move || control.is_cancelled(exchange);
                let outcome = self
                    .output
                    .play(&segment.samples, segment.sample_rate, &stop)
                    .map_err(|e| StationError::from_parley(&e))?;
                self.clips_played += 1;
                if outcome == PlaybackOutcome::Stopped {
                    tracing::debug!(exchange, index, "clip stopped early");
                }
            }

            if segment.is_final {
                self.finished_through = exchange;
                self.current = None;
                self.control.set_speaking(false);
                tracing::debug!(exchange, "reply finished");
            } else {
                self.current = Some((exchange, index + 1));
            }
        }
    }
}

impl Station for PlaybackStation {
    type Input = AudioSegment;
    type Output = ();

    fn name(&self) -> &'static str {
        "playback"
    }

    fn process(&mut self, segment: AudioSegment, _out: &Outlet<()>) -> Result<(), StationError> {
        if self.is_stale(segment.exchange) {
            tracing::trace!(exchange = segment.exchange, index = segment.index, "dropping stale segment");
            return Ok(());
        }
        self.pending.insert(segment.key(), segment);
        self.drain()
    }

    fn idle(&mut self, _out: &Outlet<()>) -> Result<(), StationError> {
        self.drain()
    }

    fn shutdown(&mut self) {
        self.control.set_speaking(false);
        tracing::debug!(
            clips = self.clips_played,
            unplayed = self.pending.len(),
            "playback stopped"
        );
    }
}
