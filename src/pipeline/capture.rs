//! Capture loop: reads an audio source and feeds fixed-size frames into the
//! pipeline.

use crate::audio::recorder::AudioSource;
use crate::pipeline::control::PipelineControl;
use crate::pipeline::station::Outlet;
use crate::pipeline::types::AudioFrame;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Consecutive read errors tolerated before capture gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Wait between empty reads of a live source.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Start capturing on a dedicated thread.
///
/// A live source runs until shutdown. A finite source (a WAV file) stops
/// when exhausted; dropping the frame sender then lets every station drain
/// and stop in turn. Device failures request shutdown.
pub fn spawn_capture(
    mut source: Box<dyn AudioSource>,
    frame_samples: usize,
    tx: Sender<AudioFrame>,
    control: Arc<PipelineControl>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = source.start() {
            tracing::error!(error = %e, "failed to start audio capture");
            control.request_shutdown();
            return;
        }
        tracing::debug!(sample_rate = source.sample_rate(), frame_samples, "capture started");

        let outlet = Outlet::new(tx, control.clone());
        let frame_samples = frame_samples.max(1);
        let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);
        let mut sequence = 0u64;
        let mut consecutive_errors = 0u32;

        'capture: while !control.is_shutdown() {
            let samples = match source.read_samples() {
                Ok(samples) => {
                    consecutive_errors = 0;
                    samples
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, consecutive_errors, "audio read failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        tracing::error!("audio capture keeps failing, stopping");
                        control.request_shutdown();
                        break;
                    }
                    thread::sleep(EMPTY_READ_BACKOFF);
                    continue;
                }
            };

            if samples.is_empty() {
                if source.is_finite() {
                    tracing::info!(frames = sequence, "audio input exhausted");
                    break;
                }
                thread::sleep(EMPTY_READ_BACKOFF);
                continue;
            }

            pending.extend_from_slice(&samples);
            let mut start = 0;
            while pending.len() - start >= frame_samples {
                let frame = pending[start..start + frame_samples].to_vec();
                start += frame_samples;
                if outlet.send(AudioFrame::new(frame, Instant::now(), sequence)).is_err() {
                    break 'capture;
                }
                sequence += 1;
            }
            pending.drain(..start);
        }

        if let Err(e) = source.stop() {
            tracing::warn!(error = %e, "failed to stop audio capture");
        }
        tracing::debug!(frames = sequence, "capture stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MockAudioSource;
    use crossbeam_channel::bounded;

    #[test]
    fn test_finite_source_is_framed_then_closed() {
        let control = PipelineControl::new();
        let (tx, rx) = bounded(16);
        let source = MockAudioSource::new().with_chunks(vec![vec![1; 250], vec![2; 150]]);
        let handle = spawn_capture(Box::new(source), 160, tx, control.clone());

        let frames: Vec<AudioFrame> = rx.iter().collect();
        handle.join().unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert!(frames.iter().all(|f| f.samples.len() == 160));
        assert_eq!(frames[1].samples[89], 1);
        assert_eq!(frames[1].samples[90], 2);
        assert!(!control.is_shutdown());
    }

    #[test]
    fn test_start_failure_requests_shutdown() {
        let control = PipelineControl::new();
        let (tx, rx) = bounded(4);
        let source = MockAudioSource::new().with_start_failure();
        spawn_capture(Box::new(source), 160, tx, control.clone())
            .join()
            .unwrap();

        assert!(control.is_shutdown());
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_repeated_read_errors_request_shutdown() {
        let control = PipelineControl::new();
        let (tx, _rx) = bounded(4);
        let source = MockAudioSource::new().with_read_failure_after(0);
        spawn_capture(Box::new(source), 160, tx, control.clone())
            .join()
            .unwrap();

        assert!(control.is_shutdown());
    }

    #[test]
    fn test_live_source_stops_on_shutdown() {
        let control = PipelineControl::new();
        let (tx, rx) = bounded(4);
        let handle = spawn_capture(Box::new(MockAudioSource::new()), 160, tx, control.clone());

        assert!(rx.recv().is_ok());
        control.request_shutdown();
        handle.join().unwrap();
    }
}
