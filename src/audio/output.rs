//! Audio output: the playback trait, a recording mock and the speaker backend.

use crate::error::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a call to [`AudioOutput::play`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    /// `stop` returned true before the clip ended. Queued audio was dropped.
    Stopped,
}

/// Sequential playback to an output device.
///
/// `play` blocks until the clip has been rendered or `stop` returns true.
/// Implementations poll `stop` at least every few tens of milliseconds.
pub trait AudioOutput: Send {
    fn play(
        &mut self,
        samples: &[i16],
        sample_rate: u32,
        stop: &dyn Fn() -> bool,
    ) -> Result<PlaybackOutcome>;
}

/// One call recorded by [`MockAudioOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub outcome: PlaybackOutcome,
}

/// Output that records clips instead of rendering them.
#[derive(Debug, Clone, Default)]
pub struct MockAudioOutput {
    played: Arc<Mutex<Vec<PlayedClip>>>,
    clip_duration: Duration,
    fail: bool,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend every clip takes this long to play.
    pub fn with_clip_duration(mut self, duration: Duration) -> Self {
        self.clip_duration = duration;
        self
    }

    /// Fail every call with a device error.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Shared handle on the recorded clips.
    pub fn played(&self) -> Arc<Mutex<Vec<PlayedClip>>> {
        self.played.clone()
    }
}

impl AudioOutput for MockAudioOutput {
    fn play(
        &mut self,
        samples: &[i16],
        sample_rate: u32,
        stop: &dyn Fn() -> bool,
    ) -> Result<PlaybackOutcome> {
        if self.fail {
            return Err(crate::error::ParleyError::Device {
                message: "mock output failure".to_string(),
            });
        }

        let start = Instant::now();
        let mut outcome = PlaybackOutcome::Finished;
        while start.elapsed() < self.clip_duration {
            if stop() {
                outcome = PlaybackOutcome::Stopped;
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        if let Ok(mut played) = self.played.lock() {
            played.push(PlayedClip {
                samples: samples.to_vec(),
                sample_rate,
                outcome,
            });
        }
        Ok(outcome)
    }
}

#[cfg(feature = "cpal-audio")]
pub use speaker::{CpalAudioOutput, list_output_devices};

#[cfg(feature = "cpal-audio")]
mod speaker {
    use super::{AudioOutput, PlaybackOutcome};
    use crate::audio::capture::with_suppressed_stderr;
    use crate::audio::wav::resample;
    use crate::error::{ParleyError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: the stream is never touched after construction except by
    /// drop. The callback only sees the shared buffer.
    struct SendableStream(cpal::Stream);

    unsafe impl Send for SendableStream {}

    fn device_error(context: &str, e: impl std::fmt::Display) -> ParleyError {
        ParleyError::Device {
            message: format!("{context}: {e}"),
        }
    }

    /// List output device names.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let devices = with_suppressed_stderr(|| cpal::default_host().output_devices())
            .map_err(|e| device_error("Failed to enumerate output devices", e))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Speaker output with one persistent stream.
    ///
    /// Samples are queued into a shared buffer drained by the cpal callback.
    /// The stream, and with it the device, is released on drop.
    pub struct CpalAudioOutput {
        _stream: SendableStream,
        buffer: Arc<Mutex<VecDeque<f32>>>,
        device_rate: u32,
    }

    impl CpalAudioOutput {
        pub fn new(device_name: Option<&str>) -> Result<Self> {
            let device = with_suppressed_stderr(|| {
                let host = cpal::default_host();
                match device_name {
                    Some(name) => host
                        .output_devices()
                        .map_err(|e| device_error("Failed to enumerate output devices", e))?
                        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                        .ok_or_else(|| ParleyError::DeviceNotFound {
                            device: name.to_string(),
                        }),
                    None => {
                        host.default_output_device()
                            .ok_or_else(|| ParleyError::DeviceNotFound {
                                device: "default output".to_string(),
                            })
                    }
                }
            })?;

            let supported = device
                .default_output_config()
                .map_err(|e| device_error("Failed to query output config", e))?;
            let device_rate = supported.sample_rate().0;
            let channels = supported.channels() as usize;
            let config: cpal::StreamConfig = supported.into();

            let buffer: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
            let callback_buffer = Arc::clone(&buffer);

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = match callback_buffer.lock() {
                            Ok(queue) => queue,
                            Err(_) => {
                                data.fill(0.0);
                                return;
                            }
                        };
                        for frame in data.chunks_mut(channels) {
                            let sample = queue.pop_front().unwrap_or(0.0);
                            frame.fill(sample);
                        }
                    },
                    |err| tracing::error!(error = %err, "audio playback error"),
                    None,
                )
                .map_err(|e| device_error("Failed to build output stream", e))?;

            stream
                .play()
                .map_err(|e| device_error("Failed to start output stream", e))?;

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = device_rate,
                channels,
                "audio playback initialized"
            );

            Ok(Self {
                _stream: SendableStream(stream),
                buffer,
                device_rate,
            })
        }

        fn queued(&self) -> usize {
            self.buffer.lock().map(|q| q.len()).unwrap_or(0)
        }

        fn clear(&self) {
            if let Ok(mut queue) = self.buffer.lock() {
                queue.clear();
            }
        }
    }

    impl AudioOutput for CpalAudioOutput {
        fn play(
            &mut self,
            samples: &[i16],
            sample_rate: u32,
            stop: &dyn Fn() -> bool,
        ) -> Result<PlaybackOutcome> {
            let converted = resample(samples, sample_rate, self.device_rate);
            {
                let mut queue = self
                    .buffer
                    .lock()
                    .map_err(|_| device_error("Playback buffer", "lock poisoned"))?;
                queue.extend(converted.iter().map(|&s| s as f32 / i16::MAX as f32));
            }

            while self.queued() > 0 {
                if stop() {
                    self.clear();
                    return Ok(PlaybackOutcome::Stopped);
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Ok(PlaybackOutcome::Finished)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_mock_records_clips() {
        let mut output = MockAudioOutput::new();
        let played = output.played();

        let outcome = output.play(&[1, 2, 3], 24000, &|| false).unwrap();
        assert_eq!(outcome, PlaybackOutcome::Finished);

        let played = played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].samples, vec![1, 2, 3]);
        assert_eq!(played[0].sample_rate, 24000);
    }

    #[test]
    fn test_mock_stops_early() {
        let mut output = MockAudioOutput::new().with_clip_duration(Duration::from_secs(5));
        let stop = AtomicBool::new(true);

        let start = Instant::now();
        let outcome = output
            .play(&[1], 24000, &|| stop.load(Ordering::SeqCst))
            .unwrap();
        assert_eq!(outcome, PlaybackOutcome::Stopped);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            output.played().lock().unwrap()[0].outcome,
            PlaybackOutcome::Stopped
        );
    }

    #[test]
    fn test_mock_failure() {
        let mut output = MockAudioOutput::new().with_failure();
        assert!(output.play(&[1], 24000, &|| false).is_err());
    }
}
