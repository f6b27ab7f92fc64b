//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::AudioSource;
use crate::error::{ParleyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Silences the ALSA/JACK/PipeWire chatter CPAL triggers when probing
/// backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Device name patterns that are never microphones.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "hdmi", "s/pdif"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES.iter().any(|pref| lower.contains(pref))
}

/// List input devices, marking the preferred ones.
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices()).map_err(|e| {
        ParleyError::Device {
            message: format!("Failed to enumerate input devices: {}", e),
        }
    })?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| ParleyError::Device {
            message: format!("Failed to enumerate devices: {}", e),
        });

        if let Some(name) = device_name {
            return devices?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| ParleyError::DeviceNotFound {
                    device: name.to_string(),
                });
        }

        if let Ok(devices) = devices {
            for device in devices {
                if device.name().map(|n| is_preferred_device(&n)).unwrap_or(false) {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| ParleyError::DeviceNotFound {
                device: "default input".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in CpalAudioSource
/// and never from the cpal callback.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture delivering mono i16 at the configured rate.
///
/// Opens the device's native config and mixes/resamples in software, which
/// works on every backend, including PipeWire's ALSA shim.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_input_device(device_name)?;
        Ok(Self {
            device,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| ParleyError::Device {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::debug!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "capture stream format"
        );

        let err_callback = |err| tracing::error!(error = %err, "audio capture error");
        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let push = move |data: &[i16]| {
            counter.fetch_add(1, Ordering::Relaxed);
            let converted = convert_to_mono(data, native_channels, native_rate, target_rate);
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(&converted);
            }
        };

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| push(data),
                err_callback,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let ints: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    push(&ints)
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(ParleyError::Device {
                    message: format!("Unsupported native sample format: {:?}", fmt),
                });
            }
        };

        stream.map_err(|e| ParleyError::Device {
            message: format!("Failed to build input stream: {}", e),
        })
    }
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn convert_to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    crate::audio::wav::resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| ParleyError::Device {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if guard.is_some() {
            return Ok(()); // Already started
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| ParleyError::Device {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        *guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| ParleyError::Device {
            message: format!("Failed to lock stream: {}", e),
        })?;

        // Dropping the stream releases the device.
        if let Some(stream) = guard.take() {
            stream.0.pause().map_err(|e| ParleyError::Device {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| ParleyError::Device {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::debug!(error = %e, "failed to pause capture stream on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_convert_to_mono_downmixes_and_resamples() {
        let stereo = vec![100i16, 300, -200, -400];
        assert_eq!(convert_to_mono(&stereo, 2, 16000, 16000), vec![200, -300]);

        let mono_48k = vec![1000i16; 480];
        assert_eq!(convert_to_mono(&mono_48k, 1, 48000, 16000).len(), 160);
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        match CpalAudioSource::new(Some("NonExistentDevice12345"), 16000) {
            Err(ParleyError::DeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Err(ParleyError::Device { .. }) => {} // no audio host at all
            _ => panic!("Expected a device error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_start_read_stop() {
        let mut source = CpalAudioSource::new(None, 16000).expect("Failed to create source");
        source.start().expect("start");
        std::thread::sleep(std::time::Duration::from_millis(100));
        source.read_samples().expect("read");
        source.stop().expect("stop");
    }
}
