//! WAV encoding, utterance dumps, resampling and a WAV file audio source.

use crate::audio::recorder::AudioSource;
use crate::error::{ParleyError, Result};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn wav_error(context: &str, e: hound::Error) -> ParleyError {
    match e {
        hound::Error::IoError(io) => ParleyError::Io(io),
        other => ParleyError::Other(format!("{context}: {other}")),
    }
}

/// Encode mono 16-bit PCM as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))
            .map_err(|e| wav_error("Failed to create WAV writer", e))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| wav_error("Failed to write WAV sample", e))?;
        }
        writer
            .finalize()
            .map_err(|e| wav_error("Failed to finalize WAV", e))?;
    }
    Ok(cursor.into_inner())
}

/// Write mono 16-bit PCM to a WAV file.
pub fn write_wav_file(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate))
        .map_err(|e| wav_error("Failed to create WAV file", e))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| wav_error("Failed to write WAV sample", e))?;
    }
    writer
        .finalize()
        .map_err(|e| wav_error("Failed to finalize WAV file", e))
}

/// Writes every forwarded utterance into a directory as a WAV file.
#[derive(Debug, Clone)]
pub struct UtteranceDump {
    dir: PathBuf,
}

impl UtteranceDump {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Write one utterance and return the file path.
    pub fn write(&self, sequence: u64, samples: &[i16], sample_rate: u32) -> Result<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = self
            .dir
            .join(format!("utterance-{millis}-{sequence:04}.wav"));
        write_wav_file(&path, samples, sample_rate)?;
        Ok(path)
    }
}

/// Decode raw little-endian 16-bit PCM bytes. A trailing odd byte is ignored.
pub fn decode_pcm_le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Decode a 16-bit WAV stream, downmixing to mono. Returns the samples and
/// their sample rate.
pub fn read_wav_mono(reader: impl Read) -> std::result::Result<(Vec<i16>, u32), hound::Error> {
    let mut wav_reader = hound::WavReader::new(reader)?;
    let spec = wav_reader.spec();
    let channels = spec.channels.max(1) as usize;

    let raw_samples = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mono = if channels == 1 {
        raw_samples
    } else {
        raw_samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Audio source that plays back a WAV file in real-time sized reads.
///
/// Lets the whole voice pipeline run headless from a recording.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
}

impl WavAudioSource {
    /// Read any mono or stereo 16-bit WAV, converting to mono at `target_rate`.
    pub fn from_reader(reader: impl Read, target_rate: u32) -> Result<Self> {
        let (mono, source_rate) = read_wav_mono(reader).map_err(|e| ParleyError::Device {
            message: format!("Failed to read WAV file: {}", e),
        })?;

        Ok(Self {
            samples: resample(&mono, source_rate, target_rate),
            position: 0,
            // 100ms reads
            chunk_size: (target_rate / 10).max(1) as usize,
            sample_rate: target_rate,
        })
    }

    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| ParleyError::DeviceNotFound {
            device: format!("{} ({e})", path.display()),
        })?;
        Self::from_reader(std::io::BufReader::new(file), target_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = std::cmp::min(self.position + self.chunk_size, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}
