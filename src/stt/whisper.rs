//! Local speech-to-text with whisper.cpp through whisper-rs.
//!
//! Requires the `whisper` feature (and cmake). Without it the type still
//! exists but refuses to construct, so selecting this backend fails at
//! startup with a configuration error.

use crate::error::{ParleyError, Result};
use crate::stt::transcriber::{Transcriber, TranscriptionResult};
use std::path::{Path, PathBuf};

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Settings for the local backend.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    /// Inference threads. `None` lets whisper.cpp decide.
    pub threads: Option<usize>,
}

impl WhisperConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            threads: None,
        }
    }
}

fn model_name_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn check_model_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ParleyError::Configuration {
            message: format!("whisper model not found: {}", path.display()),
        })
    }
}

/// Normalize i16 PCM to the [-1.0, 1.0] floats whisper expects.
pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// whisper.cpp transcriber. The context is shared behind a mutex; each call
/// creates its own state.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "whisper")]
fn inference_error(context: &str, e: impl std::fmt::Display) -> ParleyError {
    ParleyError::Transcription {
        message: format!("{context}: {e}"),
    }
}

impl WhisperTranscriber {
    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Keeps whisper.cpp from writing to stderr.
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        check_model_exists(&config.model_path)?;
        let model_name = model_name_from_path(&config.model_path);

        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| ParleyError::Configuration {
                message: "whisper model path is not valid UTF-8".to_string(),
            })?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| ParleyError::Configuration {
                message: format!("failed to load whisper model: {e}"),
            })?;

        tracing::info!(model = %model_name, "whisper model loaded");
        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        check_model_exists(&config.model_path)?;
        Err(ParleyError::Configuration {
            message: format!(
                "cannot load {}: parley was built without the `whisper` feature",
                model_name_from_path(&config.model_path)
            ),
        })
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &self,
        audio: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let audio = crate::audio::wav::resample(audio, sample_rate, 16000);
        let audio_f32 = convert_audio(&audio);

        let context = self
            .context
            .lock()
            .map_err(|e| inference_error("whisper context lock", e))?;
        let mut state = context
            .create_state()
            .map_err(|e| inference_error("failed to create whisper state", e))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(language);
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| inference_error("whisper inference failed", e))?;

        let language = whisper_rs::get_lang_str(state.full_lang_id_from_state())
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
        }

        Ok(TranscriptionResult {
            text: text.trim().to_string(),
            language,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &self,
        _audio: &[i16],
        _sample_rate: u32,
        _language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        Err(ParleyError::Transcription {
            message: "built without the `whisper` feature".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_configuration_error() {
        let result = WhisperTranscriber::new(WhisperConfig::new("/nonexistent/ggml-base.bin"));
        match result {
            Err(ParleyError::Configuration { message }) => {
                assert!(message.contains("/nonexistent/ggml-base.bin"));
            }
            other => panic!("expected Configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_model_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ggml-base.bin");
        std::fs::write(&path, b"not a model").unwrap();

        // Either "not a valid model" or "feature not enabled".
        assert!(WhisperTranscriber::new(WhisperConfig::new(&path)).is_err());
    }

    #[test]
    fn test_model_name_from_path() {
        assert_eq!(model_name_from_path(Path::new("/m/ggml-small.en.bin")), "ggml-small.en");
    }

    #[test]
    fn test_convert_audio_i16_to_f32() {
        let converted = convert_audio(&[0i16, 16384, -16384, 32767, -32768]);
        assert_eq!(converted[0], 0.0);
        assert!((converted[1] - 0.5).abs() < 0.01);
        assert!((converted[2] + 0.5).abs() < 0.01);
        assert!((converted[3] - 1.0).abs() < 0.01);
        assert_eq!(converted[4], -1.0);
        assert!(convert_audio(&[]).is_empty());
    }

    #[test]
    fn test_whisper_transcriber_send_sync() {
        fn assert_send_sync<T: Send + Sync + Transcriber>() {}
        assert_send_sync::<WhisperTranscriber>();
    }
}
