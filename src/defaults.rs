//! Default configuration constants for parley.
//!
//! Shared between the config types, the CLI and the pipeline so that every
//! entry point agrees on the same tuning.

/// Default capture sample rate in Hz.
///
/// 16kHz is what speech recognition models expect.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one captured frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 30;

/// Only mono capture is supported.
pub const CHANNELS: u16 = 1;

/// RMS energy (0.0 to 1.0) above which a frame counts as speech.
pub const SILENCE_THRESHOLD: f32 = 0.02;

/// Consecutive silence that ends an utterance.
pub const SILENCE_DURATION_MS: u32 = 1500;

/// Utterances shorter than this are treated as noise and never transcribed.
pub const MIN_UTTERANCE_MS: u32 = 1500;

/// Speech longer than this is emitted even without trailing silence.
pub const MAX_UTTERANCE_MS: u32 = 30_000;

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default transcription language.
pub const DEFAULT_LANGUAGE: &str = AUTO_LANGUAGE;

/// Languages a reply may be produced in when nothing else is configured.
pub const DEFAULT_ALLOWED_LANGUAGES: &[&str] = &["en", "ja"];

/// HTTP transcription model.
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Local whisper model name used when `stt.backend = "whisper"`.
pub const DEFAULT_WHISPER_MODEL: &str = "base";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Upper bound on generated tokens per reply.
pub const MAX_TOKENS: u32 = 10_000;

/// Turns kept in the conversation window sent to the dialogue backend.
pub const HISTORY_TURNS: usize = 20;

/// History compaction threshold in turns. 0 disables compaction.
pub const COMPACT_AFTER_TURNS: usize = 0;

/// Total dialogue attempts per exchange, including the first one.
pub const RETRY_MAX_ATTEMPTS: u32 = 4;
pub const RETRY_BASE_DELAY_MS: u64 = 500;
pub const RETRY_MAX_DELAY_MS: u64 = 8000;

pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_TTS_VOICE: &str = "alloy";
pub const DEFAULT_TTS_SPEED: f32 = 1.0;

/// Sample rate of raw PCM returned by the speech backend.
pub const TTS_SAMPLE_RATE: u32 = 24000;

/// Parallel synthesis workers.
pub const SYNTHESIS_WORKERS: usize = 2;

/// Ceiling for a single collaborator call.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

// Queue capacities between stations.
pub const FRAME_QUEUE_CAPACITY: usize = 64;
pub const UTTERANCE_QUEUE_CAPACITY: usize = 4;
pub const TRANSCRIPT_QUEUE_CAPACITY: usize = 4;
pub const CHUNK_QUEUE_CAPACITY: usize = 32;
pub const SEGMENT_QUEUE_CAPACITY: usize = 32;

/// Default Ollama endpoint parts.
pub const OLLAMA_HOST: &str = "localhost";
pub const OLLAMA_PORT: u16 = 11434;

/// Apology spoken when the dialogue backend fails for good.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't come up with a reply just now.";

/// System prompt for voice conversations. `{lang}` is replaced with the
/// language of the current turn.
pub const SYSTEM_PROMPT: &str = "You are a speech chatbot. Respond to the user's messages \
with short and concise words. Show empathy and understanding. Until it is requested, \
don't describe instructions or provide help. The user's messages are coming from \
voice-to-text, so they may be a bit messy. Response must be in {lang}.";

/// Asked of the model, after the history, to produce a compaction summary.
pub const SUMMARY_PROMPT: &str = "Distill the above chat messages into a single Markdown document. \
There should be a title, summary, related keywords and a list of details. \
Include as many specific details as you can.";

/// Introduces the compaction summary appended to the system prompt.
pub const SUMMARY_HEADING: &str = "Summary of the conversation so far:";

/// Human-readable name for a language code used in prompts.
pub fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "ja" => "Japanese",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        "zh" => "Chinese",
        "ko" => "Korean",
        other => other,
    }
}
