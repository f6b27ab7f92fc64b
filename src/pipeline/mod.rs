//! Conversation pipeline.
//!
//! Each station runs in its own thread, connected to its neighbours by
//! bounded crossbeam channels for backpressure. Shutdown and interruption
//! travel through [`control::PipelineControl`].

pub mod capture;
pub mod control;
pub mod dialogue_station;
pub mod error;
pub mod orchestrator;
pub mod playback_station;
pub mod segmenter;
pub mod segmenter_station;
pub mod station;
pub mod synthesizer_station;
pub mod text_io;
pub mod transcriber_station;
pub mod types;

pub use control::{CancelToken, PipelineControl, TurnGate, TurnPermit};
pub use dialogue_station::DialogueStation;
pub use error::{ErrorReporter, LogReporter, StationError};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle, PipelineReport, VoiceBackends};
pub use playback_station::PlaybackStation;
pub use segmenter::{Segmenter, SegmenterConfig};
pub use segmenter_station::SegmenterStation;
pub use station::{Outlet, Station, StationRunner, StationState};
pub use synthesizer_station::SynthesizerStation;
pub use text_io::TextPrinter;
pub use transcriber_station::TranscriberStation;
pub use types::{AudioFrame, AudioSegment, ReplyChunk, Transcript, Utterance};
