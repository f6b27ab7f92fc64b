//! Wires the stations together and owns their lifecycle.
//!
//! Voice mode: capture → segmenter → transcriber → dialogue →
//! synthesizer workers → playback. Text mode: stdin reader → dialogue →
//! printer.

use crate::audio::output::AudioOutput;
use crate::audio::recorder::AudioSource;
use crate::audio::wav::UtteranceDump;
use crate::config::{BargeIn, Config};
use crate::dialogue::conversation::ConversationState;
use crate::dialogue::engine::DialogueBackend;
use crate::dialogue::memory::MemoryStore;
use crate::dialogue::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::error::{ParleyError, Result};
use crate::pipeline::capture::spawn_capture;
use crate::pipeline::control::{POLL_INTERVAL, PipelineControl, TurnGate};
use crate::pipeline::dialogue_station::DialogueStation;
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::playback_station::PlaybackStation;
use crate::pipeline::segmenter::SegmenterConfig;
use crate::pipeline::segmenter_station::SegmenterStation;
use crate::pipeline::station::{Station, StationRunner};
use crate::pipeline::synthesizer_station::SynthesizerStation;
use crate::pipeline::text_io::{TextPrinter, spawn_stdin_reader};
use crate::pipeline::transcriber_station::TranscriberStation;
use crate::stt::transcriber::Transcriber;
use crate::tts::synthesizer::Synthesizer;
use crossbeam_channel::{Receiver, bounded};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long [`PipelineHandle::stop`] waits for stations to drain.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the stations need, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    /// Samples per captured frame.
    pub frame_samples: usize,
    pub min_utterance_ms: u64,
    pub barge_in: BargeIn,
    pub forced_language: Option<String>,
    pub allowed_languages: Vec<String>,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub history_turns: usize,
    /// Compact the history at this many turns. 0 disables compaction.
    pub compact_after_turns: usize,
    /// Where compaction summaries are saved.
    pub memory: Option<MemoryStore>,
    pub retry: RetryPolicy,
    pub synthesis_workers: usize,
    pub frame_queue: usize,
    pub utterance_queue: usize,
    pub transcript_queue: usize,
    pub chunk_queue: usize,
    pub segment_queue: usize,
    pub dump_audio: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            segmenter: SegmenterConfig::from_vad(&config.vad, config.audio.sample_rate),
            frame_samples: config.audio.frame_samples(),
            min_utterance_ms: u64::from(config.vad.min_utterance_ms),
            barge_in: pipeline.barge_in,
            forced_language: config.stt.forced_language().map(str::to_string),
            allowed_languages: config.stt.allowed_languages.clone(),
            system_prompt: config.dialogue.system_prompt.clone(),
            max_tokens: config.dialogue.max_tokens,
            history_turns: config.dialogue.history_turns,
            compact_after_turns: config.dialogue.compact_after_turns,
            memory: MemoryStore::from_config(&config.dialogue),
            retry: RetryPolicy::from_config(&config.dialogue),
            synthesis_workers: pipeline.synthesis_workers.max(1),
            frame_queue: pipeline.frame_queue.max(1),
            utterance_queue: pipeline.utterance_queue.max(1),
            transcript_queue: pipeline.transcript_queue.max(1),
            chunk_queue: pipeline.chunk_queue.max(1),
            segment_queue: pipeline.segment_queue.max(1),
            dump_audio: pipeline.dump_audio.clone(),
        }
    }

    /// Language tag for typed input, where nothing is detected.
    pub fn text_language(&self) -> String {
        self.forced_language
            .clone()
            .or_else(|| self.allowed_languages.first().cloned())
            .unwrap_or_else(|| "en".to_string())
    }
}

/// Collaborators for a voice session.
pub struct VoiceBackends {
    pub source: Box<dyn AudioSource>,
    pub transcriber: Arc<dyn Transcriber>,
    pub dialogue: Arc<dyn DialogueBackend>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub output: Box<dyn AudioOutput>,
}

/// Counts reported errors before passing them on.
struct CountingReporter {
    inner: Arc<dyn ErrorReporter>,
    recoverable: AtomicU64,
    fatal: AtomicU64,
}

impl ErrorReporter for CountingReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(_) => {
                self.recoverable.fetch_add(1, Ordering::Relaxed);
            }
            StationError::Fatal(_) => {
                self.fatal.fetch_add(1, Ordering::Relaxed);
            }
            StationError::Closed => {}
        }
        self.inner.report(station, error);
    }
}

/// Type-erased view of a [`StationRunner`].
trait RunningStation: Send {
    fn name(&self) -> &'static str;
    fn is_finished(&self) -> bool;
    fn join(self: Box<Self>) -> std::result::Result<(), String>;
}

impl<S: Station> RunningStation for StationRunner<S> {
    fn name(&self) -> &'static str {
        StationRunner::name(self)
    }

    fn is_finished(&self) -> bool {
        StationRunner::is_finished(self)
    }

    fn join(self: Box<Self>) -> std::result::Result<(), String> {
        StationRunner::join(*self)
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct PipelineReport {
    /// Final conversation, if the dialogue station stopped in time.
    pub conversation: Option<ConversationState>,
    pub exchanges: u64,
    pub interruptions: u64,
    pub recoverable_errors: u64,
    pub fatal_errors: u64,
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    control: Arc<PipelineControl>,
    /// In wiring order; the last one is the terminal station.
    stations: Vec<Box<dyn RunningStation>>,
    /// Capture or stdin reader threads.
    threads: Vec<JoinHandle<()>>,
    conversation_rx: Receiver<ConversationState>,
    reporter: Arc<CountingReporter>,
}

impl PipelineHandle {
    pub fn control(&self) -> &Arc<PipelineControl> {
        &self.control
    }

    /// Whether the terminal station is still running.
    pub fn is_running(&self) -> bool {
        self.stations.last().is_some_and(|s| !s.is_finished())
    }

    /// Block until shutdown is requested or the input ran out and every
    /// station drained.
    pub fn wait(&self) {
        while self.is_running() {
            if self.control.wait_shutdown_timeout(POLL_INTERVAL) {
                return;
            }
        }
    }

    /// Request shutdown, let stations finish their in-flight item, and
    /// collect the session summary.
    ///
    /// Threads still busy after the stop timeout are detached.
    pub fn stop(mut self) -> PipelineReport {
        self.control.request_shutdown();

        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            let mut remaining = Vec::new();
            for station in self.stations.drain(..) {
                if station.is_finished() {
                    let name = station.name();
                    if let Err(msg) = station.join() {
                        tracing::error!(station = name, "{msg}");
                    }
                } else {
                    remaining.push(station);
                }
            }
            self.stations = remaining;

            if self.stations.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                let names: Vec<&str> = self.stations.iter().map(|s| s.name()).collect();
                tracing::warn!(?names, "stations still busy at shutdown, detaching");
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        for handle in self.threads.drain(..) {
            // A stdin reader can stay blocked in read_line; leave it.
            if handle.is_finished() && handle.join().is_err() {
                tracing::error!("input thread panicked");
            }
        }

        PipelineReport {
            conversation: self.conversation_rx.try_recv().ok(),
            exchanges: self.control.latest_exchange(),
            interruptions: self.control.interruptions(),
            recoverable_errors: self.reporter.recoverable.load(Ordering::Relaxed),
            fatal_errors: self.reporter.fatal.load(Ordering::Relaxed),
        }
    }
}

/// Builds and starts a pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    control: Arc<PipelineControl>,
    reporter: Arc<dyn ErrorReporter>,
    sleeper: Arc<dyn Sleeper>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            control: PipelineControl::new(),
            reporter: Arc::new(LogReporter),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the retry backoff sleeper (tests record delays instead).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Control flags of the pipeline about to start, e.g. for a signal handler.
    pub fn control(&self) -> Arc<PipelineControl> {
        self.control.clone()
    }

    fn counting_reporter(&self) -> Arc<CountingReporter> {
        Arc::new(CountingReporter {
            inner: self.reporter.clone(),
            recoverable: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
        })
    }

    fn dialogue_station(&self, dialogue: Arc<dyn DialogueBackend>) -> (DialogueStation, Receiver<ConversationState>) {
        let (tx, rx) = bounded(1);
        let station = DialogueStation::new(dialogue, self.control.clone(), self.config.history_turns)
            .with_retry(self.config.retry.clone(), self.sleeper.clone())
            .with_system_prompt(&self.config.system_prompt)
            .with_max_tokens(self.config.max_tokens)
            .with_compaction(self.config.compact_after_turns, self.config.memory.clone())
            .with_handoff(tx);
        (station, rx)
    }

    /// Start a voice session.
    pub fn start_voice(self, backends: VoiceBackends) -> Result<PipelineHandle> {
        let VoiceBackends {
            source,
            transcriber,
            dialogue,
            synthesizer,
            output,
        } = backends;
        let config = &self.config;

        if source.sample_rate() != config.segmenter.sample_rate {
            return Err(ParleyError::Configuration {
                message: format!(
                    "audio source delivers {} Hz, pipeline expects {} Hz",
                    source.sample_rate(),
                    config.segmenter.sample_rate
                ),
            });
        }
        let dump = config.dump_audio.as_ref().map(UtteranceDump::new).transpose()?;

        let control = self.control.clone();
        let reporter = self.counting_reporter();
        let station_reporter: Arc<dyn ErrorReporter> = reporter.clone();
        let gate = TurnGate::new();

        let (frame_tx, frame_rx) = bounded(config.frame_queue);
        let (utterance_tx, utterance_rx) = bounded(config.utterance_queue);
        let (transcript_tx, transcript_rx) = bounded(config.transcript_queue);
        let (chunk_tx, chunk_rx) = bounded(config.chunk_queue);
        let (segment_tx, segment_rx) = bounded(config.segment_queue);

        let segmenter = SegmenterStation::new(config.segmenter, control.clone())
            .with_barge_in(config.barge_in)
            .with_min_utterance_ms(config.min_utterance_ms)
            .with_dump(dump);
        let transcriber = TranscriberStation::new(transcriber, control.clone(), gate)
            .with_forced_language(config.forced_language.clone())
            .with_allowed_languages(config.allowed_languages.clone());
        let (dialogue, conversation_rx) = self.dialogue_station(dialogue);

        let mut stations: Vec<Box<dyn RunningStation>> = vec![
            Box::new(StationRunner::spawn(
                segmenter,
                frame_rx,
                utterance_tx,
                control.clone(),
                station_reporter.clone(),
            )),
            Box::new(StationRunner::spawn(
                transcriber,
                utterance_rx,
                transcript_tx,
                control.clone(),
                station_reporter.clone(),
            )),
            Box::new(StationRunner::spawn(
                dialogue,
                transcript_rx,
                chunk_tx,
                control.clone(),
                station_reporter.clone(),
            )),
        ];
        for worker in 0..config.synthesis_workers {
            let station = SynthesizerStation::new(synthesizer.clone(), control.clone()).with_worker(worker);
            stations.push(Box::new(StationRunner::spawn(
                station,
                chunk_rx.clone(),
                segment_tx.clone(),
                control.clone(),
                station_reporter.clone(),
            )));
        }
        drop(segment_tx);
        stations.push(Box::new(StationRunner::spawn_terminal(
            PlaybackStation::new(output, control.clone()),
            segment_rx,
            control.clone(),
            station_reporter,
        )));

        let capture = spawn_capture(source, config.frame_samples, frame_tx, control.clone());
        tracing::info!(
            workers = config.synthesis_workers,
            barge_in = ?config.barge_in,
            "voice pipeline started"
        );

        Ok(PipelineHandle {
            control,
            stations,
            threads: vec![capture],
            conversation_rx,
            reporter,
        })
    }

    /// Start a text session: lines from `reader` are the user's turns,
    /// replies are written to `writer`.
    pub fn start_text(
        self,
        reader: Box<dyn BufRead + Send>,
        writer: Box<dyn Write + Send>,
        dialogue: Arc<dyn DialogueBackend>,
    ) -> Result<PipelineHandle> {
        let control = self.control.clone();
        let reporter = self.counting_reporter();
        let station_reporter: Arc<dyn ErrorReporter> = reporter.clone();
        let gate = TurnGate::new();

        let (transcript_tx, transcript_rx) = bounded(self.config.transcript_queue);
        let (chunk_tx, chunk_rx) = bounded(self.config.chunk_queue);

        let (dialogue, conversation_rx) = self.dialogue_station(dialogue);
        let stations: Vec<Box<dyn RunningStation>> = vec![
            Box::new(StationRunner::spawn(
                dialogue,
                transcript_rx,
                chunk_tx,
                control.clone(),
                station_reporter.clone(),
            )),
            Box::new(StationRunner::spawn_terminal(
                TextPrinter::new(writer, control.clone()),
                chunk_rx,
                control.clone(),
                station_reporter,
            )),
        ];

        let reader = spawn_stdin_reader(
            reader,
            gate,
            control.clone(),
            transcript_tx,
            self.config.text_language(),
        );
        tracing::info!("text pipeline started");

        Ok(PipelineHandle {
            control,
            stations,
            threads: vec![reader],
            conversation_rx,
            reporter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::MockAudioOutput;
    use crate::audio::recorder::MockAudioSource;
    use crate::dialogue::engine::{MockDialogue, MockOutcome};
    use crate::stt::transcriber::MockTranscriber;
    use crate::tts::synthesizer::MockSynthesizer;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_from_defaults() {
        let config = PipelineConfig::from_config(&Config::default());
        assert_eq!(config.frame_samples, 480);
        assert_eq!(config.min_utterance_ms, 1500);
        assert_eq!(config.segmenter.silence_duration_ms, 1500);
        assert_eq!(config.forced_language, None);
        assert_eq!(config.synthesis_workers, 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.text_language(), "en");
    }

    #[test]
    fn test_forced_language_wins_for_text() {
        let mut config = Config::default();
        config.stt.language = "ja".into();
        assert_eq!(PipelineConfig::from_config(&config).text_language(), "ja");
    }

    #[test]
    fn test_text_session_runs_to_eof() {
        let out = SharedBuf::default();
        let dialogue = MockDialogue::new().then(MockOutcome::reply(&["Hi! ", "Nice to meet you."]));
        let handle = Pipeline::new(PipelineConfig::default())
            .start_text(
                Box::new(Cursor::new("hello\nhow are you\n")),
                Box::new(out.clone()),
                Arc::new(dialogue),
            )
            .unwrap();
        handle.wait();
        let report = handle.stop();

        let printed = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!(printed, "Hi! Nice to meet you.\nYou said: how are you.\n");
        assert_eq!(report.exchanges, 2);
        assert_eq!(report.conversation.unwrap().len(), 4);
        assert_eq!(report.recoverable_errors, 0);
    }

    #[test]
    fn test_sample_rate_mismatch_is_rejected() {
        let backends = VoiceBackends {
            source: Box::new(MockAudioSource::new().with_sample_rate(48000)),
            transcriber: Arc::new(MockTranscriber::new("m")),
            dialogue: Arc::new(MockDialogue::new()),
            synthesizer: Arc::new(MockSynthesizer::new()),
            output: Box::new(MockAudioOutput::new()),
        };
        let err = Pipeline::new(PipelineConfig::default())
            .start_voice(backends)
            .err()
            .unwrap();
        assert!(matches!(err, ParleyError::Configuration { .. }));
    }

    #[test]
    fn test_stop_drains_live_voice_session() {
        let backends = VoiceBackends {
            source: Box::new(MockAudioSource::new()),
            transcriber: Arc::new(MockTranscriber::new("m")),
            dialogue: Arc::new(MockDialogue::new()),
            synthesizer: Arc::new(MockSynthesizer::new()),
            output: Box::new(MockAudioOutput::new()),
        };
        let handle = Pipeline::new(PipelineConfig::default())
            .start_voice(backends)
            .unwrap();
        assert!(handle.is_running());

        let report = handle.stop();
        assert_eq!(report.exchanges, 0);
        assert_eq!(report.fatal_errors, 0);
        assert!(report.conversation.unwrap().is_empty());
    }
}
