//! Core station abstraction and runner for the pipeline.

use crate::pipeline::control::{POLL_INTERVAL, PipelineControl};
use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

/// A processing station in the pipeline.
///
/// Each station receives input, processes it, and emits zero or more outputs.
/// Stations run in their own threads and are connected by channels.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item, sending any results through `out`.
    fn process(
        &mut self,
        input: Self::Input,
        out: &Outlet<Self::Output>,
    ) -> Result<(), StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called before waiting for the next input.
    ///
    /// A station that must hold a resource before taking input (the turn
    /// permit) blocks here. Return `Err(StationError::Closed)` to stop.
    fn prepare(&mut self) -> Result<(), StationError> {
        Ok(())
    }

    /// Called when no input arrived within one poll interval.
    fn idle(&mut self, _out: &Outlet<Self::Output>) -> Result<(), StationError> {
        Ok(())
    }

    /// Called when the station is shutting down.
    ///
    /// Override this to perform cleanup operations.
    fn shutdown(&mut self) {}
}

/// Sending half handed to [`Station::process`].
pub struct Outlet<T> {
    tx: Option<Sender<T>>,
    control: Arc<PipelineControl>,
}

impl<T> Outlet<T> {
    pub fn new(tx: Sender<T>, control: Arc<PipelineControl>) -> Self {
        Self {
            tx: Some(tx),
            control,
        }
    }

    /// An outlet that discards everything, for terminal stations.
    pub fn detached(control: Arc<PipelineControl>) -> Self {
        Self { tx: None, control }
    }

    /// Send downstream, waiting while the queue is full.
    ///
    /// Gives up with [`StationError::Closed`] if the receiver is gone or
    /// shutdown is requested while waiting.
    pub fn send(&self, item: T) -> Result<(), StationError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let mut item = item;
        loop {
            match tx.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(StationError::Closed),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.control.is_shutdown() {
                        return Err(StationError::Closed);
                    }
                    item = returned;
                }
            }
        }
    }

    pub fn control(&self) -> &Arc<PipelineControl> {
        &self.control
    }
}

/// Lifecycle of a station loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Running,
    /// Shutdown observed: the item in flight is finished, no new one is taken.
    Draining,
    Stopped,
}

impl StationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StationState::Running,
            1 => StationState::Draining,
            _ => StationState::Stopped,
        }
    }
}

/// Runs a station in a dedicated thread.
pub struct StationRunner<S: Station> {
    /// Handle to the spawned thread.
    handle: Option<JoinHandle<()>>,
    /// Name of the station (cached for error reporting).
    station_name: &'static str,
    state: Arc<AtomicU8>,
    /// Phantom data to mark the station type.
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawns a new station in a dedicated thread.
    ///
    /// # Arguments
    /// * `station` - The station implementation to run
    /// * `input_rx` - Channel to receive inputs from
    /// * `output_tx` - Channel to send outputs to
    /// * `control` - Shared shutdown and interruption flags
    /// * `error_reporter` - Reporter for handling errors
    pub fn spawn(
        station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        control: Arc<PipelineControl>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let outlet = Outlet::new(output_tx, control.clone());
        Self::spawn_with_outlet(station, input_rx, outlet, control, error_reporter)
    }

    /// Spawns a station whose output goes nowhere (playback, printers).
    pub fn spawn_terminal(
        station: S,
        input_rx: Receiver<S::Input>,
        control: Arc<PipelineControl>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let outlet = Outlet::detached(control.clone());
        Self::spawn_with_outlet(station, input_rx, outlet, control, error_reporter)
    }

    fn spawn_with_outlet(
        mut station: S,
        input_rx: Receiver<S::Input>,
        outlet: Outlet<S::Output>,
        control: Arc<PipelineControl>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();
        let state = Arc::new(AtomicU8::new(StationState::Running as u8));
        let thread_state = state.clone();

        let handle = thread::spawn(move || {
            Self::run_station(&mut station, input_rx, outlet, &control, error_reporter);
            thread_state.store(StationState::Stopped as u8, Ordering::SeqCst);
        });

        Self {
            handle: Some(handle),
            station_name,
            state,
            _phantom: PhantomData,
        }
    }

    /// Main processing loop for the station.
    fn run_station(
        station: &mut S,
        input_rx: Receiver<S::Input>,
        outlet: Outlet<S::Output>,
        control: &PipelineControl,
        error_reporter: Arc<dyn ErrorReporter>,
    ) {
        let station_name = station.name();
        tracing::debug!(station = station_name, "station started");

        let mut drained_by_shutdown = false;
        loop {
            if control.is_shutdown() {
                drained_by_shutdown = true;
                break;
            }

            let step = match station.prepare() {
                Ok(()) => match input_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(input) => station.process(input, &outlet),
                    Err(RecvTimeoutError::Timeout) => station.idle(&outlet),
                    // Upstream finished and queue drained.
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                Err(e) => Err(e),
            };

            match step {
                Ok(()) => {}
                Err(StationError::Closed) => break,
                Err(error @ StationError::Recoverable(_)) => {
                    // Report but continue processing
                    error_reporter.report(station_name, &error);
                }
                Err(error @ StationError::Fatal(_)) => {
                    error_reporter.report(station_name, &error);
                    control.request_shutdown();
                    break;
                }
            }
        }

        if drained_by_shutdown {
            tracing::debug!(station = station_name, "draining");
        }

        // Cleanup on shutdown
        station.shutdown();
        tracing::debug!(station = station_name, "station stopped");
    }

    /// Current lifecycle state, derived from the thread and the control flags.
    pub fn state(&self, control: &PipelineControl) -> StationState {
        let stored = StationState::from_u8(self.state.load(Ordering::SeqCst));
        match stored {
            StationState::Running if control.is_shutdown() => StationState::Draining,
            other => other,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    // Mock station that doubles integers
    struct DoublerStation {
        shutdown_called: Arc<AtomicBool>,
    }

    impl Station for DoublerStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32, out: &Outlet<i32>) -> Result<(), StationError> {
            out.send(input * 2)
        }

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn shutdown(&mut self) {
            self.shutdown_called.store(true, Ordering::SeqCst);
        }
    }

    // Emits each input twice
    struct EchoStation;

    impl Station for EchoStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32, out: &Outlet<i32>) -> Result<(), StationError> {
            out.send(input)?;
            out.send(input)
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    // Fails on configured inputs
    struct FailingStation {
        recoverable_on: i32,
        fatal_on: i32,
    }

    impl Station for FailingStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: i32, out: &Outlet<i32>) -> Result<(), StationError> {
            if input == self.recoverable_on {
                Err(StationError::Recoverable(format!("Failed on {}", input)))
            } else if input == self.fatal_on {
                Err(StationError::Fatal(format!("Died on {}", input)))
            } else {
                out.send(input)
            }
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    // Mock error reporter that collects errors
    #[derive(Default)]
    struct MockReporter {
        errors: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, station: &str, error: &StationError) {
            let mut errors = self.errors.lock().unwrap();
            errors.push((station.to_string(), error.to_string()));
        }
    }

    #[test]
    fn test_station_runner_basic_processing() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let control = PipelineControl::new();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let station = DoublerStation {
            shutdown_called: shutdown_flag.clone(),
        };
        let runner = StationRunner::spawn(
            station,
            input_rx,
            output_tx,
            control.clone(),
            Arc::new(MockReporter::default()),
        );
        assert_eq!(runner.name(), "doubler");

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        input_tx.send(3).unwrap();
        drop(input_tx); // Close channel to trigger shutdown

        let outputs: Vec<i32> = output_rx.iter().collect();
        assert_eq!(outputs, vec![2, 4, 6]);

        runner.join().unwrap();
        assert!(shutdown_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_station_can_emit_several_outputs() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let runner = StationRunner::spawn(
            EchoStation,
            input_rx,
            output_tx,
            PipelineControl::new(),
            Arc::new(MockReporter::default()),
        );

        input_tx.send(7).unwrap();
        input_tx.send(8).unwrap();
        drop(input_tx);

        let outputs: Vec<i32> = output_rx.iter().collect();
        assert_eq!(outputs, vec![7, 7, 8, 8]);
        runner.join().unwrap();
    }

    #[test]
    fn test_recoverable_error_is_reported_and_skipped() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let control = PipelineControl::new();

        let station = FailingStation {
            recoverable_on: 2,
            fatal_on: -1,
        };
        let runner = StationRunner::spawn(station, input_rx, output_tx, control.clone(), reporter);

        for i in 1..=3 {
            input_tx.send(i).unwrap();
        }
        drop(input_tx);

        let outputs: Vec<i32> = output_rx.iter().collect();
        assert_eq!(outputs, vec![1, 3]);

        let reported = errors.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, "failing");
        assert!(reported[0].1.contains("Failed on 2"));
        assert!(!control.is_shutdown());
        drop(reported);

        runner.join().unwrap();
    }

    #[test]
    fn test_fatal_error_requests_pipeline_shutdown() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let reporter = Arc::new(MockReporter::default());
        let control = PipelineControl::new();

        let station = FailingStation {
            recoverable_on: -1,
            fatal_on: 2,
        };
        let runner = StationRunner::spawn(station, input_rx, output_tx, control.clone(), reporter);

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        input_tx.send(3).unwrap();

        runner.join().unwrap();
        assert!(control.is_shutdown());

        let outputs: Vec<i32> = output_rx.try_iter().collect();
        assert_eq!(outputs, vec![1]);
    }

    #[test]
    fn test_shutdown_stops_idle_station() {
        let (_input_tx, input_rx) = bounded::<i32>(10);
        let (output_tx, _output_rx) = bounded(10);
        let control = PipelineControl::new();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            DoublerStation {
                shutdown_called: shutdown_flag.clone(),
            },
            input_rx,
            output_tx,
            control.clone(),
            Arc::new(MockReporter::default()),
        );
        assert_eq!(runner.state(&control), StationState::Running);

        control.request_shutdown();
        // The input sender is still alive: only the flag can stop the loop.
        runner.join().unwrap();
        assert!(shutdown_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_state_reports_draining_then_stopped() {
        struct SlowStation;
        impl Station for SlowStation {
            type Input = ();
            type Output = ();
            fn process(&mut self, _input: (), _out: &Outlet<()>) -> Result<(), StationError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            }
            fn name(&self) -> &'static str {
                "slow"
            }
        }

        let (input_tx, input_rx) = bounded(1);
        let control = PipelineControl::new();
        let runner = StationRunner::spawn_terminal(
            SlowStation,
            input_rx,
            control.clone(),
            Arc::new(MockReporter::default()),
        );

        input_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        control.request_shutdown();
        assert_eq!(runner.state(&control), StationState::Draining);

        while !runner.is_finished() {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(runner.state(&control), StationState::Stopped);
        runner.join().unwrap();
    }

    #[test]
    fn test_output_channel_closed_stops_station() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            DoublerStation {
                shutdown_called: shutdown_flag.clone(),
            },
            input_rx,
            output_tx,
            PipelineControl::new(),
            Arc::new(MockReporter::default()),
        );

        drop(output_rx);
        input_tx.send(1).unwrap();

        runner.join().unwrap();
        assert!(shutdown_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_outlet_gives_up_on_full_queue_at_shutdown() {
        let (tx, _rx) = bounded(1);
        let control = PipelineControl::new();
        let outlet = Outlet::new(tx, control.clone());

        outlet.send(1).unwrap();
        control.request_shutdown();
        assert_eq!(outlet.send(2), Err(StationError::Closed));
    }

    #[test]
    fn test_detached_outlet_accepts_everything() {
        let outlet = Outlet::detached(PipelineControl::new());
        for i in 0..100 {
            outlet.send(i).unwrap();
        }
    }
}
