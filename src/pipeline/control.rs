//! Cross-station control state: shutdown, interruption and turn gating.
//!
//! This is the only state written by more than one thread. Everything else
//! moves through channels.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// How often blocking waits re-check the shutdown flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared control flags for one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineControl {
    shutdown: AtomicBool,
    shutdown_lock: Mutex<bool>,
    shutdown_cv: Condvar,
    latest_exchange: AtomicU64,
    cancelled_through: AtomicU64,
    speaking: AtomicBool,
    interruptions: AtomicU64,
}

impl PipelineControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask every station to drain and stop. Idempotent.
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
        let mut flag = self
            .shutdown_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *flag = true;
        self.shutdown_cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block for up to `timeout` or until shutdown is requested.
    ///
    /// Returns `true` if shutdown was requested.
    pub fn wait_shutdown_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .shutdown_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _) = self
            .shutdown_cv
            .wait_timeout_while(guard, timeout, |requested| !*requested)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }

    /// Allocate the identifier for a new exchange.
    pub fn begin_exchange(&self) -> u64 {
        self.latest_exchange.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_exchange(&self) -> u64 {
        self.latest_exchange.load(Ordering::SeqCst)
    }

    /// Cancel every exchange started so far.
    ///
    /// Returns the newest cancelled exchange, or `None` if nothing was left
    /// to cancel.
    pub fn interrupt(&self) -> Option<u64> {
        let latest = self.latest_exchange();
        let previous = self.cancelled_through.fetch_max(latest, Ordering::SeqCst);
        if latest > previous {
            self.interruptions.fetch_add(1, Ordering::SeqCst);
            Some(latest)
        } else {
            None
        }
    }

    pub fn is_cancelled(&self, exchange: u64) -> bool {
        exchange <= self.cancelled_through.load(Ordering::SeqCst)
    }

    /// Number of interruptions that cancelled at least one exchange.
    pub fn interruptions(&self) -> u64 {
        self.interruptions.load(Ordering::SeqCst)
    }

    /// Set by playback while a reply is being rendered.
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

/// Cancellation view of one exchange. Trips on interruption or shutdown.
#[derive(Debug, Clone)]
pub struct CancelToken {
    control: Arc<PipelineControl>,
    exchange: u64,
}

impl CancelToken {
    pub fn new(control: Arc<PipelineControl>, exchange: u64) -> Self {
        Self { control, exchange }
    }

    pub fn exchange(&self) -> u64 {
        self.exchange
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_shutdown() || self.control.is_cancelled(self.exchange)
    }
}

/// Single-slot gate that keeps at most one exchange in flight.
#[derive(Debug, Clone)]
pub struct TurnGate {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for TurnGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnGate {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        // Capacity is 1 and the channel is fresh, so this cannot fail.
        tx.try_send(()).ok();
        Self { tx, rx }
    }

    /// Wait for the permit. Returns `None` once shutdown is requested.
    pub fn acquire(&self, control: &PipelineControl) -> Option<TurnPermit> {
        loop {
            if control.is_shutdown() {
                return None;
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => {
                    return Some(TurnPermit {
                        tx: self.tx.clone(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Take the permit only if it is free right now.
    pub fn try_acquire(&self) -> Option<TurnPermit> {
        self.rx.try_recv().ok().map(|()| TurnPermit {
            tx: self.tx.clone(),
        })
    }

    pub fn is_free(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Proof of holding the turn. Dropping it frees the gate.
#[derive(Debug)]
pub struct TurnPermit {
    tx: Sender<()>,
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        if self.tx.try_send(()).is_err() {
            tracing::trace!("turn gate already free");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_exchange_ids_increase() {
        let control = PipelineControl::new();
        assert_eq!(control.begin_exchange(), 1);
        assert_eq!(control.begin_exchange(), 2);
        assert_eq!(control.latest_exchange(), 2);
    }

    #[test]
    fn test_interrupt_cancels_started_exchanges_only() {
        let control = PipelineControl::new();
        let first = control.begin_exchange();
        assert!(!control.is_cancelled(first));

        assert_eq!(control.interrupt(), Some(first));
        assert!(control.is_cancelled(first));

        // Nothing new to cancel.
        assert_eq!(control.interrupt(), None);
        assert_eq!(control.interruptions(), 1);

        let second = control.begin_exchange();
        assert!(!control.is_cancelled(second));
    }

    #[test]
    fn test_cancel_token_trips_on_shutdown() {
        let control = PipelineControl::new();
        let token = CancelToken::new(control.clone(), control.begin_exchange());
        assert!(!token.is_cancelled());
        control.request_shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_wait_shutdown_wakes_early() {
        let control = PipelineControl::new();
        let waiter = {
            let control = control.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let requested = control.wait_shutdown_timeout(Duration::from_secs(10));
                (requested, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        control.request_shutdown();
        let (requested, elapsed) = waiter.join().unwrap();
        assert!(requested);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_shutdown_times_out() {
        let control = PipelineControl::new();
        assert!(!control.wait_shutdown_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_turn_gate_single_permit() {
        let gate = TurnGate::new();
        let control = PipelineControl::new();

        let permit = gate.acquire(&control).unwrap();
        assert!(gate.try_acquire().is_none());
        assert!(!gate.is_free());

        drop(permit);
        assert!(gate.is_free());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_turn_gate_acquire_returns_none_on_shutdown() {
        let gate = TurnGate::new();
        let control = PipelineControl::new();
        let _held = gate.acquire(&control).unwrap();

        let waiter = {
            let gate = gate.clone();
            let control = control.clone();
            thread::spawn(move || gate.acquire(&control).is_none())
        };
        thread::sleep(Duration::from_millis(20));
        control.request_shutdown();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_permit_released_from_other_thread() {
        let gate = TurnGate::new();
        let control = PipelineControl::new();
        let permit = gate.acquire(&control).unwrap();

        thread::spawn(move || drop(permit)).join().unwrap();
        assert!(gate.acquire(&control).is_some());
    }

    #[test]
    fn test_permit_drop_on_full_gate_keeps_one_slot() {
        let gate = TurnGate::new();
        let control = PipelineControl::new();
        let permit = gate.acquire(&control).unwrap();
        gate.tx.try_send(()).unwrap();

        drop(permit);
        let held = gate.try_acquire();
        assert!(held.is_some());
        assert!(gate.try_acquire().is_none());
    }
}
