//! Error types and reporting for pipeline stations.

use crate::error::ParleyError;
use std::fmt;

/// Errors that can occur during station processing.
#[derive(Debug, Clone, PartialEq)]
pub enum StationError {
    /// Recoverable error that allows the station to continue processing.
    Recoverable(String),
    /// Fatal error that stops the station and the whole pipeline.
    Fatal(String),
    /// A neighbouring queue is gone. Normal while shutting down.
    Closed,
}

impl StationError {
    /// Device failures stop the pipeline; everything else drops the item.
    pub fn from_parley(error: &ParleyError) -> Self {
        match error {
            ParleyError::Device { .. } | ParleyError::DeviceNotFound { .. } => {
                StationError::Fatal(error.to_string())
            }
            _ => StationError::Recoverable(error.to_string()),
        }
    }
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
            StationError::Closed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter that writes station errors to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(station, "{msg}"),
            StationError::Fatal(msg) => tracing::error!(station, "{msg}"),
            StationError::Closed => tracing::debug!(station, "channel closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_error_display() {
        let recoverable = StationError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = StationError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
        assert_eq!(StationError::Closed.to_string(), "Channel closed");
    }

    #[test]
    fn test_device_errors_are_fatal() {
        let device = ParleyError::Device {
            message: "stream died".to_string(),
        };
        assert!(matches!(
            StationError::from_parley(&device),
            StationError::Fatal(_)
        ));

        let stt = ParleyError::Transcription {
            message: "bad audio".to_string(),
        };
        assert!(matches!(
            StationError::from_parley(&stt),
            StationError::Recoverable(_)
        ));
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        // Just ensure it doesn't panic
        reporter.report("test", &StationError::Recoverable("test error".to_string()));
        reporter.report("test", &StationError::Fatal("test error".to_string()));
    }
}
