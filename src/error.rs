//! Error types for parley.

use std::fmt;
use thiserror::Error;

/// Classification of a dialogue failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueErrorKind {
    /// Overload, rate limit or server hiccup. Worth retrying.
    Transient,
    /// Auth failure, malformed request, or retries exhausted.
    Terminal,
    /// The exchange was interrupted or the pipeline is shutting down.
    Cancelled,
}

impl fmt::Display for DialogueErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogueErrorKind::Transient => write!(f, "transient"),
            DialogueErrorKind::Terminal => write!(f, "terminal"),
            DialogueErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ParleyError {
    // Configuration errors (fatal at startup)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Missing credential: set {var} in the environment")]
    MissingCredential { var: String },

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Audio device error: {message}")]
    Device { message: String },

    // Stage errors
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Dialogue failed ({kind}): {message}")]
    Dialogue {
        kind: DialogueErrorKind,
        message: String,
    },

    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("{operation} timed out")]
    Timeout { operation: String },

    // Conversions
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ParleyError {
    /// Shorthand for a transient dialogue error.
    pub fn dialogue_transient(message: impl Into<String>) -> Self {
        ParleyError::Dialogue {
            kind: DialogueErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a terminal dialogue error.
    pub fn dialogue_terminal(message: impl Into<String>) -> Self {
        ParleyError::Dialogue {
            kind: DialogueErrorKind::Terminal,
            message: message.into(),
        }
    }

    /// Shorthand for a cancelled dialogue.
    pub fn dialogue_cancelled() -> Self {
        ParleyError::Dialogue {
            kind: DialogueErrorKind::Cancelled,
            message: "exchange cancelled".to_string(),
        }
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ParleyError::Dialogue { kind, .. } => *kind == DialogueErrorKind::Transient,
            ParleyError::Timeout { .. } => true,
            ParleyError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this error reports cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ParleyError::Dialogue {
                kind: DialogueErrorKind::Cancelled,
                ..
            }
        )
    }

    /// Whether this error must abort startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ParleyError::Configuration { .. }
                | ParleyError::ConfigInvalidValue { .. }
                | ParleyError::MissingCredential { .. }
                | ParleyError::Toml(_)
        )
    }
}

/// Result type alias for parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_configuration_error_display() {
        let error = ParleyError::Configuration {
            message: "frame duration must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration error: frame duration must be positive"
        );
        assert!(error.is_configuration());
    }

    #[test]
    fn test_missing_credential_display() {
        let error = ParleyError::MissingCredential {
            var: "ANTHROPIC_API_KEY".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Missing credential: set ANTHROPIC_API_KEY in the environment"
        );
        assert!(error.is_configuration());
    }

    #[test]
    fn test_device_not_found_display() {
        let error = ParleyError::DeviceNotFound {
            device: "hw:3".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: hw:3");
        assert!(!error.is_configuration());
    }

    #[test]
    fn test_dialogue_error_display_includes_kind() {
        let error = ParleyError::dialogue_transient("overloaded");
        assert_eq!(error.to_string(), "Dialogue failed (transient): overloaded");

        let error = ParleyError::dialogue_terminal("invalid x-api-key");
        assert_eq!(
            error.to_string(),
            "Dialogue failed (terminal): invalid x-api-key"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ParleyError::dialogue_transient("529").is_transient());
        assert!(
            ParleyError::Timeout {
                operation: "dialogue".to_string()
            }
            .is_transient()
        );
        assert!(!ParleyError::dialogue_terminal("401").is_transient());
        assert!(!ParleyError::dialogue_cancelled().is_transient());
        assert!(
            !ParleyError::Synthesis {
                message: "bad voice".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_cancelled_classification() {
        assert!(ParleyError::dialogue_cancelled().is_cancelled());
        assert!(!ParleyError::dialogue_terminal("nope").is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "missing");
        let error: ParleyError = io_error.into();
        assert!(matches!(error, ParleyError::Io(_)));
        assert!(error.to_string().contains("missing"));
    }

    #[test]
    fn test_toml_error_conversion_is_configuration() {
        let toml_error = toml::from_str::<toml::Value>("key = 'unclosed").unwrap_err();
        let error: ParleyError = toml_error.into();
        assert!(error.is_configuration());
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ParleyError>();
        assert_sync::<ParleyError>();
    }
}
