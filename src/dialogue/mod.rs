//! Reply generation: conversation history, backends, retry and chunking.

pub mod anthropic;
pub mod conversation;
pub mod engine;
pub mod memory;
pub mod openai;
pub mod retry;
pub mod sentence;
pub mod sse;
pub mod tools;

pub use conversation::{ConversationState, Role, Turn, TurnStatus};
pub use engine::{DialogueBackend, DialogueRequest, MockDialogue, MockOutcome, ReplyStream};
pub use memory::MemoryStore;
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper};
pub use tools::{Tool, ToolSpec, Toolbox};

use crate::config::{Credentials, DialogueBackendKind, DialogueConfig};
use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::http;
use std::sync::Arc;
use std::time::Duration;

/// Map a non-success HTTP status to a dialogue error of the right kind.
pub(crate) fn status_error(backend: &str, status: u16, body: &str) -> ParleyError {
    let message = format!("{backend} returned HTTP {status}: {}", http::excerpt(body));
    if http::is_transient_status(status) {
        ParleyError::dialogue_transient(message)
    } else {
        ParleyError::dialogue_terminal(message)
    }
}

/// Map a transport failure: timeouts and refused connections are retried.
pub(crate) fn transport_error(backend: &str, e: reqwest::Error) -> ParleyError {
    let message = format!("{backend} request failed: {e}");
    if e.is_timeout() || e.is_connect() {
        ParleyError::dialogue_transient(message)
    } else {
        ParleyError::dialogue_terminal(message)
    }
}

/// The system prompt with `{lang}` filled in.
pub fn render_system_prompt(template: &str, language: &str) -> String {
    template.replace("{lang}", defaults::language_name(language))
}

/// The tools offered to the model, empty when tools are switched off.
pub fn toolbox(config: &DialogueConfig) -> Toolbox {
    if config.tools {
        Toolbox::builtin(MemoryStore::from_config(config))
    } else {
        Toolbox::new()
    }
}

/// Build the configured backend. Missing credentials fail here, at startup.
pub fn create_backend(
    config: &DialogueConfig,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Arc<dyn DialogueBackend>> {
    let model = config.model_name().to_string();
    let tools = Arc::new(toolbox(config));
    let backend: Arc<dyn DialogueBackend> = match config.backend {
        DialogueBackendKind::Anthropic => Arc::new(
            anthropic::AnthropicBackend::new(credentials.require_anthropic()?, &model, timeout)?
                .with_tools(tools.clone()),
        ),
        DialogueBackendKind::OpenAi => Arc::new(
            openai::OpenAiChatBackend::new(
                "openai",
                &credentials.openai_base_url,
                Some(credentials.require_openai()?),
                &model,
                timeout,
            )?
            .with_tools(tools.clone()),
        ),
        DialogueBackendKind::Ollama => Arc::new(
            openai::OpenAiChatBackend::new(
                "ollama",
                &credentials.ollama_base_url(),
                None,
                &model,
                timeout,
            )?
            .with_tools(tools.clone()),
        ),
    };
    tracing::info!(
        backend = backend.name(),
        model = %model,
        tools = ?tools,
        "dialogue backend ready"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DialogueErrorKind;

    fn credentials(vars: &[(&str, &str)]) -> Credentials {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Credentials::from_lookup(|key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn test_status_error_kinds() {
        let overloaded = status_error("anthropic", 529, "{\"type\":\"overloaded_error\"}");
        assert!(overloaded.is_transient());
        assert!(overloaded.to_string().contains("529"));

        match status_error("openai", 401, "bad key") {
            ParleyError::Dialogue { kind, .. } => assert_eq!(kind, DialogueErrorKind::Terminal),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_render_system_prompt() {
        assert_eq!(render_system_prompt("Reply in {lang}.", "ja"), "Reply in Japanese.");
        assert_eq!(render_system_prompt("Reply in {lang}.", "xx"), "Reply in xx.");
    }

    #[test]
    fn test_toolbox_follows_config() {
        let mut config = DialogueConfig {
            memory_dir: Some(std::path::PathBuf::from("/tmp/parley-knowledge")),
            ..DialogueConfig::default()
        };
        assert_eq!(toolbox(&config).len(), 3);

        config.memory = false;
        let names: Vec<&str> = toolbox(&config).specs().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["get_local_datetime", "get_cwd"]);

        config.tools = false;
        assert!(toolbox(&config).is_empty());
    }

    #[test]
    fn test_create_backend_requires_credentials() {
        let config = DialogueConfig::default();
        let err = create_backend(&config, &credentials(&[]), Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, ParleyError::MissingCredential { .. }));
    }

    #[test]
    fn test_create_ollama_backend_needs_no_key() {
        let config = DialogueConfig {
            backend: DialogueBackendKind::Ollama,
            ..DialogueConfig::default()
        };
        let backend =
            create_backend(&config, &credentials(&[]), Duration::from_secs(5)).unwrap();
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn test_create_anthropic_backend() {
        let config = DialogueConfig::default();
        let creds = credentials(&[("ANTHROPIC_API_KEY", "sk-test")]);
        let backend = create_backend(&config, &creds, Duration::from_secs(5)).unwrap();
        assert_eq!(backend.name(), "anthropic");
    }
}
