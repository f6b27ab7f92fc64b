//! Anthropic Messages API with streaming.

use crate::dialogue::engine::{DialogueBackend, DialogueRequest, ReplyStream};
use crate::dialogue::sse::{SseEvent, SseReader};
use crate::dialogue::tools::{RoundItem, RoundStream, ToolCall, ToolLoop, ToolRounds, Toolbox};
use crate::dialogue::{status_error, transport_error};
use crate::error::{ParleyError, Result};
use crate::http;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicBackend {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
    tools: Arc<Toolbox>,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl AnthropicBackend {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            api_key: api_key.to_string(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            model: model.to_string(),
            tools: Arc::new(Toolbox::new()),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_tools(mut self, tools: Arc<Toolbox>) -> Self {
        self.tools = tools;
        self
    }

    fn body(&self, request: &DialogueRequest, followups: &[Value]) -> Value {
        let messages: Vec<Value> = request
            .messages()
            .into_iter()
            .filter(|(_, content)| !content.is_empty())
            .map(|(role, content)| json!({"role": role, "content": content}))
            .chain(followups.iter().cloned())
            .collect();
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": messages,
            "stream": true,
        });
        if !self.tools.is_empty() {
            let tools: Vec<Value> = self
                .tools
                .specs()
                .into_iter()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "input_schema": spec.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }

    fn open_round(&self, request: &DialogueRequest, followups: &[Value]) -> Result<RoundStream> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.body(request, followups))
            .send()
            .map_err(|e| transport_error("anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error("anthropic", status.as_u16(), &body));
        }

        Ok(Box::new(AnthropicStream::new(SseReader::new(BufReader::new(
            response,
        )))))
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    index: usize,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    content_block: Option<ContentBlock>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// What one SSE event means for the reply.
#[derive(Debug, PartialEq)]
enum Step {
    Text(String),
    ToolStart { index: usize, call: ToolCall },
    ToolInput { index: usize, json: String },
    Skip,
    Done,
}

fn interpret(event: &SseEvent) -> Result<Step> {
    if event.data.is_empty() {
        return Ok(Step::Skip);
    }
    let parsed: StreamEvent = serde_json::from_str(&event.data)
        .map_err(|e| ParleyError::dialogue_terminal(format!("malformed stream event: {e}")))?;

    match parsed.kind.as_str() {
        "content_block_start" => match parsed.content_block {
            Some(block) if block.kind == "tool_use" => Ok(Step::ToolStart {
                index: parsed.index,
                call: ToolCall {
                    id: block.id,
                    name: block.name,
                    arguments: String::new(),
                },
            }),
            _ => Ok(Step::Skip),
        },
        "content_block_delta" => {
            let Some(delta) = parsed.delta else {
                return Ok(Step::Skip);
            };
            if let Some(json) = delta.partial_json {
                return Ok(Step::ToolInput {
                    index: parsed.index,
                    json,
                });
            }
            Ok(delta
                .text
                .filter(|t| !t.is_empty())
                .map_or(Step::Skip, Step::Text))
        }
        "message_stop" => Ok(Step::Done),
        "error" => {
            let error = parsed.error.unwrap_or(ApiError {
                kind: "unknown_error".to_string(),
                message: String::new(),
            });
            let message = format!("anthropic stream error {}: {}", error.kind, error.message);
            match error.kind.as_str() {
                "overloaded_error" | "rate_limit_error" | "api_error" => {
                    Err(ParleyError::dialogue_transient(message))
                }
                _ => Err(ParleyError::dialogue_terminal(message)),
            }
        }
        _ => Ok(Step::Skip),
    }
}

struct AnthropicStream<R> {
    events: SseReader<R>,
    /// Tool-use blocks of this round, by content block index.
    calls: Vec<(usize, ToolCall)>,
    done: bool,
}

impl<R: BufRead> AnthropicStream<R> {
    fn new(events: SseReader<R>) -> Self {
        Self {
            events,
            calls: Vec::new(),
            done: false,
        }
    }

    fn finish(&mut self) -> Option<Result<RoundItem>> {
        self.done = true;
        if self.calls.is_empty() {
            return None;
        }
        let calls = std::mem::take(&mut self.calls);
        Some(Ok(RoundItem::Calls(calls.into_iter().map(|(_, call)| call).collect())))
    }

    fn fail(&mut self, error: ParleyError) -> Option<Result<RoundItem>> {
        self.done = true;
        self.calls.clear();
        Some(Err(error))
    }
}

impl<R: BufRead> Iterator for AnthropicStream<R> {
    type Item = Result<RoundItem>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let event = match self.events.next()? {
                Ok(event) => event,
                Err(e) => return self.fail(e),
            };
            match interpret(&event) {
                Ok(Step::Text(text)) => return Some(Ok(RoundItem::Text(text))),
                Ok(Step::ToolStart { index, call }) => self.calls.push((index, call)),
                Ok(Step::ToolInput { index, json }) => {
                    if let Some((_, call)) = self.calls.iter_mut().find(|(i, _)| *i == index) {
                        call.arguments.push_str(&json);
                    }
                }
                Ok(Step::Skip) => {}
                Ok(Step::Done) => return self.finish(),
                Err(e) => return self.fail(e),
            }
        }
        None
    }
}

/// Tool rounds over the Messages API: `tool_use` blocks answered by
/// `tool_result` blocks.
struct AnthropicRounds {
    backend: AnthropicBackend,
    request: DialogueRequest,
}

impl ToolRounds for AnthropicRounds {
    fn open(&self, followups: &[Value]) -> Result<RoundStream> {
        tracing::debug!(followups = followups.len(), "anthropic tool round");
        self.backend.open_round(&self.request, followups)
    }

    fn followups(&self, text: &str, calls: &[ToolCall], results: &[String]) -> Vec<Value> {
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
        content.extend(calls.iter().map(|call| {
            json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input(),
            })
        }));
        let answers: Vec<Value> = calls
            .iter()
            .zip(results)
            .map(|(call, result)| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": result,
                })
            })
            .collect();
        vec![
            json!({"role": "assistant", "content": content}),
            json!({"role": "user", "content": answers}),
        ]
    }
}

impl DialogueBackend for AnthropicBackend {
    fn stream_reply(&self, request: &DialogueRequest) -> Result<ReplyStream> {
        tracing::debug!(
            model = %self.model,
            turns = request.history.len(),
            tools = self.tools.len(),
            "anthropic request"
        );
        let first = self.open_round(request, &[])?;
        let rounds = AnthropicRounds {
            backend: self.clone(),
            request: request.clone(),
        };
        Ok(Box::new(ToolLoop::new(rounds, self.tools.clone(), first)))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
