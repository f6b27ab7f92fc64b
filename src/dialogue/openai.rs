//! OpenAI-compatible chat completions with streaming.
//!
//! Also serves local Ollama, which exposes the same API under `/v1`.

use crate::dialogue::engine::{DialogueBackend, DialogueRequest, ReplyStream};
use crate::dialogue::sse::SseReader;
use crate::dialogue::tools::{RoundItem, RoundStream, ToolCall, ToolLoop, ToolRounds, Toolbox};
use crate::dialogue::{status_error, transport_error};
use crate::error::{ParleyError, Result};
use crate::http;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct OpenAiChatBackend {
    client: reqwest::blocking::Client,
    name: &'static str,
    base_url: String,
    api_key: Option<String>,
    model: String,
    tools: Arc<Toolbox>,
}

impl std::fmt::Debug for OpenAiChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl OpenAiChatBackend {
    /// `api_key` is optional because local servers do not check it.
    pub fn new(
        name: &'static str,
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout)?,
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
            tools: Arc::new(Toolbox::new()),
        })
    }

    pub fn with_tools(mut self, tools: Arc<Toolbox>) -> Self {
        self.tools = tools;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body(&self, request: &DialogueRequest, followups: &[Value]) -> Value {
        let messages: Vec<Value> = std::iter::once(("system", request.system.as_str()))
            .filter(|(_, content)| !content.is_empty())
            .chain(request.messages())
            .map(|(role, content)| json!({"role": role, "content": content}))
            .chain(followups.iter().cloned())
            .collect();
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
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
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }

    fn open_round(&self, request: &DialogueRequest, followups: &[Value]) -> Result<RoundStream> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .json(&self.body(request, followups));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(|e| transport_error(self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(self.name, status.as_u16(), &body));
        }

        Ok(Box::new(ChatStream::new(SseReader::new(BufReader::new(response)))))
    }
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: ChoiceDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A fragment of one tool call. Later fragments carry only more arguments.
#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

struct ChatStream<R> {
    events: SseReader<R>,
    /// Tool calls of this round, by their stream index.
    calls: Vec<ToolCall>,
    done: bool,
}

impl<R: BufRead> ChatStream<R> {
    fn new(events: SseReader<R>) -> Self {
        Self {
            events,
            calls: Vec::new(),
            done: false,
        }
    }

    fn accumulate(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            if delta.index >= self.calls.len() {
                self.calls.resize_with(delta.index + 1, ToolCall::default);
            }
            let call = &mut self.calls[delta.index];
            if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                call.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                    call.name = name;
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }
    }

    /// Pending calls once the round is over. Some servers send no ids.
    fn take_calls(&mut self) -> Option<Result<RoundItem>> {
        let calls: Vec<ToolCall> = std::mem::take(&mut self.calls)
            .into_iter()
            .enumerate()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{index}");
                }
                call
            })
            .collect();
        if calls.is_empty() {
            None
        } else {
            Some(Ok(RoundItem::Calls(calls)))
        }
    }

    fn fail(&mut self, error: ParleyError) -> Option<Result<RoundItem>> {
        self.done = true;
        self.calls.clear();
        Some(Err(error))
    }
}

impl<R: BufRead> Iterator for ChatStream<R> {
    type Item = Result<RoundItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return self.take_calls();
            }
            let event = match self.events.next() {
                Some(Ok(event)) => event,
                Some(Err(e)) => return self.fail(e),
                None => {
                    self.done = true;
                    continue;
                }
            };
            let data = event.data.trim();
            if data == "[DONE]" {
                self.done = true;
                continue;
            }
            if data.is_empty() {
                continue;
            }

            let chunk: Chunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    return self.fail(ParleyError::dialogue_terminal(format!(
                        "malformed stream chunk: {e}"
                    )));
                }
            };
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };
            if choice.finish_reason.is_some() {
                self.done = true;
            }
            self.accumulate(choice.delta.tool_calls.unwrap_or_default());
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                return Some(Ok(RoundItem::Text(text)));
            }
        }
    }
}

/// Tool rounds over chat completions: an assistant message with
/// `tool_calls` answered by one `tool` message per call.
struct ChatRounds {
    backend: OpenAiChatBackend,
    request: DialogueRequest,
}

impl ToolRounds for ChatRounds {
    fn open(&self, followups: &[Value]) -> Result<RoundStream> {
        tracing::debug!(backend = self.backend.name, followups = followups.len(), "tool round");
        self.backend.open_round(&self.request, followups)
    }

    fn followups(&self, text: &str, calls: &[ToolCall], results: &[String]) -> Vec<Value> {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        let content = if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };

        let mut messages = vec![json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls,
        })];
        messages.extend(calls.iter().zip(results).map(|(call, result)| {
            json!({"role": "tool", "tool_call_id": call.id, "content": result})
        }));
        messages
    }
}

impl DialogueBackend for OpenAiChatBackend {
    fn stream_reply(&self, request: &DialogueRequest) -> Result<ReplyStream> {
        tracing::debug!(
            backend = self.name,
            model = %self.model,
            turns = request.history.len(),
            tools = self.tools.len(),
            "chat completion request"
        );
        let first = self.open_round(request, &[])?;
        let rounds = ChatRounds {
            backend: self.clone(),
            request: request.clone(),
        };
        Ok(Box::new(ToolLoop::new(rounds, self.tools.clone(), first)))
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::conversation::{Turn, TurnStatus};
    use crate::dialogue::tools::CurrentDirectory;
    use std::io::Cursor;

    fn stream(body: &str) -> ChatStream<Cursor<Vec<u8>>> {
        ChatStream::new(SseReader::new(Cursor::new(body.as_bytes().to_vec())))
    }

    fn texts(body: &str) -> Vec<String> {
        stream(body)
            .map(|item| match item.unwrap() {
                RoundItem::Text(text) => text,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    fn backend() -> OpenAiChatBackend {
        OpenAiChatBackend::new(
            "openai",
            "https://api.openai.com/v1/",
            Some("k"),
            "gpt-test",
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_body_puts_system_first() {
        let backend = backend();
        assert_eq!(backend.endpoint(), "https://api.openai.com/v1/chat/completions");

        let request = DialogueRequest {
            system: "be nice".into(),
            history: vec![Turn::user("a"), Turn::assistant("b", TurnStatus::Complete)],
            user: "c".into(),
            max_tokens: 10,
        };
        let body = backend.body(&request, &[]);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[3]["content"], "c");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_body_advertises_functions() {
        let backend = backend().with_tools(Arc::new(Toolbox::new().with(CurrentDirectory)));
        let request = DialogueRequest {
            system: String::new(),
            history: Vec::new(),
            user: "where am I".into(),
            max_tokens: 10,
        };
        let body = backend.body(&request, &[json!({"role": "tool"})]);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_cwd");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_stream_reads_deltas_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there.\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        );
        assert_eq!(texts(body), vec!["Hi", " there."]);
    }

    #[test]
    fn test_stream_stops_on_finish_reason() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"extra\"}}]}\n\n",
        );
        assert_eq!(texts(body), vec!["end"]);
    }

    #[test]
    fn test_stream_accumulates_tool_calls_by_index() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"type\":\"function\",\"function\":{\"name\":\"search_memory\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"tea\\\"}\"}},{\"index\":1,\"function\":{\"name\":\"get_cwd\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let items: Vec<RoundItem> = stream(body).map(|i| i.unwrap()).collect();
        assert_eq!(items.len(), 1);
        let RoundItem::Calls(calls) = &items[0] else {
            panic!("expected calls, got {:?}", items[0]);
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].input(), json!({"query": "tea"}));
        assert_eq!(calls[1].name, "get_cwd");
        // Ollama leaves ids out.
        assert_eq!(calls[1].id, "call_1");
    }

    #[test]
    fn test_followups_answer_each_call() {
        let rounds = ChatRounds {
            backend: backend(),
            request: DialogueRequest {
                system: String::new(),
                history: Vec::new(),
                user: "hi".into(),
                max_tokens: 1,
            },
        };
        let calls = vec![
            ToolCall {
                id: "a".into(),
                name: "get_cwd".into(),
                arguments: "{}".into(),
            },
            ToolCall {
                id: "b".into(),
                name: "get_local_datetime".into(),
                arguments: String::new(),
            },
        ];
        let messages = rounds.followups("", &calls, &["/tmp".into(), "2026-01-01".into()]);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "assistant");
        assert!(messages[0]["content"].is_null());
        assert_eq!(messages[0]["tool_calls"][1]["function"]["name"], "get_local_datetime");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "b");
        assert_eq!(messages[2]["content"], "2026-01-01");
    }

    #[test]
    fn test_malformed_chunk_is_terminal_error() {
        let items: Vec<Result<RoundItem>> = stream("data: {not json}\n\n").collect();
        assert_eq!(items.len(), 1);
        assert!(!items[0].as_ref().unwrap_err().is_transient());
    }
}
