//! Tools the model may call while it replies, and the loop that runs them.
//!
//! A backend streams one model round at a time. When a round ends in tool
//! calls, [`ToolLoop`] runs them, hands the results back and streams the
//! next round. Callers only ever see reply text.

use crate::dialogue::memory::MemoryStore;
use crate::error::{ParleyError, Result};
use serde_json::{Value, json};
use std::sync::Arc;

/// Follow-up rounds allowed after the first one, per reply.
pub const MAX_TOOL_ROUNDS: usize = 4;

/// How a tool is advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema of the input object.
    pub parameters: Value,
}

pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    fn call(&self, input: &Value) -> Result<String>;
}

/// Current local date and time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDateTime;

impl Tool for LocalDateTime {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_local_datetime",
            description: "Return the current local date and time.",
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn call(&self, _input: &Value) -> Result<String> {
        Ok(chrono::Local::now().format("%Y-%m-%d %H:%M:%S %:z").to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentDirectory;

impl Tool for CurrentDirectory {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_cwd",
            description: "Return the directory parley was started in.",
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn call(&self, _input: &Value) -> Result<String> {
        Ok(std::env::current_dir()?.display().to_string())
    }
}

/// Searches notes saved from earlier conversations.
#[derive(Debug, Clone)]
pub struct SearchMemory {
    store: MemoryStore,
}

impl SearchMemory {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl Tool for SearchMemory {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_memory",
            description: "Search notes from earlier conversations. Returns every note containing the query.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Word or phrase to look for"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    fn call(&self, input: &Value) -> Result<String> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ParleyError::Other("search_memory needs a string 'query'".to_string()))?;
        let notes = self.store.search(query)?;
        if notes.is_empty() {
            return Ok(format!("No notes mention '{query}'."));
        }
        Ok(notes.join("\n"))
    }
}

/// The tools offered to the model on every request.
#[derive(Clone, Default)]
pub struct Toolbox {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.spec().name))
            .finish()
    }
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Local time and working directory, plus memory search when a store
    /// is given.
    pub fn builtin(memory: Option<MemoryStore>) -> Self {
        let toolbox = Self::new().with(LocalDateTime).with(CurrentDirectory);
        match memory {
            Some(store) => toolbox.with(SearchMemory::new(store)),
            None => toolbox,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    /// Run one call. Failures are reported to the model as text.
    pub fn call(&self, name: &str, input: &Value) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.spec().name == name) else {
            tracing::warn!(tool = name, "model called an unknown tool");
            return format!("error: unknown tool {name}");
        };
        match tool.call(input) {
            Ok(output) => {
                tracing::debug!(tool = name, chars = output.len(), "tool call finished");
                output
            }
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                format!("error: {e}")
            }
        }
    }
}

/// A call the model asked for. `arguments` is the raw JSON it sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// The arguments as a JSON object. Empty or malformed input reads as `{}`.
    pub fn input(&self) -> Value {
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(value @ Value::Object(_)) => value,
            _ => json!({}),
        }
    }
}

/// One item of a model round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundItem {
    Text(String),
    /// The round ended asking for these calls. Always the last item.
    Calls(Vec<ToolCall>),
}

pub type RoundStream = Box<dyn Iterator<Item = Result<RoundItem>> + Send>;

/// The wire-specific half of the loop.
pub trait ToolRounds: Send {
    /// Stream the next round, with every follow-up message so far appended
    /// to the original request.
    fn open(&self, followups: &[Value]) -> Result<RoundStream>;

    /// Messages that record a round's `text` and `calls` and answer them
    /// with `results`, in call order.
    fn followups(&self, text: &str, calls: &[ToolCall], results: &[String]) -> Vec<Value>;
}

/// Reply text across as many rounds as the model needs.
pub struct ToolLoop<P> {
    rounds: P,
    toolbox: Arc<Toolbox>,
    current: Option<RoundStream>,
    followups: Vec<Value>,
    round_text: String,
    completed: usize,
    /// The previous round's text ended without whitespace.
    needs_space: bool,
}

impl<P: ToolRounds> ToolLoop<P> {
    pub fn new(rounds: P, toolbox: Arc<Toolbox>, first: RoundStream) -> Self {
        Self {
            rounds,
            toolbox,
            current: Some(first),
            followups: Vec::new(),
            round_text: String::new(),
            completed: 0,
            needs_space: false,
        }
    }

    fn run_calls(&mut self, calls: Vec<ToolCall>) -> Result<Option<RoundStream>> {
        if self.completed >= MAX_TOOL_ROUNDS {
            tracing::warn!(rounds = self.completed, "tool round limit reached, ending reply");
            return Ok(None);
        }
        let results: Vec<String> = calls
            .iter()
            .map(|call| {
                tracing::debug!(tool = %call.name, id = %call.id, "running tool");
                self.toolbox.call(&call.name, &call.input())
            })
            .collect();

        let text = std::mem::take(&mut self.round_text);
        self.needs_space = !text.is_empty() && !text.ends_with(char::is_whitespace);
        let followups = self.rounds.followups(&text, &calls, &results);
        self.followups.extend(followups);
        self.completed += 1;
        self.rounds.open(&self.followups).map(Some)
    }
}

impl<P: ToolRounds> Iterator for ToolLoop<P> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.current.as_mut()?.next();
            match item {
                Some(Ok(RoundItem::Text(mut text))) => {
                    if std::mem::take(&mut self.needs_space) && !text.starts_with(char::is_whitespace) {
                        text.insert(0, ' ');
                    }
                    self.round_text.push_str(&text);
                    return Some(Ok(text));
                }
                Some(Ok(RoundItem::Calls(calls))) if calls.is_empty() => self.current = None,
                Some(Ok(RoundItem::Calls(calls))) => {
                    self.current = None;
                    match self.run_calls(calls) {
                        Ok(next) => self.current = next,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Some(Err(e)) => {
                    self.current = None;
                    return Some(Err(e));
                }
                None => self.current = None,
            }
        }
    }
}
