//! Reply generation interface and a scripted mock.

use crate::dialogue::conversation::Turn;
use crate::error::{ParleyError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lazily produced reply text, one delta per item. One-shot.
pub type ReplyStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Everything a backend needs to generate one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueRequest {
    pub system: String,
    /// Prior turns, oldest first.
    pub history: Vec<Turn>,
    pub user: String,
    pub max_tokens: u32,
}

impl DialogueRequest {
    /// History plus the new user turn, as (role, content) pairs.
    pub fn messages(&self) -> Vec<(&'static str, &str)> {
        self.history
            .iter()
            .map(|t| (t.role.as_str(), t.content.as_str()))
            .chain(std::iter::once(("user", self.user.as_str())))
            .collect()
    }
}

/// A language model that streams replies.
///
/// `stream_reply` returns once the response has started; errors after that
/// arrive through the stream. Dropping the stream abandons the request.
pub trait DialogueBackend: Send + Sync {
    fn stream_reply(&self, request: &DialogueRequest) -> Result<ReplyStream>;

    fn name(&self) -> &str;
}

impl<T: DialogueBackend + ?Sized> DialogueBackend for Arc<T> {
    fn stream_reply(&self, request: &DialogueRequest) -> Result<ReplyStream> {
        (**self).stream_reply(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// One scripted response of [`MockDialogue`].
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Stream these deltas.
    Reply(Vec<String>),
    /// Fail to open with a transient error.
    Transient,
    /// Fail to open with a terminal error.
    Terminal,
    /// Open, then fail transiently before the first delta.
    StreamTransient,
    /// Stream these deltas, then fail terminally.
    FailMidStream(Vec<String>),
}

impl MockOutcome {
    pub fn reply(deltas: &[&str]) -> Self {
        MockOutcome::Reply(deltas.iter().map(|d| d.to_string()).collect())
    }

    pub fn fail_mid_stream(deltas: &[&str]) -> Self {
        MockOutcome::FailMidStream(deltas.iter().map(|d| d.to_string()).collect())
    }
}

/// Scripted backend. Outcomes are consumed in order; after the script runs
/// out every request echoes the user text.
#[derive(Debug, Clone, Default)]
pub struct MockDialogue {
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    requests: Arc<Mutex<Vec<DialogueRequest>>>,
    delta_delay: Duration,
}

impl MockDialogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: MockOutcome) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
        self
    }

    /// Pause before every delta, to leave room for interruptions.
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    /// Requests received, including failed attempts.
    pub fn requests(&self) -> Vec<DialogueRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

struct ScriptedStream {
    deltas: VecDeque<String>,
    tail: Option<ParleyError>,
    delay: Duration,
}

impl Iterator for ScriptedStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.deltas.pop_front() {
            Some(delta) => Some(Ok(delta)),
            None => self.tail.take().map(Err),
        }
    }
}

impl DialogueBackend for MockDialogue {
    fn stream_reply(&self, request: &DialogueRequest) -> Result<ReplyStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let outcome = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let (deltas, tail) = match outcome {
            None => (vec![format!("You said: {}.", request.user)], None),
            Some(MockOutcome::Reply(deltas)) => (deltas, None),
            Some(MockOutcome::Transient) => {
                return Err(ParleyError::dialogue_transient("mock overloaded (529)"));
            }
            Some(MockOutcome::Terminal) => {
                return Err(ParleyError::dialogue_terminal("mock rejected request (400)"));
            }
            Some(MockOutcome::StreamTransient) => (
                Vec::new(),
                Some(ParleyError::dialogue_transient("mock stream overloaded")),
            ),
            Some(MockOutcome::FailMidStream(deltas)) => (
                deltas,
                Some(ParleyError::dialogue_terminal("mock stream broke")),
            ),
        };

        Ok(Box::new(ScriptedStream {
            deltas: deltas.into(),
            tail,
            delay: self.delta_delay,
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
