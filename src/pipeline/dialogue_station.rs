//! Dialogue station: owns the conversation and streams reply chunks.

use crate::defaults::{FALLBACK_REPLY, SUMMARY_HEADING, SUMMARY_PROMPT};
use crate::dialogue::conversation::{ConversationState, TurnStatus};
use crate::dialogue::engine::{DialogueBackend, DialogueRequest};
use crate::dialogue::memory::MemoryStore;
use crate::dialogue::render_system_prompt;
use crate::dialogue::retry::{RetryPolicy, Sleeper, ThreadSleeper, with_retry};
use crate::dialogue::sentence::SentenceChunker;
use crate::error::ParleyError;
use crate::pipeline::control::{CancelToken, PipelineControl, TurnPermit};
use crate::pipeline::error::StationError;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{ReplyChunk, Transcript};
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Numbers the chunks of one reply and hands the permit to the first one.
struct ChunkEmitter {
    exchange: u64,
    next_index: u32,
    permit: Option<TurnPermit>,
}

impl ChunkEmitter {
    fn send(
        &mut self,
        out: &Outlet<ReplyChunk>,
        text: String,
        is_final: bool,
    ) -> Result<(), StationError> {
        let chunk = ReplyChunk {
            exchange: self.exchange,
            index: self.next_index,
            text,
            is_final,
            permit: self.permit.take(),
        };
        self.next_index += 1;
        out.send(chunk)
    }
}

/// How the reply stream ended.
enum StreamEnd {
    Completed,
    Interrupted,
    Failed(ParleyError),
}

/// The only reader and writer of [`ConversationState`].
///
/// Each exchange commits its user and assistant turns together once the
/// reply has ended, so a failed or cancelled request never leaves a
/// dangling user turn.
pub struct DialogueStation {
    backend: Arc<dyn DialogueBackend>,
    control: Arc<PipelineControl>,
    conversation: ConversationState,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    system_prompt: String,
    max_tokens: u32,
    compact_after_turns: usize,
    memory: Option<MemoryStore>,
    handoff: Option<Sender<ConversationState>>,
}

impl DialogueStation {
    pub fn new(
        backend: Arc<dyn DialogueBackend>,
        control: Arc<PipelineControl>,
        history_turns: usize,
    ) -> Self {
        Self {
            backend,
            control,
            conversation: ConversationState::new(history_turns),
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            system_prompt: crate::defaults::SYSTEM_PROMPT.to_string(),
            max_tokens: crate::defaults::MAX_TOKENS,
            compact_after_turns: 0,
            memory: None,
            handoff: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.policy = policy;
        self.sleeper = sleeper;
        self
    }

    /// Template with a `{lang}` placeholder.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Summarize the history once it reaches `after_turns` turns, saving each
    /// summary to `memory`. 0 turns disables compaction.
    pub fn with_compaction(mut self, after_turns: usize, memory: Option<MemoryStore>) -> Self {
        self.compact_after_turns = after_turns;
        self.memory = memory;
        self
    }

    /// Send the final conversation here when the station stops.
    pub fn with_handoff(mut self, tx: Sender<ConversationState>) -> Self {
        self.handoff = Some(tx);
        self
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    fn system_for(&self, language: &str) -> String {
        let prompt = render_system_prompt(&self.system_prompt, language);
        match self.conversation.summary() {
            Some(summary) => format!("{prompt}\n\n{SUMMARY_HEADING}\n{summary}"),
            None => prompt,
        }
    }

    /// Replace the history with a summary written by the model.
    ///
    /// Any failure keeps the history as it is.
    fn compact(&mut self, language: &str, token: &CancelToken) {
        let request = DialogueRequest {
            system: self.system_for(language),
            history: self.conversation.turns().to_vec(),
            user: SUMMARY_PROMPT.to_string(),
            max_tokens: self.max_tokens,
        };
        let backend = self.backend.clone();
        let summary = with_retry(
            &self.policy,
            self.sleeper.as_ref(),
            &|| token.is_cancelled(),
            |_| {
                let mut summary = String::new();
                for delta in backend.stream_reply(&request)? {
                    if token.is_cancelled() {
                        return Err(ParleyError::dialogue_cancelled());
                    }
                    summary.push_str(&delta?);
                }
                Ok(summary)
            },
        );

        let summary = match summary {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => {
                tracing::warn!("model returned an empty summary, keeping history");
                return;
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::warn!(error = %e, "history compaction failed, keeping history");
                return;
            }
        };

        if let Some(memory) = &self.memory
            && let Err(e) = memory.save(&summary)
        {
            tracing::warn!(dir = %memory.dir().display(), error = %e, "failed to save summary note");
        }
        tracing::info!(
            turns = self.conversation.len(),
            chars = summary.len(),
            "history compacted"
        );
        self.conversation.compact(summary);
    }

    fn fail_exchange(
        &mut self,
        emitter: &mut ChunkEmitter,
        out: &Outlet<ReplyChunk>,
        user: String,
        partial: &str,
        error: ParleyError,
    ) -> Result<(), StationError> {
        let spoken = match partial.trim() {
            "" => FALLBACK_REPLY.to_string(),
            partial => format!("{partial} {FALLBACK_REPLY}"),
        };
        self.conversation.commit(user, spoken, TurnStatus::Fallback);
        emitter.send(out, FALLBACK_REPLY.to_string(), true)?;
        Err(StationError::Recoverable(format!(
            "Reply for exchange {} failed: {error}",
            emitter.exchange
        )))
    }
}

impl Station for DialogueStation {
    type Input = Transcript;
    type Output = ReplyChunk;

    fn name(&self) -> &'static str {
        "dialogue"
    }

    fn process(&mut self, transcript: Transcript, out: &Outlet<ReplyChunk>) -> Result<(), StationError> {
        let Transcript {
            text: user,
            language,
            exchange,
            permit,
        } = transcript;
        let token = CancelToken::new(self.control.clone(), exchange);
        if token.is_cancelled() {
            tracing::debug!(exchange, "exchange cancelled before the request");
            return Ok(());
        }

        if self.compact_after_turns > 0 && self.conversation.len() >= self.compact_after_turns {
            self.compact(&language, &token);
            if token.is_cancelled() {
                tracing::debug!(exchange, "exchange cancelled during compaction");
                return Ok(());
            }
        }

        let request = DialogueRequest {
            system: self.system_for(&language),
            history: self.conversation.turns().to_vec(),
            user: user.clone(),
            max_tokens: self.max_tokens,
        };
        let mut emitter = ChunkEmitter {
            exchange,
            next_index: 0,
            permit,
        };

        // The first delta is read inside the retried operation, so an error
        // before any text arrives is retried like a failed request.
        let backend = self.backend.clone();
        let opened = with_retry(
            &self.policy,
            self.sleeper.as_ref(),
            &|| token.is_cancelled(),
            |attempt| {
                tracing::debug!(exchange, attempt, backend = backend.name(), "requesting reply");
                let mut stream = backend.stream_reply(&request)?;
                let first = stream.next().transpose()?;
                Ok((stream, first))
            },
        );

        let (mut stream, first) = match opened {
            Ok(opened) => opened,
            Err(e) if e.is_cancelled() => {
                tracing::debug!(exchange, "exchange cancelled while waiting for the reply");
                return Ok(());
            }
            Err(e) => return self.fail_exchange(&mut emitter, out, user, "", e),
        };

        let mut reply = String::new();
        let mut chunker = SentenceChunker::new();
        let mut pending = first;
        let end = loop {
            let delta = match pending.take() {
                Some(delta) => delta,
                None => match stream.next() {
                    Some(Ok(delta)) => delta,
                    Some(Err(e)) => break StreamEnd::Failed(e),
                    None => break StreamEnd::Completed,
                },
            };
            if token.is_cancelled() {
                break StreamEnd::Interrupted;
            }
            reply.push_str(&delta);
            for sentence in chunker.push(&delta) {
                emitter.send(out, sentence, false)?;
            }
        };
        drop(stream);

        match end {
            StreamEnd::Completed => {
                if let Some(rest) = chunker.finish() {
                    emitter.send(out, rest, false)?;
                }
                emitter.send(out, String::new(), true)?;
                tracing::info!(exchange, chunks = emitter.next_index, "reply complete");
                self.conversation
                    .commit(user, reply.trim(), TurnStatus::Complete);
                Ok(())
            }
            StreamEnd::Interrupted => {
                tracing::info!(exchange, chars = reply.len(), "reply interrupted");
                if !reply.trim().is_empty() {
                    self.conversation
                        .commit(user, reply.trim(), TurnStatus::Interrupted);
                }
                Ok(())
            }
            StreamEnd::Failed(e) => self.fail_exchange(&mut emitter, out, user, &reply, e),
        }
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            turns = self.conversation.len(),
            appended = self.conversation.total_appended(),
            "conversation closed"
        );
        if let Some(tx) = self.handoff.take()
            && tx.try_send(self.conversation.clone()).is_err()
        {
            tracing::debug!("conversation handoff dropped, nobody is waiting");
        }
    }
}
