//! Text mode: typed lines stand in for speech and replies are printed.

use crate::pipeline::control::{PipelineControl, TurnGate, TurnPermit};
use crate::pipeline::error::StationError;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{ReplyChunk, Transcript};
use crossbeam_channel::Sender;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Read one line per turn and send it as a transcript.
///
/// The reader waits for the turn permit before reading, so a prompt is only
/// accepted once the previous reply has been printed. EOF stops the reader
/// and, by dropping `tx`, lets the stations downstream drain and stop.
///
/// The thread may stay blocked in `read_line` after shutdown; it is never
/// joined.
pub fn spawn_stdin_reader(
    mut reader: Box<dyn BufRead + Send>,
    gate: TurnGate,
    control: Arc<PipelineControl>,
    tx: Sender<Transcript>,
    language: String,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let outlet = Outlet::new(tx, control.clone());
        let mut line = String::new();
        loop {
            let Some(permit) = gate.acquire(&control) else {
                break;
            };

            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    tracing::debug!("end of input");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to read input");
                    break;
                }
            }
            if control.is_shutdown() {
                break;
            }

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let exchange = control.begin_exchange();
            tracing::debug!(exchange, "typed: {text}");
            let transcript = Transcript {
                text: text.to_string(),
                language: language.clone(),
                exchange,
                permit: Some(permit),
            };
            if outlet.send(transcript).is_err() {
                break;
            }
        }
    })
}

/// Terminal station that prints each reply on one line.
pub struct TextPrinter {
    writer: Box<dyn Write + Send>,
    control: Arc<PipelineControl>,
    /// Held until the reply has been printed completely.
    permit: Option<TurnPermit>,
    line_open: bool,
}

impl TextPrinter {
    pub fn new(writer: Box<dyn Write + Send>, control: Arc<PipelineControl>) -> Self {
        Self {
            writer,
            control,
            permit: None,
            line_open: false,
        }
    }

    fn write_chunk(&mut self, text: &str, is_final: bool) -> std::io::Result<()> {
        let text = text.trim();
        if !text.is_empty() {
            if self.line_open {
                self.writer.write_all(b" ")?;
            }
            self.writer.write_all(text.as_bytes())?;
            self.line_open = true;
        }
        if is_final {
            if self.line_open {
                self.writer.write_all(b"\n")?;
            }
            self.line_open = false;
        }
        self.writer.flush()
    }
}

impl Station for TextPrinter {
    type Input = ReplyChunk;
    type Output = ();

    fn name(&self) -> &'static str {
        "printer"
    }

    fn process(&mut self, mut chunk: ReplyChunk, _out: &Outlet<()>) -> Result<(), StationError> {
        if self.control.is_cancelled(chunk.exchange) {
            return Ok(());
        }
        if let Some(permit) = chunk.permit.take() {
            self.permit = Some(permit);
        }

        let result = self.write_chunk(&chunk.text, chunk.is_final);
        if chunk.is_final {
            self.permit = None;
        }
        result.map_err(|e| StationError::Fatal(format!("Failed to write reply: {e}")))
    }

    fn shutdown(&mut self) {
        if self.line_open {
            if let Err(e) = self.writer.write_all(b"\n").and_then(|()| self.writer.flush()) {
                tracing::debug!(error = %e, "failed to close reply line");
            }
        }
    }
}
