//! Minimal server-sent-events decoder over a blocking reader.

use crate::error::{ParleyError, Result};
use std::io::BufRead;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Iterator of events read line by line.
///
/// Multiple `data:` lines are joined with `\n`. Comments and unknown fields
/// are ignored. A trailing event without a blank line is still dispatched.
pub struct SseReader<R> {
    reader: R,
    line: String,
    finished: bool,
}

impl<R: BufRead> SseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for SseReader<R> {
    type Item = Result<SseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut event = SseEvent::default();
        let mut has_data = false;
        loop {
            self.line.clear();
            let read = match self.reader.read_line(&mut self.line) {
                Ok(n) => n,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(ParleyError::dialogue_transient(format!(
                        "event stream read failed: {e}"
                    ))));
                }
            };

            if read == 0 {
                self.finished = true;
                return (has_data || event.event.is_some()).then_some(Ok(event));
            }

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if has_data || event.event.is_some() {
                    return Some(Ok(event));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event.event = Some(value.to_string()),
                "data" => {
                    if has_data {
                        event.data.push('\n');
                    }
                    event.data.push_str(value);
                    has_data = true;
                }
                _ => {}
            }
        }
    }
}
