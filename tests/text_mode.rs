//! Typed sessions: stdin lines in, printed replies out.

use parley::defaults::{FALLBACK_REPLY, SUMMARY_PROMPT};
use parley::dialogue::{MemoryStore, MockDialogue, MockOutcome, TurnStatus};
use parley::{Pipeline, PipelineConfig};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_text(config: PipelineConfig, input: &str, dialogue: MockDialogue) -> (String, parley::PipelineReport) {
    let output = SharedBuf::default();
    let handle = Pipeline::new(config)
        .start_text(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(output.clone()),
            Arc::new(dialogue),
        )
        .unwrap();
    handle.wait();
    let report = handle.stop();
    (output.contents(), report)
}

#[test]
fn test_lines_are_answered_in_order_with_history() {
    let dialogue = MockDialogue::new();
    let (output, report) = run_text(
        PipelineConfig::default(),
        "what is rust\n\n   \nand cargo\n",
        dialogue.clone(),
    );

    assert_eq!(output, "You said: what is rust.\nYou said: and cargo.\n");
    assert_eq!(report.exchanges, 2);

    let requests = dialogue.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].history.len(), 2);
    assert_eq!(requests[1].user, "and cargo");
}

#[test]
fn test_failed_reply_prints_apology_and_session_continues() {
    let dialogue = MockDialogue::new()
        .then(MockOutcome::Terminal)
        .then(MockOutcome::reply(&["Back again."]));
    let (output, report) = run_text(PipelineConfig::default(), "one\ntwo\n", dialogue);

    assert_eq!(output, format!("{FALLBACK_REPLY}\nBack again.\n"));
    let conversation = report.conversation.unwrap();
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation.turns()[1].status, TurnStatus::Fallback);
    assert_eq!(conversation.turns()[3].status, TurnStatus::Complete);
    assert_eq!(report.fatal_errors, 0);
}

#[test]
fn test_history_window_keeps_latest_pairs() {
    let mut config = PipelineConfig::default();
    config.history_turns = 2;
    let dialogue = MockDialogue::new();
    let (_, report) = run_text(config, "a\nb\nc\n", dialogue.clone());

    let requests = dialogue.requests();
    assert_eq!(requests[2].history.len(), 2);
    assert_eq!(requests[2].history[0].content, "b");

    let conversation = report.conversation.unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.total_appended(), 6);
}

#[test]
fn test_empty_input_ends_without_exchanges() {
    let (output, report) = run_text(PipelineConfig::default(), "", MockDialogue::new());
    assert!(output.is_empty());
    assert_eq!(report.exchanges, 0);
    assert_eq!(report.conversation.map(|c| c.len()), Some(0));
}

#[test]
fn test_long_session_is_compacted_into_a_note() {
    let notes = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.compact_after_turns = 4;
    config.memory = Some(MemoryStore::new(notes.path()));
    let dialogue = MockDialogue::new()
        .then(MockOutcome::reply(&["Hello."]))
        .then(MockOutcome::reply(&["Osaka is lovely."]))
        .then(MockOutcome::reply(&["# Travel\n", "The user plans a trip to Osaka."]));

    let (output, report) = run_text(config, "hi\ni am going to osaka\nwhat did I say\n", dialogue.clone());

    assert_eq!(
        output,
        "Hello.\nOsaka is lovely.\nYou said: what did I say.\n"
    );
    let requests = dialogue.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[2].user, SUMMARY_PROMPT);
    assert!(requests[3].history.is_empty());
    assert!(requests[3].system.contains("The user plans a trip to Osaka."));

    let conversation = report.conversation.unwrap();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.summary(), Some("# Travel\nThe user plans a trip to Osaka."));

    let saved = MemoryStore::new(notes.path()).search("osaka").unwrap();
    assert_eq!(saved, vec!["# Travel\nThe user plans a trip to Osaka."]);
}
