//! Split streamed reply text into speakable sentences.

/// Terminators that end a sentence on their own.
const HARD_BREAKS: &[char] = &['。', '！', '？', '\n'];

/// Terminators that end a sentence only when followed by whitespace.
const SOFT_BREAKS: &[char] = &['.', '!', '?'];

/// Accumulates deltas and hands out complete sentences as soon as they end.
#[derive(Debug, Default)]
pub struct SentenceChunker {
    buffer: String,
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a delta and return every sentence it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let end = i + c.len_utf8();
            let cut = if HARD_BREAKS.contains(&c) {
                true
            } else if SOFT_BREAKS.contains(&c) {
                // At the end of the buffer the next delta decides.
                matches!(chars.peek(), Some((_, next)) if next.is_whitespace())
            } else {
                false
            };

            if cut {
                let sentence = self.buffer[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }

        self.buffer.drain(..start);
        sentences
    }

    /// Flush whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Text received but not yet returned as a sentence.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_terminator_then_space() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("Hello there").is_empty());
        assert_eq!(chunker.push(". How"), vec!["Hello there."]);
        assert_eq!(chunker.push(" are you? I"), vec!["How are you?"]);
        assert_eq!(chunker.finish().as_deref(), Some("I"));
        assert_eq!(chunker.finish(), None);
    }

    #[test]
    fn test_waits_for_next_delta_at_boundary() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("Version 2.").is_empty());
        assert!(chunker.push("5 is out!").is_empty());
        assert_eq!(chunker.push(" Yes"), vec!["Version 2.5 is out!"]);
        assert_eq!(chunker.pending(), " Yes");
    }

    #[test]
    fn test_hard_breaks_split_immediately() {
        let mut chunker = SentenceChunker::new();
        assert_eq!(chunker.push("こんにちは。元気"), vec!["こんにちは。"]);
        assert_eq!(chunker.push("ですか？"), vec!["元気ですか？"]);
        assert_eq!(chunker.push("line one\nline"), vec!["line one"]);
        assert_eq!(chunker.pending(), "line");
    }

    #[test]
    fn test_repeated_terminators_stay_together() {
        let mut chunker = SentenceChunker::new();
        assert_eq!(chunker.push("Really?! Wow... ok"), vec!["Really?!", "Wow..."]);
    }

    #[test]
    fn test_blank_pieces_are_skipped() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("\n\n  \n").is_empty());
        assert_eq!(chunker.finish(), None);
    }
}
