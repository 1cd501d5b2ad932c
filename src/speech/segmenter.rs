use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// A run of non-terminators followed by one or more terminators. `|` and the
/// Devanagari danda act as sentence separators in generated Hinglish.
static SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^.!?|।]+[.!?|।]+").unwrap_or_else(|e| panic!("invalid sentence pattern: {}", e))
});

const TERMINATORS: &[char] = &['.', '!', '?', '|', '।'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    #[error("Cumulative text regressed: {received} bytes received after {consumed} bytes consumed")]
    TextRegressed { consumed: usize, received: usize },

    #[error("Cumulative text diverged at byte {0}")]
    InvalidBoundary(usize),
}

/// Turns growing cumulative text into complete sentences, keeping the
/// unterminated tail until more text arrives.
#[derive(Debug, Default, Clone)]
pub struct SentenceBuffer {
    pending: String,
    consumed: usize,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the full text generated so far; returns the sentences it completed.
    /// On error the buffer is left untouched.
    pub fn absorb(&mut self, cumulative: &str) -> Result<Vec<String>, SegmentationError> {
        if cumulative.len() < self.consumed {
            let err = SegmentationError::TextRegressed {
                consumed: self.consumed,
                received: cumulative.len(),
            };
            log::error!("Segmenter: {}", err);
            return Err(err);
        }

        if !cumulative.is_char_boundary(self.consumed) {
            let err = SegmentationError::InvalidBoundary(self.consumed);
            log::error!("Segmenter: {}", err);
            return Err(err);
        }

        self.pending.push_str(&cumulative[self.consumed..]);
        self.consumed = cumulative.len();

        let mut sentences = Vec::new();
        let mut last_end = 0;
        for found in SENTENCE.find_iter(&self.pending) {
            last_end = found.end();
            let sentence = found.as_str().trim();
            // Bare punctuation runs like "..." carry nothing to speak
            if sentence.chars().any(char::is_alphanumeric) {
                sentences.push(sentence.to_string());
            }
        }
        self.pending.drain(..last_end);

        if !sentences.is_empty() {
            log::debug!(
                "Segmenter: {} sentence(s) complete, {} bytes pending",
                sentences.len(),
                self.pending.len()
            );
        }

        Ok(sentences)
    }

    /// End of text: return the remaining fragment as a final sentence, adding
    /// a full stop when it has no terminator, and reset the buffer.
    pub fn flush(&mut self) -> Option<String> {
        let tail = self.pending.trim().to_string();
        self.reset();

        if !tail.chars().any(char::is_alphanumeric) {
            return None;
        }

        if tail.ends_with(TERMINATORS) {
            Some(tail)
        } else {
            Some(format!("{}.", tail))
        }
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.consumed = 0;
    }

    /// Text received but not yet part of a complete sentence
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_round_trip() {
        let mut buffer = SentenceBuffer::new();

        let first = buffer.absorb("Hello world. How are you? I am").unwrap();
        assert_eq!(first, vec!["Hello world.", "How are you?"]);
        assert_eq!(buffer.pending(), " I am");

        let second = buffer.absorb("Hello world. How are you? I am fine.").unwrap();
        assert_eq!(second, vec!["I am fine."]);
        assert_eq!(buffer.pending(), "");
    }

    #[test]
    fn test_token_by_token_feed_loses_nothing() {
        let text = "Dekho bacchon! Force ka matlab hai push ya pull. Samjhe? Chalo aage badhte hain";
        let mut buffer = SentenceBuffer::new();
        let mut sentences = Vec::new();

        let mut cumulative = String::new();
        for ch in text.chars() {
            cumulative.push(ch);
            sentences.extend(buffer.absorb(&cumulative).unwrap());
        }
        sentences.extend(buffer.flush());

        assert_eq!(
            sentences,
            vec![
                "Dekho bacchon!",
                "Force ka matlab hai push ya pull.",
                "Samjhe?",
                "Chalo aage badhte hain."
            ]
        );
    }

    #[test]
    fn test_separators_and_danda() {
        let mut buffer = SentenceBuffer::new();
        let sentences = buffer.absorb("पहला वाक्य। second part | third?! ").unwrap();
        assert_eq!(sentences, vec!["पहला वाक्य।", "second part |", "third?!"]);
    }

    #[test]
    fn test_punctuation_only_runs_are_dropped() {
        let mut buffer = SentenceBuffer::new();
        let sentences = buffer.absorb("Wait... what?").unwrap();
        assert_eq!(sentences, vec!["Wait...", "what?"]);

        let mut buffer = SentenceBuffer::new();
        assert!(buffer.absorb("  . ! ").unwrap().is_empty());
    }

    #[test]
    fn test_regressed_text_is_rejected() {
        let mut buffer = SentenceBuffer::new();
        buffer.absorb("Hello there").unwrap();

        let err = buffer.absorb("Hello").unwrap_err();
        assert_eq!(
            err,
            SegmentationError::TextRegressed {
                consumed: 11,
                received: 5
            }
        );
        // State untouched
        assert_eq!(buffer.pending(), "Hello there");
    }

    #[test]
    fn test_split_character_is_rejected() {
        let mut buffer = SentenceBuffer::new();
        buffer.absorb("ab").unwrap();
        assert_eq!(
            buffer.absorb("aगb").unwrap_err(),
            SegmentationError::InvalidBoundary(2)
        );
    }

    #[test]
    fn test_flush() {
        let mut buffer = SentenceBuffer::new();
        buffer.absorb("Done. Almost there").unwrap();
        assert_eq!(buffer.flush(), Some("Almost there.".to_string()));
        assert_eq!(buffer.flush(), None);

        // Flush resets, so a fresh response starts from zero
        assert_eq!(buffer.absorb("New answer!").unwrap(), vec!["New answer!"]);
    }

    #[test]
    fn test_reset() {
        let mut buffer = SentenceBuffer::new();
        buffer.absorb("Some partial").unwrap();
        buffer.reset();
        assert_eq!(buffer.pending(), "");
        assert_eq!(buffer.absorb("Fresh.").unwrap(), vec!["Fresh."]);
    }
}
