/// Stateful splitter that turns a fragment stream into sentences.
///
/// Fragments append to a pending buffer; a cut happens at the end of the last
/// run of `.`, `!` or `?` currently buffered, handing back everything before
/// it as one sentence. Text is never altered on the way through, so extracted
/// sentences plus the pending tail always re-concatenate to the exact input.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    pending: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment and extract whatever is now complete.
    ///
    /// At most one sentence comes out per call: the cut takes the last
    /// terminator in the buffer, so several sentence ends arriving together
    /// leave as a single merged sentence.
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        // Terminators are ASCII, so one byte past the match is a valid char
        // boundary.
        let Some(last) = self
            .pending
            .bytes()
            .rposition(|b| matches!(b, b'.' | b'!' | b'?'))
        else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last + 1);
        let sentence = std::mem::replace(&mut self.pending, rest);
        vec![sentence]
    }

    /// Give back the unterminated tail, trimmed, and reset.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.pending);
        let tail = tail.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    /// Text still waiting for a terminator.
    pub fn pending(&self) -> &str {
        &self.pending
    }
}
