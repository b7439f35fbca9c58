//! Incremental sentence splitting for streamed text

/// Text without a boundary is force-split once it grows past this many bytes
pub const MAX_SENTENCE_BYTES: usize = 10_000;

const TERMINATORS: [char; 3] = ['.', '!', '?'];
const CLOSERS: [char; 4] = ['"', '\'', ')', ']'];
const ABBREVIATIONS: [&str; 10] = [
    "dr", "mr", "mrs", "ms", "etc", "e.g", "i.e", "inc", "ltd", "co",
];

/// Splits a stream of text deltas into whole sentences
///
/// A sentence ends at `.`, `!` or `?` (plus any trailing quotes or brackets)
/// followed by whitespace. A boundary at the very end of the buffer is not
/// trusted until the next delta arrives, so `3.` + `14` stays one sentence.
#[derive(Debug)]
pub struct SentenceSplitter {
    buffer: String,
    max_bytes: usize,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSplitter {
    /// Splitter with the default length cap
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_bytes(MAX_SENTENCE_BYTES)
    }

    /// Splitter with a custom length cap
    #[must_use]
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Add a delta, returning every sentence it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        loop {
            let cut = match self.boundary() {
                Some(end) => end,
                None if self.buffer.len() > self.max_bytes => self.forced_cut(),
                None => break,
            };
            let sentence = self.buffer[..cut].trim().to_string();
            self.buffer = self.buffer[cut..].trim_start().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Buffered text not yet returned as a sentence
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn boundary(&self) -> Option<usize> {
        let text = self.buffer.as_str();
        let mut chars = text.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            if !TERMINATORS.contains(&ch) {
                continue;
            }

            let mut end = idx + ch.len_utf8();
            while let Some(&(next_idx, next)) = chars.peek() {
                if !(TERMINATORS.contains(&next) || CLOSERS.contains(&next)) {
                    break;
                }
                end = next_idx + next.len_utf8();
                chars.next();
            }

            let rest = &text[end..];
            match rest.chars().next() {
                None => return None,
                Some(after) if !after.is_whitespace() => continue,
                Some(_) => {}
            }

            if ch == '.' && is_abbreviation(&text[..idx]) {
                match rest.trim_start().chars().next() {
                    None => return None,
                    Some(c) if c.is_lowercase() => continue,
                    Some(_) => {}
                }
            }
            return Some(end);
        }
        None
    }

    fn forced_cut(&self) -> usize {
        let mut cut = self.max_bytes.min(self.buffer.len());
        while !self.buffer.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            return self.buffer.chars().next().map_or(0, char::len_utf8);
        }
        match self.buffer[..cut].rfind(char::is_whitespace) {
            Some(space) if space > 0 => space,
            _ => cut,
        }
    }
}

fn is_abbreviation(before: &str) -> bool {
    let word = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn split_all(deltas: &[&str]) -> Vec<String> {
        let mut splitter = SentenceSplitter::new();
        let mut out: Vec<String> = deltas.iter().flat_map(|d| splitter.push(d)).collect();
        out.extend(splitter.finish());
        out
    }

    #[test]
    fn test_splits_on_terminators() {
        assert_eq!(
            split_all(&["Hello there. How", " are you? Fine!"]),
            ["Hello there.", "How are you?", "Fine!"]
        );
    }

    #[test]
    fn test_waits_for_next_delta_before_cutting() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Pi is 3.").is_empty());
        assert!(splitter.push("14 roughly").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("Pi is 3.14 roughly"));
    }

    #[test]
    fn test_abbreviation_followed_by_lowercase_is_not_a_boundary() {
        assert_eq!(
            split_all(&["Ask Dr. smith about it. Then leave."]),
            ["Ask Dr. smith about it.", "Then leave."]
        );
        assert_eq!(
            split_all(&["Fruit, e.g. apples, is good. Yes."]),
            ["Fruit, e.g. apples, is good.", "Yes."]
        );
    }

    #[test]
    fn test_keeps_closing_quotes_with_sentence() {
        assert_eq!(
            split_all(&["He said \"stop.\" Then", " nothing?! Odd."]),
            ["He said \"stop.\"", "Then nothing?!", "Odd."]
        );
    }

    #[test]
    fn test_forced_split_on_long_text() {
        let mut splitter = SentenceSplitter::with_max_bytes(10);
        let sentences = splitter.push("aaaa bbbb cccc dddd");
        assert_eq!(sentences, ["aaaa bbbb"]);
        assert_eq!(splitter.pending(), "cccc dddd");
    }

    #[test]
    fn test_forced_split_respects_char_boundaries() {
        let mut splitter = SentenceSplitter::with_max_bytes(5);
        let sentences = splitter.push("ééééé");
        assert!(sentences.iter().all(|s| s.chars().all(|c| c == 'é')));
        assert!(!sentences.is_empty());
    }

    #[test]
    fn test_finish_empty() {
        let mut splitter = SentenceSplitter::new();
        splitter.push("Done.  ");
        assert_eq!(splitter.finish(), None);
    }
}
