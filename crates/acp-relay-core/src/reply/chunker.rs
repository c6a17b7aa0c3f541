//! Size-bounded text chunking
//!
//! Splits accumulated text at the most natural break that fits: paragraph,
//! then line, then sentence, then word, then a hard cut. Lengths are counted
//! in chars, never bytes.

/// Accumulates streamed text and cuts it into chunks of at most `max_chars`
#[derive(Debug, Clone)]
pub struct BlockChunker {
    max_chars: usize,
    buffer: String,
}

impl BlockChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            buffer: String::new(),
        }
    }

    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty()
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Take the chunks that are ready.
    ///
    /// Without `force` only text beyond one full chunk is cut, so a short
    /// tail stays buffered for more input. With `force` everything goes.
    pub fn drain(&mut self, force: bool) -> Vec<String> {
        let mut chunks = Vec::new();
        loop {
            let len = self.buffer.chars().count();
            if len == 0 || (!force && len <= self.max_chars) {
                break;
            }
            let cut = if len <= self.max_chars {
                self.buffer.len()
            } else {
                self.break_offset()
            };

            let rest = self.buffer.split_off(cut);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            let trimmed_start = self.buffer.len() - self.buffer.trim_start().len();
            self.buffer.drain(..trimmed_start);
        }
        if force {
            self.buffer.clear();
        }
        chunks
    }

    /// Byte offset to cut at, within the first `max_chars` chars.
    fn break_offset(&self) -> usize {
        let window_end = self
            .buffer
            .char_indices()
            .nth(self.max_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());
        let window = &self.buffer[..window_end];

        if let Some(i) = window.rfind("\n\n").filter(|i| *i > 0) {
            return i + 2;
        }
        if let Some(i) = window.rfind('\n').filter(|i| *i > 0) {
            return i + 1;
        }
        if let Some(i) = last_sentence_end(window) {
            return i;
        }
        if let Some((i, c)) = window
            .char_indices()
            .rev()
            .find(|(i, c)| c.is_whitespace() && *i > 0)
        {
            return i + c.len_utf8();
        }
        window_end
    }
}

/// Offset just past the last `.`, `!` or `?` that is followed by whitespace.
fn last_sentence_end(window: &str) -> Option<usize> {
    let mut found = None;
    let mut chars = window.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, next)) = chars.peek() {
                if next.is_whitespace() {
                    found = Some(i + c.len_utf8());
                }
            }
        }
    }
    found
}
