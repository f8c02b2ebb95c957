//! Newline framing over an arbitrarily chunked stream.
//!
//! Chunks are appended to one growable buffer; every complete line is
//! trimmed and, when non-empty, handed to the callback in arrival order.
//! Byte input keeps an incomplete UTF-8 sequence back until the next chunk
//! completes it, so chunk boundaries never change the produced lines.

#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
    /// Tail of the last byte chunk that ended inside a UTF-8 sequence.
    pending_bytes: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and emit every complete line.
    pub fn push_str(&mut self, chunk: &str, mut on_line: impl FnMut(&str)) {
        self.buffer.push_str(chunk);
        self.drain_lines(&mut on_line);
    }

    /// Append raw bytes and emit every complete line.
    ///
    /// Invalid sequences are replaced with U+FFFD; a sequence cut at the end
    /// of the chunk is held back for the next call.
    pub fn push_bytes(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        self.pending_bytes.extend_from_slice(chunk);
        let mut rest: &[u8] = &self.pending_bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix decodes.
                    self.buffer
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let leftover = rest.to_vec();
        self.pending_bytes = leftover;
        self.drain_lines(&mut on_line);
    }

    /// Emit the unterminated tail, if any, and reset.
    pub fn finish(&mut self, mut on_line: impl FnMut(&str)) {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.buffer.push_str(&tail);
            self.pending_bytes.clear();
        }
        let line = self.buffer.trim();
        if !line.is_empty() {
            on_line(line);
        }
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.pending_bytes.is_empty()
    }

    fn drain_lines(&mut self, on_line: &mut impl FnMut(&str)) {
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].find('\n') {
            let end = start + offset;
            let line = self.buffer[start..end].trim();
            if !line.is_empty() {
                on_line(line);
            }
            start = end + 1;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
    }
}
