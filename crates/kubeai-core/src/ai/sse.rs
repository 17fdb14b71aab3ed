//! Line framing for streamed response bodies
//!
//! OpenAI and Gemini stream SSE (`data: ` lines), Ollama streams
//! newline-delimited JSON. Both arrive as arbitrary byte chunks, so a line
//! may be split across chunks, and so may a multi-byte character.

/// Accumulates partial lines between chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed
    ///
    /// Lines are returned without their terminator and with a trailing `\r`
    /// stripped; blank lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.partial[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(line) = decode_line(&self.partial[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.partial.drain(..start);
        lines
    }

    /// Flush whatever is left once the stream ends without a final newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        decode_line(&rest)
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Payload of an SSE `data:` line; comments and other fields yield `None`
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// End-of-stream marker used by OpenAI-compatible servers
pub const DONE_MARKER: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_carried_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let lines = buf.push(b":1}\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let text = "data: 🔧 ok\n".as_bytes();
        let (a, b) = text.split_at(8);
        let mut buf = LineBuffer::new();
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["data: 🔧 ok"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"data: one\r\n\r\n\ndata: two\r\n");
        assert_eq!(lines, vec!["data: one", "data: two"]);
    }

    #[test]
    fn test_finish_returns_unterminated_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"{\"done\":true}");
        assert_eq!(buf.finish().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn test_sse_data_prefix() {
        assert_eq!(sse_data("data: [DONE]"), Some(DONE_MARKER));
        assert_eq!(sse_data("data:{}"), Some("{}"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: ping"), None);
    }
}
