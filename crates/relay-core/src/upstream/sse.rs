//! SSE decoding for upstream streams
//!
//! The backend emits OpenAI-shaped chunks as `data: <json>` lines ending
//! with `data: [DONE]`. Byte chunks from the socket can split a line
//! anywhere, so decoding buffers until a full line is available.

/// One event relayed from an upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One SSE payload (the text after `data: `), usually a JSON chunk.
    Data(String),
    /// The upstream sent its `[DONE]` marker; the stream is complete.
    Done,
    /// The stream broke mid-flight. Terminal.
    Error(String),
}

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a byte chunk; returns every line completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the stream closed without a trailing newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Extract the payload from one SSE line, if it is a data line.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"cho").is_empty());
        let lines = buffer.push(b"ices\":[]}\n\ndata: [DONE]\n");
        assert_eq!(
            lines,
            vec![
                "data: {\"choices\":[]}".to_string(),
                String::new(),
                "data: [DONE]".to_string()
            ]
        );
    }

    #[test]
    fn strips_carriage_returns() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b"data: x\r\n");
        assert_eq!(lines, vec!["data: x".to_string()]);
    }

    #[test]
    fn payload_extraction() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload(": keep-alive"), None);
        assert_eq!(data_payload("event: ping"), None);
    }

    #[test]
    fn remainder_is_returned_once() {
        let mut buffer = SseLineBuffer::new();
        buffer.push(b"data: tail-without-newline");
        assert_eq!(
            buffer.take_remainder(),
            Some("data: tail-without-newline".to_string())
        );
        assert_eq!(buffer.take_remainder(), None);
    }
}
