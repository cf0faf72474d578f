/// Events emitted while decoding a provider's streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental answer text.
    Content { delta: String },

    /// Incremental reasoning/thinking text. Never part of the final answer;
    /// the orchestrator surfaces it as `thinking` progress events.
    Reasoning { delta: String },

    /// A retry is scheduled after a transient failure.
    Retry {
        attempt: u32,
        max_retries: u32,
        delay_secs: f64,
        reason: String,
    },

    /// All retries failed; the turn will terminate.
    RetryExhausted {
        attempt: u32,
        max_retries: u32,
        reason: String,
    },

    /// Stream-level error (connection dropped mid-body, undecodable frame).
    Error { message: String },
}

/// Parse a single SSE line: `event: <type>` or `data: <payload>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug, PartialEq)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Incremental line splitter for SSE byte streams: feed chunks, get complete
/// lines; partial trailing lines stay buffered.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut lines: Vec<String> = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_parsing() {
        assert_eq!(
            parse_sse_line("event: message_start"),
            Some(SseParsed::Event("message_start".to_string()))
        );
        assert_eq!(
            parse_sse_line("data: {\"x\":1}"),
            Some(SseParsed::Data("{\"x\":1}".to_string()))
        );
        assert_eq!(parse_sse_line(": keepalive"), None);
    }

    #[test]
    fn line_buffer_holds_partials() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("data: par"), Vec::<String>::new());
        assert_eq!(buf.push("tial\ndata: next\ndata: tai"), vec![
            "data: partial".to_string(),
            "data: next".to_string(),
        ]);
        assert_eq!(buf.push("l\n"), vec!["data: tail".to_string()]);
    }

    #[test]
    fn line_buffer_strips_crlf() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("data: x\r\n"), vec!["data: x".to_string()]);
    }
}
