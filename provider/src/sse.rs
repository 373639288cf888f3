//! Server-sent-event framing for streaming completions.
//!
//! Providers frame streamed chunks as lines of `data: <json>` terminated by
//! the literal `data: [DONE]`. Network reads can split anywhere, so the
//! framer keeps the trailing partial line in its buffer until the rest
//! arrives. Parsing the payload is the caller's job; the framer only
//! recovers line boundaries.

/// One framed payload from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    /// A `data:` line payload (JSON text, unparsed).
    Payload(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental SSE line framer.
///
/// Feed raw text as it arrives; complete `data:` lines come back in order.
/// Non-data lines (comments, `event:` fields, blank separators) are ignored.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: String,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and drain every complete line from the buffer.
    pub fn push(&mut self, chunk: &str) -> Vec<SseData> {
        self.buffer.push_str(chunk);

        let mut out = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(data) = parse_line(line.trim_end_matches(|c| c == '\n' || c == '\r')) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a final unterminated line at end-of-stream.
    pub fn finish(&mut self) -> Option<SseData> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(line.trim_end_matches('\r'))
    }
}

fn parse_line(line: &str) -> Option<SseData> {
    let payload = line.strip_prefix("data: ").or_else(|| {
        // Some servers omit the space after the colon.
        line.strip_prefix("data:")
    })?;
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseData::Done);
    }
    Some(SseData::Payload(payload.to_string()))
}
