//! SSE stream decoder for OpenAI-compatible chat completions.
//!
//! Handles the `data: ` prefix, `[DONE]` termination, line buffering across
//! TCP chunk boundaries, blank keep-alive lines, and unparsable payloads
//! (skipped, never fatal). The last valid JSON frame is kept around so a
//! trailing `usage` object can be pulled out for logging after the stream
//! ends.

use serde_json::Value;

/// Buffered SSE decoder.
///
/// # Example
///
/// ```
/// use workflow_ctl::llm::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let data = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: [DONE]\n\n";
/// let values = decoder.decode(data);
/// assert_eq!(values.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    last_frame: Option<Value>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the complete JSON payloads they finish.
    ///
    /// `data:` lines are parsed, the `[DONE]` terminator and `event:` lines
    /// are ignored, and lines that fail to parse as JSON are skipped.
    /// Incomplete lines stay buffered until the next chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        let text = String::from_utf8_lossy(chunk);
        self.buffer.push_str(&text);

        let mut values = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(val) = Self::parse_line(&line) {
                self.last_frame = Some(val.clone());
                values.push(val);
            }
        }

        values
    }

    /// Flush any remaining buffer content after the stream ends.
    pub fn flush(&mut self) -> Vec<Value> {
        let remaining = std::mem::take(&mut self.buffer);

        let mut values = Vec::new();
        for line in remaining.lines() {
            if let Some(val) = Self::parse_line(line) {
                self.last_frame = Some(val.clone());
                values.push(val);
            }
        }

        values
    }

    /// The `usage` object of the last valid frame, if it carried one.
    ///
    /// Providers that report token usage attach it to the final frame before
    /// `[DONE]`; it is extracted for logging, not forwarded downstream.
    pub fn take_usage(&mut self) -> Option<Value> {
        self.last_frame
            .take()
            .and_then(|frame| frame.get("usage").cloned())
            .filter(|usage| !usage.is_null())
    }

    fn parse_line(line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("event:") {
            return None;
        }
        let data = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))?
            .trim();
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str::<Value>(data).ok()
    }
}
