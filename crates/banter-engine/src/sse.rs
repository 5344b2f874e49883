//! Server-Sent Events parsing for streamed API responses.

use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::EngineError;

/// One complete SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if the server sent one.
    pub event: Option<String>,
    /// Concatenated `data:` lines, joined with newlines.
    pub data: String,
}

/// Incremental SSE field accumulator. Feed it lines; it hands back an
/// event whenever a blank separator line closes one.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line from the wire.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            // keep-alive comment
            return None;
        }
        if let Some(event_type) = line.strip_prefix("event: ") {
            self.event = Some(event_type.to_string());
        } else if let Some(data) = line.strip_prefix("data: ") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(data);
        }
        // id: and retry: fields are not used by this client
        None
    }

    /// Flush a trailing event that was not blank-line terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data),
        })
    }
}

/// Read an SSE response body to the end, calling `on_event` for each
/// complete event.
pub async fn parse_sse_stream(
    response: reqwest::Response,
    mut on_event: impl FnMut(SseEvent),
) -> Result<(), EngineError> {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
    let mut lines = reader.lines();

    let mut parser = SseParser::new();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| EngineError::Stream(e.to_string()))?
    {
        if let Some(event) = parser.push_line(&line) {
            on_event(event);
        }
    }

    if let Some(event) = parser.finish() {
        on_event(event);
    }

    Ok(())
}
