//! Server-Sent Events framing.
//!
//! Minimal incremental parser and encoder for the `text/event-stream`
//! format as both MCP Streamable HTTP and the A2A protocol use it: events
//! carry JSON payloads in `data:` lines and are terminated by a blank
//! line.  Comment lines (leading `:`) are ignored; multi-line `data:`
//! fields are joined with `\n` per the SSE specification.

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Joined `data:` payload.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

/// Incremental SSE parser.
///
/// Feed raw network bytes as they arrive; complete events are returned as
/// soon as their terminating blank line is seen.  Partial lines are
/// buffered across calls.
///
/// # Example
///
/// ```rust
/// use rpc::sse::SseParser;
///
/// let mut parser = SseParser::new();
/// let events = parser.feed(b"data: {\"x\":1}\n\n");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].data, "{\"x\":1}");
/// ```
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event_name: Option<String>,
    event_id: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every event completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let mut line = self.buffer[..newline].to_string();
            self.buffer.drain(..=newline);
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.find(':') {
                Some(colon) => {
                    let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
                    (line[..colon].to_string(), value.to_string())
                }
                None => (line, String::new()),
            };

            match field.as_str() {
                "data" => self.data_lines.push(value),
                "event" => self.event_name = Some(value),
                "id" => self.event_id = Some(value),
                // "retry" and unknown fields are ignored.
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.event_name.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event_name.take(),
            data: self.data_lines.join("\n"),
            id: self.event_id.take(),
        };
        self.data_lines.clear();
        Some(event)
    }
}

/// Encode one event for the wire: `data: <payload>\n\n`.
pub fn encode_event(data: &str) -> String {
    format!("data: {}\n\n", data)
}

/// Encode one named event: `event: <name>\ndata: <payload>\n\n`.
pub fn encode_named_event(event: &str, data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}
