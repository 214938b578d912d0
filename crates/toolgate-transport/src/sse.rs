//! Incremental parser for `text/event-stream` payloads.

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one.
    pub event: String,
    /// Payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

/// Line-by-line SSE parser.
///
/// Feed lines (without their terminator) through [`SseParser::push_line`];
/// an event is returned when a blank line completes it. `event:` sets the
/// pending event type, `data:` appends payload, and lines starting with `:`
/// are comments (heartbeats) and are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let event = self.event.take().unwrap_or_else(|| "message".to_string());
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent { event, data });
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start_matches(' ').to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.trim_start_matches(' ').to_string());
        }
        // Unknown fields (id:, retry:, ...) are ignored.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_line("event: session").is_none());
        assert!(parser.push_line("data: abc-123").is_none());
        let event = parser.push_line("").unwrap();
        assert_eq!(event.event, "session");
        assert_eq!(event.data, "abc-123");
    }

    #[test]
    fn test_multiple_data_lines_joined() {
        let mut parser = SseParser::new();
        parser.push_line("data: line one");
        parser.push_line("data: line two");
        let event = parser.push_line("").unwrap();
        assert_eq!(event.event, "message");
        assert_eq!(event.data, "line one\nline two");
    }

    #[test]
    fn test_comments_are_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.push_line(": heartbeat").is_none());
        assert!(parser.push_line("").is_none());
    }

    #[test]
    fn test_blank_line_without_pending_event_yields_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.push_line("").is_none());
    }

    #[test]
    fn test_crlf_lines() {
        let mut parser = SseParser::new();
        parser.push_line("event: message\r");
        parser.push_line("data: {\"x\":1}\r");
        let event = parser.push_line("\r").unwrap();
        assert_eq!(event.data, "{\"x\":1}");
    }

    #[test]
    fn test_consecutive_events() {
        let mut parser = SseParser::new();
        parser.push_line("data: first");
        let first = parser.push_line("").unwrap();
        parser.push_line("data: second");
        let second = parser.push_line("").unwrap();
        assert_eq!(first.data, "first");
        assert_eq!(second.data, "second");
    }
}
