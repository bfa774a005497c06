//! SSE frame scanner and stream-terminal classification for the agent
//! gateway's streaming protocol.
//!
//! Frames are `event:` / `data:` line pairs separated by blank lines. The
//! gateway ends every round with one of three terminal shapes (a named
//! `done` event, a typed envelope frame, or a bare `{messages: […]}` body)
//! and closes the stream with the `[DONE]` sentinel.

use memoh_protocol::RoundPayload;
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Hard cap for a single SSE line. A line past this fails the stream.
pub const MAX_LINE_BYTES: usize = 2 * 1024 * 1024;
/// Initial scanner allocation; grows on demand up to [`MAX_LINE_BYTES`].
pub const INITIAL_LINE_CAPACITY: usize = 64 * 1024;

/// One parsed SSE frame. Multiple `data:` lines are joined with newlines
/// per the SSE spec.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental scanner: feed it raw body chunks, get complete frames back.
///
/// Keeps at most one partial line buffered; the buffer is bounded so a
/// malfunctioning gateway cannot grow it without limit.
pub struct FrameScanner {
    line_buf: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            line_buf: String::with_capacity(INITIAL_LINE_CAPACITY),
            event: None,
            data_lines: Vec::new(),
        }
    }

    /// Consume one body chunk and return every frame it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        self.line_buf.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.push_line(line) {
                frames.push(frame);
            }
        }

        if self.line_buf.len() > MAX_LINE_BYTES {
            return Err(AgentError::LineTooLong { max: MAX_LINE_BYTES });
        }
        Ok(frames)
    }

    /// Flush a trailing frame at EOF (a well-behaved server ends with a
    /// blank line, but the last frame must not be lost if it doesn't).
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.push_line(line.trim_end_matches('\r'));
        }
        self.take_frame()
    }

    fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.take_frame();
        }
        if line.starts_with(':') {
            return None; // SSE comment / keep-alive
        }
        if let Some(event) = line.strip_prefix("event:") {
            self.event = Some(event.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // Unknown field names are ignored per the SSE spec.
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
        })
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// The `[DONE]` sentinel ends the stream and is never forwarded.
pub fn is_done_sentinel(frame: &SseFrame) -> bool {
    frame.data.trim() == "[DONE]"
}

/// Classify a frame against the three terminal shapes, in fixed order:
///
/// 1. named terminal — `event: done` with a `{messages, skills?}` body;
/// 2. envelope terminal — `{type: "agent_end" | "done", …}`, where
///    `agent_end` carries the messages inline and `done` nests them under
///    `data`;
/// 3. bare terminal — an untyped body that is `{messages: […]}` with a
///    non-empty array.
///
/// Returns the round payload to persist, or `None` for ordinary chunks.
pub fn terminal_round(frame: &SseFrame) -> Option<RoundPayload> {
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    if frame.event.as_deref() == Some("done") {
        return serde_json::from_str::<RoundPayload>(data).ok();
    }

    let value: Value = serde_json::from_str(data).ok()?;
    let object = value.as_object()?;

    match object.get("type").and_then(Value::as_str) {
        Some("agent_end") => {
            return serde_json::from_value::<RoundPayload>(value.clone()).ok();
        }
        Some("done") => {
            // The payload nests under `data`; an envelope without one is
            // still a terminal, just an empty round.
            return match object.get("data") {
                Some(inner) => serde_json::from_value::<RoundPayload>(inner.clone()).ok(),
                None => Some(RoundPayload::default()),
            };
        }
        Some(_) => return None, // typed chunk frame, not a terminal
        None => {}
    }

    let payload = serde_json::from_value::<RoundPayload>(value).ok()?;
    if payload.messages.is_empty() {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan_all(body: &str) -> Vec<SseFrame> {
        let mut scanner = FrameScanner::new();
        let mut frames = scanner.push_chunk(body.as_bytes()).unwrap();
        frames.extend(scanner.finish());
        frames
    }

    #[test]
    fn frames_split_on_blank_lines() {
        let frames = scan_all("event: chunk\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("chunk"));
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(frames[1].event.is_none());
    }

    #[test]
    fn multiline_data_is_joined() {
        let frames = scan_all("data: line1\ndata: line2\n\n");
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn split_chunks_reassemble() {
        let mut scanner = FrameScanner::new();
        assert!(scanner.push_chunk(b"data: {\"par").unwrap().is_empty());
        let frames = scanner.push_chunk(b"tial\":true}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"partial\":true}");
    }

    #[test]
    fn oversized_line_fails() {
        let mut scanner = FrameScanner::new();
        let big = vec![b'x'; MAX_LINE_BYTES + 16];
        assert!(matches!(
            scanner.push_chunk(&big),
            Err(AgentError::LineTooLong { .. })
        ));
    }

    #[test]
    fn named_terminal_is_recognized() {
        let frame = SseFrame {
            event: Some("done".into()),
            data: json!({"messages": [{"role": "assistant", "content": "ok"}]}).to_string(),
        };
        let payload = terminal_round(&frame).unwrap();
        assert_eq!(payload.messages.len(), 1);
    }

    #[test]
    fn envelope_terminals_are_recognized() {
        let agent_end = SseFrame {
            event: None,
            data: json!({
                "type": "agent_end",
                "messages": [{"role": "assistant", "content": "ok2"}],
                "skills": ["s"]
            })
            .to_string(),
        };
        let payload = terminal_round(&agent_end).unwrap();
        assert_eq!(payload.skills, vec!["s".to_string()]);

        let done = SseFrame {
            event: None,
            data: json!({
                "type": "done",
                "data": {"messages": [{"role": "assistant", "content": "nested"}]}
            })
            .to_string(),
        };
        let payload = terminal_round(&done).unwrap();
        assert_eq!(payload.messages.len(), 1);
    }

    #[test]
    fn bare_terminal_requires_non_empty_messages() {
        let bare = SseFrame {
            event: None,
            data: json!({"messages": [{"role": "assistant", "content": "ok3"}]}).to_string(),
        };
        assert!(terminal_round(&bare).is_some());

        let empty = SseFrame {
            event: None,
            data: json!({"messages": []}).to_string(),
        };
        assert!(terminal_round(&empty).is_none());
    }

    #[test]
    fn typed_chunk_frames_are_not_terminals() {
        let chunk = SseFrame {
            event: None,
            data: json!({"type": "message_delta", "messages": [{"role": "assistant"}]})
                .to_string(),
        };
        assert!(terminal_round(&chunk).is_none());

        let sentinel = SseFrame {
            event: None,
            data: "[DONE]".into(),
        };
        assert!(is_done_sentinel(&sentinel));
        assert!(terminal_round(&sentinel).is_none());
    }
}
