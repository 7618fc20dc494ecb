//! Google Gemini CLI's `--output-format stream-json` line protocol.
//!
//! Gemini's stream emits no explicit session-start envelope, unlike Claude's
//! `system/subtype=init` or Codex's `thread.started`; this parser synthesizes
//! one `SessionStarted` on the first successfully parsed line so every
//! family upholds the "one session.started per turn" invariant.

use std::collections::HashMap;

use serde_json::Value;

use crate::event::{AgentEventKind, FinishReason, TextCategory};

use super::{buffer_lines, flush_buffer, parse_error_events, StreamParser};

#[derive(Default)]
pub struct GeminiStreamParser {
    buffer: String,
    tool_names: HashMap<String, String>,
    session_started: bool,
}

impl GeminiStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(&mut self, line: &str) -> Vec<AgentEventKind> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return parse_error_events(line),
        };

        let mut events = Vec::new();
        if !self.session_started {
            self.session_started = true;
            events.push(AgentEventKind::SessionStarted);
        }
        events.extend(self.handle_value(&value));
        events
    }

    fn handle_value(&mut self, value: &Value) -> Vec<AgentEventKind> {
        match value.get("type").and_then(Value::as_str).unwrap_or("") {
            "content" => value
                .get("text")
                .and_then(Value::as_str)
                .map(|t| {
                    vec![AgentEventKind::Text {
                        text: t.to_string(),
                        category: TextCategory::Message,
                    }]
                })
                .unwrap_or_default(),
            "tool_call" => {
                let tool_name = value.get("tool").and_then(Value::as_str).unwrap_or("").to_string();
                let call_id = value.get("callId").and_then(Value::as_str).unwrap_or("").to_string();
                self.tool_names.insert(call_id.clone(), tool_name.clone());
                vec![AgentEventKind::ToolStarted {
                    tool_name,
                    tool_id: call_id,
                    input: value.get("args").cloned().unwrap_or(Value::Null),
                }]
            }
            "tool_result" => {
                let call_id = value.get("callId").and_then(Value::as_str).unwrap_or("").to_string();
                let output = match value.get("output") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                vec![AgentEventKind::ToolCompleted {
                    tool_id: call_id,
                    output,
                    error: None,
                }]
            }
            "turn_complete" => vec![AgentEventKind::TurnCompleted {
                finish_reason: FinishReason::Done,
            }],
            "error" => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                vec![
                    AgentEventKind::Error {
                        error: message,
                        code: "GEMINI_STREAM_ERROR",
                    },
                    AgentEventKind::TurnCompleted {
                        finish_reason: FinishReason::Error,
                    },
                ]
            }
            _ => Vec::new(),
        }
    }
}

impl StreamParser for GeminiStreamParser {
    fn parse_chunk(&mut self, chunk: &[u8]) -> Vec<AgentEventKind> {
        let lines = buffer_lines(&mut self.buffer, chunk);
        let mut events = Vec::new();
        for line in lines {
            events.extend(self.parse_line(&line));
        }
        events
    }

    fn flush(&mut self) -> Vec<AgentEventKind> {
        match flush_buffer(&mut self.buffer) {
            Some(line) => self.parse_line(&line),
            None => Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.tool_names.clear();
        self.session_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_synthesizes_session_started() {
        let mut parser = GeminiStreamParser::new();
        let events = parser.parse_chunk(b"{\"type\":\"content\",\"text\":\"hi\"}\n");
        assert!(matches!(events[0], AgentEventKind::SessionStarted));
        assert!(matches!(events[1], AgentEventKind::Text { .. }));
    }

    #[test]
    fn second_line_does_not_repeat_session_started() {
        let mut parser = GeminiStreamParser::new();
        parser.parse_chunk(b"{\"type\":\"content\",\"text\":\"hi\"}\n");
        let events = parser.parse_chunk(b"{\"type\":\"turn_complete\"}\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEventKind::TurnCompleted { .. }));
    }

    #[test]
    fn error_type_emits_error_then_turn_completed() {
        let mut parser = GeminiStreamParser::new();
        let events = parser.parse_chunk(b"{\"type\":\"error\",\"message\":\"boom\"}\n");
        assert!(matches!(events[1], AgentEventKind::Error { .. }));
        assert!(matches!(events[2], AgentEventKind::TurnCompleted { finish_reason: FinishReason::Error }));
    }
}
