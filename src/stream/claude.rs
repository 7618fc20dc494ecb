//! Claude Code's `--output-format stream-json` line protocol.

use std::collections::HashMap;

use serde_json::Value;

use crate::event::{AgentEventKind, FinishReason, TextCategory, TodoItem, TodoStatus};

use super::{buffer_lines, flush_buffer, parse_error_events, StreamParser};

#[derive(Default)]
pub struct ClaudeStreamParser {
    buffer: String,
    tool_names: HashMap<String, String>,
}

impl ClaudeStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(&mut self, line: &str) -> Vec<AgentEventKind> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return parse_error_events(line),
        };
        self.handle_value(&value)
    }

    fn handle_value(&mut self, value: &Value) -> Vec<AgentEventKind> {
        let mut events = Vec::new();
        let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");

        match msg_type {
            "system" => {
                if value.get("subtype").and_then(Value::as_str) == Some("init") {
                    events.push(AgentEventKind::SessionStarted);
                }
            }
            "assistant" => {
                if let Some(content) = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                {
                    for block in content {
                        events.extend(self.handle_assistant_block(block));
                    }
                }
            }
            "user" => {
                if let Some(content) = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                {
                    for block in content {
                        if block.get("type").and_then(Value::as_str) == Some("tool_result") {
                            events.push(self.handle_tool_result(block));
                        }
                    }
                }
            }
            "result" => {
                if let Some(result_text) = value.get("result").and_then(Value::as_str) {
                    events.push(AgentEventKind::Text {
                        text: result_text.to_string(),
                        category: TextCategory::Result,
                    });
                }
                let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                events.push(AgentEventKind::TurnCompleted {
                    finish_reason: if is_error {
                        FinishReason::Error
                    } else {
                        FinishReason::Done
                    },
                });
            }
            _ => {}
        }
        events
    }

    fn handle_assistant_block(&mut self, block: &Value) -> Vec<AgentEventKind> {
        let mut events = Vec::new();
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    events.push(AgentEventKind::Text {
                        text: text.to_string(),
                        category: TextCategory::AssistantMessage,
                    });
                }
            }
            Some("tool_use") => {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let id = block.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                if name == "TodoWrite" {
                    if let Some(todos) = block
                        .get("input")
                        .and_then(|i| i.get("todos"))
                        .and_then(Value::as_array)
                    {
                        let items = parse_todo_items(todos);
                        events.push(AgentEventKind::TodoList { todo_id: id, items });
                        return events;
                    }
                }
                self.tool_names.insert(id.clone(), name.clone());
                events.push(AgentEventKind::ToolStarted {
                    tool_name: name,
                    tool_id: id,
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
        events
    }

    fn handle_tool_result(&mut self, block: &Value) -> AgentEventKind {
        let tool_id = block
            .get("tool_use_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let output = match block.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let error = if block.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
            Some(output.clone())
        } else {
            None
        };
        AgentEventKind::ToolCompleted {
            tool_id,
            output,
            error,
        }
    }
}

fn parse_todo_items(raw: &[Value]) -> Vec<TodoItem> {
    raw.iter()
        .filter_map(|item| {
            let text = item.get("content").and_then(Value::as_str)?.to_string();
            let status = match item.get("status").and_then(Value::as_str)? {
                "pending" => TodoStatus::Pending,
                "in_progress" => TodoStatus::InProgress,
                "completed" => TodoStatus::Completed,
                "cancelled" => TodoStatus::Cancelled,
                _ => return None,
            };
            Some(TodoItem { text, status })
        })
        .collect()
}

impl StreamParser for ClaudeStreamParser {
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_line_emits_session_started() {
        let mut parser = ClaudeStreamParser::new();
        let events = parser.parse_chunk(b"{\"type\":\"system\",\"subtype\":\"init\"}\n");
        assert!(matches!(events[0], AgentEventKind::SessionStarted));
    }

    #[test]
    fn todo_write_suppresses_tool_started_and_emits_todo_list() {
        let mut parser = ClaudeStreamParser::new();
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"TodoWrite","input":{"todos":[{"content":"write tests","status":"pending"}]}}]}}"#;
        let events = parser.parse_chunk(format!("{}\n", line).as_bytes());
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEventKind::TodoList { items, .. } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].text, "write tests");
                assert_eq!(items[0].status, TodoStatus::Pending);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unmatched_tool_result_reports_unknown() {
        let mut parser = ClaudeStreamParser::new();
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"ghost","content":"ok"}]}}"#;
        let events = parser.parse_chunk(format!("{}\n", line).as_bytes());
        match &events[0] {
            AgentEventKind::ToolCompleted { tool_id, .. } => assert_eq!(tool_id, "ghost"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn result_line_emits_text_then_turn_completed() {
        let mut parser = ClaudeStreamParser::new();
        let line = r#"{"type":"result","result":"done thinking","is_error":false}"#;
        let events = parser.parse_chunk(format!("{}\n", line).as_bytes());
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], AgentEventKind::TurnCompleted { finish_reason: FinishReason::Done }));
    }

    #[test]
    fn malformed_json_line_does_not_abort_stream() {
        let mut parser = ClaudeStreamParser::new();
        let events = parser.parse_chunk(b"not json\n{\"type\":\"system\",\"subtype\":\"init\"}\n");
        assert!(matches!(events[0], AgentEventKind::Error { code: "JSONL_PARSE_ERROR", .. }));
        assert!(matches!(events[2], AgentEventKind::SessionStarted));
    }

    #[test]
    fn partial_line_is_buffered_across_chunks() {
        let mut parser = ClaudeStreamParser::new();
        let events_first = parser.parse_chunk(b"{\"type\":\"system\",");
        assert!(events_first.is_empty());
        let events_second = parser.parse_chunk(b"\"subtype\":\"init\"}\n");
        assert!(matches!(events_second[0], AgentEventKind::SessionStarted));
    }
}
