//! OpenAI Codex CLI's experimental JSON event stream.

use serde_json::Value;

use crate::event::{AgentEventKind, FinishReason, TextCategory, TodoItem, TodoStatus};

use super::{buffer_lines, flush_buffer, parse_error_events, StreamParser};

#[derive(Default)]
pub struct CodexStreamParser {
    buffer: String,
}

impl CodexStreamParser {
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
        let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        match msg_type {
            "thread.started" => vec![AgentEventKind::SessionStarted],
            "item.started" => self.handle_item_started(value),
            "item.updated" => self.handle_item_updated(value),
            "item.completed" => self.handle_item_completed(value),
            "turn.completed" => vec![AgentEventKind::TurnCompleted {
                finish_reason: FinishReason::Done,
            }],
            _ => Vec::new(),
        }
    }

    fn handle_item_started(&mut self, value: &Value) -> Vec<AgentEventKind> {
        let item = match value.get("item") {
            Some(i) => i,
            None => return Vec::new(),
        };
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
        if item_type == "todo_list" {
            return vec![self.build_todo_list(item)];
        }
        match tool_name_for_item_type(item_type) {
            Some(tool_name) => {
                let tool_id = item.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                vec![AgentEventKind::ToolStarted {
                    tool_name: tool_name.to_string(),
                    tool_id,
                    input: item.clone(),
                }]
            }
            None => Vec::new(),
        }
    }

    fn handle_item_updated(&mut self, value: &Value) -> Vec<AgentEventKind> {
        let item = match value.get("item") {
            Some(i) => i,
            None => return Vec::new(),
        };
        if item.get("type").and_then(Value::as_str) == Some("todo_list") {
            vec![self.build_todo_list(item)]
        } else {
            Vec::new()
        }
    }

    fn build_todo_list(&self, item: &Value) -> AgentEventKind {
        let todo_id = item.get("id").and_then(Value::as_str).unwrap_or("").to_string();
        let items = item
            .get("items")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let text = entry.get("text").and_then(Value::as_str)?.to_string();
                        let status = if entry.get("status").and_then(Value::as_str) == Some("completed") {
                            TodoStatus::Completed
                        } else {
                            TodoStatus::Pending
                        };
                        Some(TodoItem { text, status })
                    })
                    .collect()
            })
            .unwrap_or_default();
        AgentEventKind::TodoList { todo_id, items }
    }

    fn handle_item_completed(&mut self, value: &Value) -> Vec<AgentEventKind> {
        let item = match value.get("item") {
            Some(i) => i,
            None => return Vec::new(),
        };
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
        match item_type {
            "reasoning" => item
                .get("text")
                .and_then(Value::as_str)
                .map(|t| {
                    vec![AgentEventKind::Text {
                        text: t.to_string(),
                        category: TextCategory::Reasoning,
                    }]
                })
                .unwrap_or_default(),
            "agent_message" => item
                .get("text")
                .and_then(Value::as_str)
                .map(|t| {
                    vec![AgentEventKind::Text {
                        text: t.to_string(),
                        category: TextCategory::Message,
                    }]
                })
                .unwrap_or_default(),
            _ if tool_name_for_item_type(item_type).is_some() => {
                let tool_id = item.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                let output = item
                    .get("aggregated_output")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let error = item
                    .get("exit_code")
                    .and_then(Value::as_i64)
                    .filter(|code| *code != 0)
                    .map(|code| format!("Exit code: {}", code));
                vec![AgentEventKind::ToolCompleted {
                    tool_id,
                    output,
                    error,
                }]
            }
            _ => Vec::new(),
        }
    }
}

fn tool_name_for_item_type(item_type: &str) -> Option<&'static str> {
    match item_type {
        "command_execution" => Some("Bash"),
        "file_change" => Some("Write"),
        "file_read" => Some("Read"),
        "web_search" => Some("WebSearch"),
        _ => None,
    }
}

impl StreamParser for CodexStreamParser {
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
    }
}
