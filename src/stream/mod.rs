//! Per-agent-family stream parsers: normalize line-delimited vendor JSON
//! into the unified `AgentEventKind` sequence.
//!
//! Each parser accumulates bytes into a line buffer, recognizes `\n`
//! boundaries, and decodes complete lines incrementally rather than waiting
//! for a full `Vec<u8>` payload, so a turn's events surface as soon as each
//! line arrives.

pub mod claude;
pub mod codex;
pub mod gemini;

use crate::event::AgentEventKind;

/// Implemented once per agent family (Claude, Codex, Gemini, ...).
///
/// Callers feed arbitrary byte chunks via `parse_chunk`; only complete lines
/// are parsed, with any trailing partial line retained until the next call
/// or until `flush` is invoked at stream end.
pub trait StreamParser: Send {
    /// Feed a chunk of stdout bytes, returning any events produced by whole
    /// lines contained in it (plus previously buffered partial content).
    fn parse_chunk(&mut self, chunk: &[u8]) -> Vec<AgentEventKind>;

    /// Parse whatever partial line remains buffered, as if terminated. Call
    /// once at end of stream.
    fn flush(&mut self) -> Vec<AgentEventKind>;

    /// Discard all buffered state, for reuse across turns.
    fn reset(&mut self);
}

/// Shared line-buffering helper: split `chunk` into whole lines plus an
/// updated trailing partial buffer.
fn buffer_lines(buffer: &mut String, chunk: &[u8]) -> Vec<String> {
    buffer.push_str(&String::from_utf8_lossy(chunk));
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }
    lines
}

fn flush_buffer(buffer: &mut String) -> Option<String> {
    let trimmed = buffer.trim().to_string();
    buffer.clear();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn parse_error_events(raw_line: &str) -> Vec<AgentEventKind> {
    vec![
        AgentEventKind::Error {
            error: format!("failed to parse stream line as JSON: {}", raw_line),
            code: "JSONL_PARSE_ERROR",
        },
        AgentEventKind::Text {
            text: raw_line.to_string(),
            category: crate::event::TextCategory::Message,
        },
    ]
}
