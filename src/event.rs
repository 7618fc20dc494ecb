//! The unified `AgentEvent` model and the observer trait that consumes it.
//!
//! A flat enum of normalized occurrences, each carrying the emitting agent's
//! identity, plus a `#[async_trait]` handler trait with no-op default
//! methods so observers only implement what they care about.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{MemberId, Team};

/// Status of a single todo item reported by an agent's planning tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub status: TodoStatus,
}

/// Why a turn stopped producing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Done,
    Error,
    Timeout,
    Cancelled,
}

/// The category of a `text` event, used by the agent manager to decide
/// which text gets folded into `accumulatedText`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextCategory {
    AssistantMessage,
    Reasoning,
    Message,
    Result,
}

/// One normalized occurrence from a running agent, vendor-specific JSON
/// already stripped away by the matching stream parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEventKind {
    SessionStarted,
    Text {
        text: String,
        category: TextCategory,
    },
    ToolStarted {
        tool_name: String,
        tool_id: String,
        input: serde_json::Value,
    },
    ToolCompleted {
        tool_id: String,
        output: String,
        error: Option<String>,
    },
    TodoList {
        todo_id: String,
        items: Vec<TodoItem>,
    },
    TurnCompleted {
        finish_reason: FinishReason,
    },
    Error {
        error: String,
        code: &'static str,
    },
}

/// A unified agent event, envelope plus kind. Every event carries enough
/// identity to be rendered or logged independently of the others.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub event_id: Arc<str>,
    pub agent_id: MemberId,
    pub agent_type: Arc<str>,
    pub team: Arc<Team>,
    pub timestamp: DateTime<Utc>,
    pub kind: AgentEventKind,
}

impl AgentEvent {
    pub fn new(agent_id: MemberId, agent_type: Arc<str>, team: Arc<Team>, kind: AgentEventKind) -> Self {
        AgentEvent {
            event_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            agent_id,
            agent_type,
            team,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Observer over coordinator-level occurrences that aren't agent events
/// proper: unresolved addressees, queue protection triggers, and per-turn
/// completion notices. A single trait with no-op defaults, registered once
/// via `Arc<dyn _>`.
#[async_trait]
pub trait CoordinatorObserver: Send + Sync {
    async fn on_unresolved_addressees(&self, _unresolved: &[String], _message_id: &str) {}
    async fn on_partial_resolve_failure(&self, _skipped: &[String], _available: &[String]) {}
    async fn on_queue_protection(&self, _reason: &str, _target_member_id: &str) {}
    async fn on_agent_completed(&self, _member_id: &str, _finish_reason: FinishReason) {}
    async fn on_queue_updated(&self) {}
}

/// A silent observer for tests and callers with no UI to update.
pub struct NullObserver;

#[async_trait]
impl CoordinatorObserver for NullObserver {}
