//! Subscribes to the event bus once, keeps two bounded ring buffers (raw
//! events, per-turn summaries), and optionally appends every event as
//! JSON-per-line to a session-scoped log file.
//!
//! Ring buffers are `VecDeque` with manual cap-then-pop-front eviction. Log
//! persistence opens the file with `tokio::fs::OpenOptions` in append mode
//! and writes one `serde_json::to_string(&event)? + "\n"` per call.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::event::{AgentEvent, AgentEventKind, FinishReason};
use crate::event_bus::EventBus;
use crate::model::MemberId;

const RAW_CAPACITY: usize = 1000;
const SUMMARY_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct ToolSummary {
    pub tool_name: String,
    pub tool_id: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// One completed turn, emitted when `turn.completed` closes out the
/// per-agent buffer opened at `session.started`.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub agent_id: MemberId,
    pub agent_name: String,
    pub finish_reason: FinishReason,
    pub text: String,
    pub tools: Vec<ToolSummary>,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

struct PendingTurn {
    text: String,
    tools: Vec<ToolSummary>,
    errors: Vec<String>,
}

impl PendingTurn {
    fn new() -> Self {
        PendingTurn { text: String::new(), tools: Vec::new(), errors: Vec::new() }
    }

    fn into_summary(
        self,
        agent_id: MemberId,
        agent_name: String,
        finish_reason: FinishReason,
        timestamp: DateTime<Utc>,
    ) -> TurnSummary {
        TurnSummary {
            agent_id,
            agent_name,
            finish_reason,
            text: self.text,
            tools: self.tools,
            errors: self.errors,
            timestamp,
        }
    }
}

#[derive(Serialize)]
struct LoggedEvent<'a> {
    event_id: &'a str,
    agent_id: &'a str,
    agent_type: &'a str,
    team_id: &'a str,
    timestamp: DateTime<Utc>,
    kind: &'a AgentEventKind,
}

pub struct Collector {
    raw: Mutex<VecDeque<Arc<AgentEvent>>>,
    summaries: Mutex<VecDeque<TurnSummary>>,
    pending: Mutex<HashMap<MemberId, PendingTurn>>,
    log_path: Option<PathBuf>,
}

impl Collector {
    pub fn new(log_path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Collector {
            raw: Mutex::new(VecDeque::with_capacity(RAW_CAPACITY)),
            summaries: Mutex::new(VecDeque::with_capacity(SUMMARY_CAPACITY)),
            pending: Mutex::new(HashMap::new()),
            log_path,
        })
    }

    /// Subscribe to `bus` and drive the collector from a background task.
    /// Call once per collector instance.
    pub fn spawn(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let collector = self.clone();
        let mut receiver = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => collector.handle(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("collector dropped {} events due to subscriber lag", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle(&self, event: Arc<AgentEvent>) {
        {
            let mut raw = self.raw.lock().await;
            raw.push_back(event.clone());
            while raw.len() > RAW_CAPACITY {
                raw.pop_front();
            }
        }

        let finished = {
            let mut pending = self.pending.lock().await;
            match &event.kind {
                AgentEventKind::SessionStarted => {
                    pending.insert(event.agent_id.clone(), PendingTurn::new());
                    None
                }
                AgentEventKind::Text { text, .. } => {
                    pending
                        .entry(event.agent_id.clone())
                        .or_insert_with(PendingTurn::new)
                        .text
                        .push_str(text);
                    None
                }
                AgentEventKind::ToolStarted { tool_name, tool_id, .. } => {
                    pending
                        .entry(event.agent_id.clone())
                        .or_insert_with(PendingTurn::new)
                        .tools
                        .push(ToolSummary {
                            tool_name: tool_name.clone(),
                            tool_id: tool_id.clone(),
                            output: None,
                            error: None,
                        });
                    None
                }
                AgentEventKind::ToolCompleted { tool_id, output, error } => {
                    if let Some(turn) = pending.get_mut(&event.agent_id) {
                        if let Some(tool) = turn.tools.iter_mut().find(|t| &t.tool_id == tool_id) {
                            tool.output = Some(output.clone());
                            tool.error = error.clone();
                        }
                    }
                    None
                }
                AgentEventKind::Error { error, .. } => {
                    pending
                        .entry(event.agent_id.clone())
                        .or_insert_with(PendingTurn::new)
                        .errors
                        .push(error.clone());
                    None
                }
                AgentEventKind::TurnCompleted { finish_reason } => {
                    let agent_name = event
                        .team
                        .find_by_id(&event.agent_id)
                        .map(|m| m.display_name.to_string())
                        .unwrap_or_else(|| event.agent_id.to_string());
                    pending
                        .remove(&event.agent_id)
                        .map(|turn| turn.into_summary(event.agent_id.clone(), agent_name, *finish_reason, event.timestamp))
                }
                AgentEventKind::TodoList { .. } => None,
            }
        };

        if let Some(summary) = finished {
            let mut summaries = self.summaries.lock().await;
            summaries.push_back(summary);
            while summaries.len() > SUMMARY_CAPACITY {
                summaries.pop_front();
            }
        }

        if let Some(path) = self.log_path.clone() {
            if let Err(e) = append_log_line(&path, &event).await {
                log::warn!("failed to append event log line to {:?}: {}", path, e);
            }
        }
    }

    pub async fn raw_events(&self) -> Vec<Arc<AgentEvent>> {
        self.raw.lock().await.iter().cloned().collect()
    }

    pub async fn turn_summaries(&self) -> Vec<TurnSummary> {
        self.summaries.lock().await.iter().cloned().collect()
    }
}

async fn append_log_line(path: &Path, event: &AgentEvent) -> std::io::Result<()> {
    let logged = LoggedEvent {
        event_id: &event.event_id,
        agent_id: &event.agent_id,
        agent_type: &event.agent_type,
        team_id: &event.team.id,
        timestamp: event.timestamp,
        kind: &event.kind,
    };
    let line = serde_json::to_string(&logged)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

/// Conventional session-scoped log path, `<projectRoot>/.agent-chatter/logs/<sessionId>.jsonl`.
pub fn default_log_path(project_root: &Path, session_id: &str) -> PathBuf {
    project_root.join(".agent-chatter").join("logs").join(format!("{}.jsonl", session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TextCategory;
    use crate::model::Team;

    fn team() -> Arc<Team> {
        Arc::new(Team { id: Arc::from("t"), name: Arc::from("T"), members: Vec::new() })
    }

    #[tokio::test]
    async fn turn_completed_emits_summary_and_clears_pending_buffer() {
        let bus = EventBus::new(32);
        let collector = Collector::new(None);
        collector.spawn(&bus);

        let agent_id: MemberId = Arc::from("bob");
        bus.publish(AgentEvent::new(agent_id.clone(), Arc::from("claude-code"), team(), AgentEventKind::SessionStarted));
        bus.publish(AgentEvent::new(
            agent_id.clone(),
            Arc::from("claude-code"),
            team(),
            AgentEventKind::Text { text: "hi".to_string(), category: TextCategory::Result },
        ));
        bus.publish(AgentEvent::new(
            agent_id.clone(),
            Arc::from("claude-code"),
            team(),
            AgentEventKind::TurnCompleted { finish_reason: FinishReason::Done },
        ));

        // Give the background task a chance to drain the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let summaries = collector.turn_summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].text, "hi");
        assert_eq!(summaries[0].finish_reason, FinishReason::Done);

        let raw = collector.raw_events().await;
        assert_eq!(raw.len(), 3);
    }

    #[tokio::test]
    async fn raw_buffer_evicts_oldest_past_capacity() {
        let bus = EventBus::new(RAW_CAPACITY * 2);
        let collector = Collector::new(None);
        collector.spawn(&bus);

        for _ in 0..(RAW_CAPACITY + 10) {
            bus.publish(AgentEvent::new(
                Arc::from("bob"),
                Arc::from("claude-code"),
                team(),
                AgentEventKind::SessionStarted,
            ));
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(collector.raw_events().await.len(), RAW_CAPACITY);
    }
}
