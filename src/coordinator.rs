//! Owns the turn loop — sender resolution, marker-driven routing, queue
//! draining, and pause/resume/cancel/stop lifecycle.
//!
//! Mutable state (`history`, `queue`, `waiting_for_member_id`,
//! `current_routing_item`, `status`, the re-entrancy flag) is touched only
//! from within `process_queue` or its callees, which run as one logical task
//! at a time — no internal `Mutex`. A caller sharing a `Coordinator` across
//! tasks wraps it in `Arc<tokio::sync::Mutex<_>>` itself. The observer
//! surface is a single `Arc<dyn CoordinatorObserver>` with no-op defaults.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::agent_manager::{AgentManager, SendOptions};
use crate::collaborators::{NullSessionStorage, Snapshot, SnapshotStatus, SharedSessionStorage};
use crate::config::ChatterConfig;
use crate::context::{AgentOverrides, ContextManager};
use crate::error::{ChatterError, ChatterResult};
use crate::event::{CoordinatorObserver, FinishReason, NullObserver};
use crate::marker::{self, ParsedMarkers};
use crate::model::{ConversationMessage, Intent, Member, MemberId, MessageRouting, RoutingItem, SpeakerSnapshot, Team};
use crate::routing_queue::{EnqueueRequest, RoutingQueue};

/// Lifecycle state of a conversation, mirrored into [`Snapshot`] as
/// [`SnapshotStatus`] at every persistence trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Default)]
pub struct SetTeamOptions {
    pub resume_session_id: Option<String>,
}

pub struct Coordinator {
    team: Option<Arc<Team>>,
    history: Vec<ConversationMessage>,
    queue: RoutingQueue,
    context: ContextManager,
    agents: Arc<AgentManager>,
    observer: Arc<dyn CoordinatorObserver>,
    storage: SharedSessionStorage,
    waiting_for_member_id: Option<MemberId>,
    current_routing_item: Option<RoutingItem>,
    status: ConversationStatus,
    reentrant: bool,
    config: ChatterConfig,
}

impl Coordinator {
    pub fn new(agents: Arc<AgentManager>, config: ChatterConfig) -> Self {
        Coordinator {
            team: None,
            history: Vec::new(),
            queue: RoutingQueue::new(config.max_queue_size, config.max_branch_size, config.max_local_seq),
            context: ContextManager::new(config.context_window_size, config.team_task_soft_cap),
            agents,
            observer: Arc::new(NullObserver),
            storage: Arc::new(NullSessionStorage),
            waiting_for_member_id: None,
            current_routing_item: None,
            status: ConversationStatus::Paused,
            reentrant: false,
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CoordinatorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_storage(mut self, storage: SharedSessionStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn set_observer(&mut self, observer: Arc<dyn CoordinatorObserver>) {
        self.observer = observer;
    }

    pub fn set_storage(&mut self, storage: SharedSessionStorage) {
        self.storage = storage;
    }

    /// Reset all mutable state for `team`, optionally resuming a persisted
    /// session via the storage collaborator.
    pub async fn set_team(&mut self, team: Arc<Team>, options: SetTeamOptions) -> ChatterResult<()> {
        self.team = Some(team.clone());
        self.history.clear();
        self.queue = RoutingQueue::new(self.config.max_queue_size, self.config.max_branch_size, self.config.max_local_seq);
        self.context.clear();
        self.waiting_for_member_id = None;
        self.current_routing_item = None;
        self.status = ConversationStatus::Active;
        self.reentrant = false;

        if let Some(session_id) = options.resume_session_id {
            if let Some(snapshot) = self.storage.load_session(&team.id, &session_id).await? {
                self.apply_snapshot(snapshot);
            }
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.context.import_snapshot(&snapshot);
        self.waiting_for_member_id = snapshot
            .waiting_for_member_id
            .as_deref()
            .map(|id| MemberId::from(id));
        self.status = match snapshot.status {
            SnapshotStatus::Active => ConversationStatus::Active,
            SnapshotStatus::Paused => ConversationStatus::Paused,
            SnapshotStatus::Completed => ConversationStatus::Completed,
        };
        if let Some(last) = snapshot.messages.last() {
            self.queue.mark_completed(last.id.clone());
        }
        self.history = snapshot.messages;
    }

    /// Create a history message from a human/system caller and trigger
    /// routing. Rejects (without mutating any state) on an unresolvable
    /// sender, a non-human first message, or a malformed `[TEAM_TASK]`
    /// mention.
    pub async fn send_message(&mut self, content: &str, explicit_sender_id: Option<&str>) -> ChatterResult<()> {
        if matches!(self.status, ConversationStatus::Completed) {
            return Err(ChatterError::ConversationStopped);
        }
        let team = self.team.clone().ok_or(ChatterError::NoActiveTeam)?;

        if marker::mentions_unbracketed_team_task(content) {
            return Err(ChatterError::InvalidTeamTask);
        }

        let parsed = marker::parse(content);
        let sender = self.resolve_sender(&team, explicit_sender_id, parsed.from.as_deref())?;

        if self.history.is_empty() && sender.is_ai() {
            return Err(ChatterError::NonHumanFrom(sender.id.to_string()));
        }

        let speaker = SpeakerSnapshot::from(sender);
        self.status = ConversationStatus::Active;
        self.store_and_route(speaker, parsed, None).await
    }

    fn resolve_sender<'a>(
        &self,
        team: &'a Team,
        explicit_sender_id: Option<&str>,
        from_marker: Option<&str>,
    ) -> ChatterResult<&'a Member> {
        if let Some(id) = explicit_sender_id {
            if let Some(member) = team.find_by_id(id) {
                return Ok(member);
            }
        }

        if let Some(name) = from_marker {
            return match team.resolve(name) {
                Some(member) if member.is_human() => Ok(member),
                Some(member) => Err(ChatterError::NonHumanFrom(member.id.to_string())),
                None => {
                    let available = team.humans().map(|m| m.name.to_string()).collect();
                    Err(ChatterError::UnknownAddressee(available))
                }
            };
        }

        if let Some(waiting_id) = &self.waiting_for_member_id {
            if let Some(member) = team.find_by_id(waiting_id) {
                if member.is_human() {
                    return Ok(member);
                }
            }
        }

        let humans: Vec<&Member> = team.humans().collect();
        if humans.len() == 1 {
            return Ok(humans[0]);
        }

        let available = humans.iter().map(|m| m.name.to_string()).collect();
        Err(ChatterError::UnknownAddressee(available))
    }

    /// Store a new message (from a human sender or an ingested agent
    /// response) and run the routing algorithm against it.
    async fn store_and_route(
        &mut self,
        speaker: SpeakerSnapshot,
        parsed: ParsedMarkers,
        parent: Option<(Arc<str>, Intent)>,
    ) -> ChatterResult<()> {
        let team = self.team.clone().ok_or(ChatterError::NoActiveTeam)?;
        let sender_is_human = speaker.kind == crate::model::MemberKind::Human;
        let sender_id = speaker.member_id.clone();

        if let Some(team_task) = &parsed.team_task {
            self.context.set_team_task(team_task);
        }

        let routing = MessageRouting {
            raw_next_markers: parsed.addressees.clone(),
            resolved: Vec::new(),
            parent_message_id: parent.as_ref().map(|(p, _)| p.clone()),
            intent: parent.as_ref().map(|(_, i)| *i),
        };
        let message = ConversationMessage::new(speaker, parsed.clean_content, routing);
        let message_id = message.id.clone();

        self.history.push(message.clone());
        self.context.add_message(message);
        self.queue.mark_completed(message_id.clone());

        if parsed.addressees.is_empty() {
            if !self.queue.is_empty() {
                self.process_queue().await;
            } else {
                self.pause_on_first_human(&team).await;
            }
            return Ok(());
        }

        let mut resolved: Vec<(MemberId, Intent)> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();
        for addressee in &parsed.addressees {
            match team.resolve(&addressee.name) {
                Some(member) => resolved.push((member.id.clone(), addressee.intent)),
                None => unresolved.push(addressee.name.clone()),
            }
        }

        if resolved.is_empty() {
            self.observer.on_unresolved_addressees(&unresolved, &message_id).await;
            self.waiting_for_member_id = if sender_is_human {
                Some(sender_id)
            } else {
                team.first_human().map(|h| h.id.clone())
            };
            self.status = ConversationStatus::Paused;
            self.persist_snapshot().await;
            return Ok(());
        }

        if !unresolved.is_empty() {
            let available: Vec<String> = team.members.iter().map(|m| m.name.to_string()).collect();
            self.observer.on_partial_resolve_failure(&unresolved, &available).await;
        }

        let mut seen = HashSet::new();
        let mut deduped = Vec::new();
        for (id, intent) in resolved {
            if seen.insert(id.clone()) {
                deduped.push((id, intent));
            }
        }

        if let Some(stored) = self.history.iter_mut().find(|m| m.id == message_id) {
            stored.routing.resolved = deduped.iter().map(|(id, _)| id.clone()).collect();
        }

        let requests: Vec<EnqueueRequest> = deduped
            .into_iter()
            .map(|(target_member_id, intent)| EnqueueRequest { target_member_id, intent })
            .collect();

        let outcome = self.queue.enqueue(&requests, message_id);
        for protection in &outcome.protection_events {
            self.observer
                .on_queue_protection(protection.reason, &protection.target_member_id)
                .await;
        }

        self.observer.on_queue_updated().await;
        self.process_queue().await;
        Ok(())
    }

    async fn pause_on_first_human(&mut self, team: &Team) {
        self.waiting_for_member_id = team.first_human().map(|h| h.id.clone());
        self.status = ConversationStatus::Paused;
        self.persist_snapshot().await;
    }

    /// Drain the routing queue. Re-entrant calls (from a nested
    /// `store_and_route` triggered by an ingested agent response) are a
    /// no-op; the already-running loop observes the freshly enqueued items
    /// on its next iteration.
    async fn process_queue(&mut self) {
        if self.reentrant {
            return;
        }
        self.reentrant = true;

        loop {
            if self.queue.is_empty() {
                break;
            }
            let team = match self.team.clone() {
                Some(t) => t,
                None => break,
            };
            let item = match self.queue.select_next() {
                Some(i) => i,
                None => break,
            };

            let member = match team.find_by_id(&item.target_member_id) {
                Some(m) => m.clone(),
                None => {
                    log::warn!("routing target {} is no longer in the team, skipping", item.target_member_id);
                    continue;
                }
            };

            self.current_routing_item = Some(item.clone());
            self.observer.on_queue_updated().await;

            if member.is_ai() {
                match self.dispatch_to_agent(&member, &item).await {
                    Ok(outcome) => {
                        self.agents.stop(&member.id).await;
                        self.current_routing_item = None;
                        self.observer.on_agent_completed(&member.id, outcome.finish_reason).await;

                        if matches!(outcome.finish_reason, FinishReason::Cancelled) {
                            break;
                        }

                        if !outcome.accumulated_text.is_empty() {
                            if let Err(e) =
                                self.ingest_agent_response(&member, &outcome.accumulated_text, &item).await
                            {
                                log::warn!("failed to ingest response from {}: {}", member.id, e);
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("agent dispatch failed for {}: {}", member.id, e);
                        self.current_routing_item = None;
                        self.waiting_for_member_id = team.first_human().map(|h| h.id.clone());
                        self.status = ConversationStatus::Paused;
                        self.persist_snapshot().await;
                        break;
                    }
                }
            } else {
                self.waiting_for_member_id = Some(member.id.clone());
                self.status = ConversationStatus::Paused;
                self.current_routing_item = None;
                self.observer.on_queue_updated().await;
                self.persist_snapshot().await;
                break;
            }
        }

        self.reentrant = false;
    }

    async fn dispatch_to_agent(&self, member: &Member, item: &RoutingItem) -> ChatterResult<crate::agent_manager::SendOutcome> {
        let team = self.team.clone().ok_or(ChatterError::NoActiveTeam)?;
        self.agents.ensure_started(member, member.id.as_ref()).await?;

        let agent_type = member
            .agent_type
            .as_deref()
            .ok_or_else(|| ChatterError::UnknownAgentFamily("<human member dispatched as agent>".into()))?;

        let overrides = AgentOverrides {
            system_instruction: member.system_instruction.as_ref().map(|s| s.to_string()),
            instruction_file_text: member.instruction_file_text.as_ref().map(|s| s.to_string()),
        };
        let ctx = self.context.get_context_for_route(member.id.clone(), agent_type, item, overrides);
        let assembled = ContextManager::assemble_prompt(agent_type, &ctx);

        let send_options = SendOptions { system_flag: assembled.system_flag, timeout: None };
        self.agents.send(member, team, &assembled.prompt, send_options).await
    }

    async fn ingest_agent_response(&mut self, member: &Member, text: &str, item: &RoutingItem) -> ChatterResult<()> {
        let parsed = marker::parse(text);
        let speaker = SpeakerSnapshot::from(member);
        self.store_and_route(speaker, parsed, Some((item.parent_message_id.clone(), item.intent)))
            .await
    }

    /// Cancel the currently executing agent, rewind to the first human,
    /// pause, and persist. The actual SIGTERM/resolve race is driven by
    /// `AgentManager::cancel`; this only updates coordinator-owned state.
    pub async fn handle_user_cancellation(&mut self) -> ChatterResult<()> {
        let team = self.team.clone().ok_or(ChatterError::NoActiveTeam)?;
        if let Some(item) = &self.current_routing_item {
            self.agents.cancel(&item.target_member_id).await;
        }
        self.waiting_for_member_id = team.first_human().map(|h| h.id.clone());
        self.status = ConversationStatus::Paused;
        self.current_routing_item = None;
        self.persist_snapshot().await;
        Ok(())
    }

    /// Persist, terminate every agent, and mark the conversation completed.
    /// Further `send_message` calls are rejected.
    pub async fn stop(&mut self) -> ChatterResult<()> {
        self.persist_snapshot().await;
        if let Some(team) = self.team.clone() {
            for member in team.members.iter().filter(|m| m.is_ai()) {
                self.agents.stop(&member.id).await;
            }
        }
        self.status = ConversationStatus::Completed;
        Ok(())
    }

    pub async fn pause(&mut self) {
        if !matches!(self.status, ConversationStatus::Completed) {
            self.status = ConversationStatus::Paused;
            self.persist_snapshot().await;
        }
    }

    pub fn resume(&mut self) {
        if !matches!(self.status, ConversationStatus::Completed) {
            self.status = ConversationStatus::Active;
        }
    }

    pub fn get_status(&self) -> ConversationStatus {
        self.status
    }

    pub fn get_session(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn get_waiting_for_member_id(&self) -> Option<&MemberId> {
        self.waiting_for_member_id.as_ref()
    }

    pub fn set_waiting_for_member_id(&mut self, member_id: Option<MemberId>) {
        self.waiting_for_member_id = member_id;
    }

    async fn persist_snapshot(&self) {
        let team = match self.team.clone() {
            Some(t) => t,
            None => return,
        };
        let snapshot = Snapshot {
            team_id: team.id.to_string(),
            messages: self.history.clone(),
            team_task: self.context.team_task().to_string(),
            waiting_for_member_id: self.waiting_for_member_id.as_ref().map(|id| id.to_string()),
            status: match self.status {
                ConversationStatus::Active => SnapshotStatus::Active,
                ConversationStatus::Paused => SnapshotStatus::Paused,
                ConversationStatus::Completed => SnapshotStatus::Completed,
            },
            saved_at: Utc::now(),
        };
        let storage = self.storage.clone();
        let team_id = team.id.to_string();
        tokio::spawn(async move {
            if let Err(e) = storage.save_session(&team_id, snapshot).await {
                log::warn!("failed to persist session snapshot for team {}: {}", team_id, e);
            }
        });
    }
}
