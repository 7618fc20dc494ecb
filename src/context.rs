//! Bounded sliding-window context and per-family prompt assembly.
//!
//! A remove-oldest-while-over-budget loop, here keyed on a fixed message
//! count rather than a token budget, kept in a `VecDeque` for cheap
//! push/pop at both ends.

use std::collections::VecDeque;

use crate::collaborators::Snapshot;
use crate::model::{ConversationMessage, MemberId, RoutingItem, TeamTask};

/// Overrides layered onto a member's stored instructions for one prompt
/// assembly call — the coordinator passes `member.system_instruction` and
/// `member.instruction_file_text` through unchanged in the common case, but
/// a caller may want to override them (e.g. a test fixture).
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub system_instruction: Option<String>,
    pub instruction_file_text: Option<String>,
}

/// Everything [`ContextManager::assemble_prompt`] needs to render one turn.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub member_id: MemberId,
    pub agent_type: String,
    pub system_instruction: Option<String>,
    pub instruction_file_text: Option<String>,
    pub recent_messages: Vec<ConversationMessage>,
    pub current_message: Option<ConversationMessage>,
    pub team_task: String,
    /// Set only by `get_context_for_route`: the message whose `[NEXT]`
    /// enqueued this route, so the assembled prompt can explain "you were
    /// addressed because X said Y".
    pub parent_message: Option<ConversationMessage>,
}

/// The rendered prompt and, for families that don't embed the system text
/// in-line, the flag the agent manager should pass separately.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub system_flag: Option<String>,
}

pub struct ContextManager {
    window: VecDeque<ConversationMessage>,
    window_size: usize,
    team_task: TeamTask,
    team_task_soft_cap: usize,
}

impl ContextManager {
    pub fn new(window_size: usize, team_task_soft_cap: usize) -> Self {
        ContextManager {
            window: VecDeque::with_capacity(window_size),
            window_size,
            team_task: TeamTask::default(),
            team_task_soft_cap,
        }
    }

    pub fn add_message(&mut self, message: ConversationMessage) {
        self.window.push_back(message);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
    }

    pub fn set_team_task(&mut self, text: &str) {
        self.team_task.set(text, self.team_task_soft_cap);
    }

    pub fn team_task(&self) -> &str {
        self.team_task.get()
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.team_task = TeamTask::default();
    }

    pub fn recent_messages(&self) -> Vec<ConversationMessage> {
        self.window.iter().cloned().collect()
    }

    pub fn import_snapshot(&mut self, snapshot: &Snapshot) {
        self.window.clear();
        for message in snapshot.messages.iter().rev().take(self.window_size).rev() {
            self.window.push_back(message.clone());
        }
        self.team_task.set(&snapshot.team_task, self.team_task_soft_cap);
    }

    pub fn export_recent(&self) -> Vec<ConversationMessage> {
        self.recent_messages()
    }

    pub fn get_context_for_agent(
        &self,
        member_id: MemberId,
        agent_type: &str,
        overrides: AgentOverrides,
    ) -> PromptContext {
        PromptContext {
            member_id,
            agent_type: agent_type.to_string(),
            system_instruction: overrides.system_instruction,
            instruction_file_text: overrides.instruction_file_text,
            recent_messages: self.recent_messages(),
            current_message: self.window.back().cloned(),
            team_task: self.team_task.get().to_string(),
            parent_message: None,
        }
    }

    /// Identical to `get_context_for_agent`, but also surfaces the message
    /// whose `[NEXT]` enqueued `routing_item`, found by id within the
    /// current window.
    pub fn get_context_for_route(
        &self,
        member_id: MemberId,
        agent_type: &str,
        routing_item: &RoutingItem,
        overrides: AgentOverrides,
    ) -> PromptContext {
        let mut ctx = self.get_context_for_agent(member_id, agent_type, overrides);
        ctx.parent_message = self
            .window
            .iter()
            .find(|m| m.id == routing_item.parent_message_id)
            .cloned();
        ctx
    }

    pub fn assemble_prompt(agent_type: &str, ctx: &PromptContext) -> AssembledPrompt {
        let embed_system = agent_type != "claude-code";
        let mut prompt = String::new();

        if embed_system {
            if let Some(system) = &ctx.system_instruction {
                prompt.push_str("[SYSTEM]\n");
                prompt.push_str(system);
                prompt.push_str("\n\n");
            }
        }

        if let Some(instructions) = &ctx.instruction_file_text {
            prompt.push_str("[INSTRUCTION_FILE]\n");
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }

        prompt.push_str("[CONTEXT]\n");
        if !ctx.team_task.is_empty() {
            prompt.push_str(&format!("Team task: {}\n", ctx.team_task));
        }
        if let Some(parent) = &ctx.parent_message {
            prompt.push_str(&format!(
                "You were addressed because {} said: {}\n",
                parent.speaker.display_name, parent.content
            ));
        }
        for message in &ctx.recent_messages {
            prompt.push_str(&format!("{}: {}\n", message.speaker.display_name, message.content));
        }
        prompt.push('\n');

        prompt.push_str("[MESSAGE]\n");
        if let Some(current) = &ctx.current_message {
            prompt.push_str(&current.content);
        }

        let system_flag = if embed_system {
            None
        } else {
            ctx.system_instruction.clone()
        };

        AssembledPrompt { prompt, system_flag }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberKind, MessageRouting, SpeakerSnapshot};
    use std::sync::Arc;

    fn message(display_name: &str, content: &str) -> ConversationMessage {
        ConversationMessage::new(
            SpeakerSnapshot {
                member_id: Arc::from("m"),
                display_name: Arc::from(display_name),
                kind: MemberKind::Human,
            },
            content.to_string(),
            MessageRouting::default(),
        )
    }

    #[test]
    fn window_evicts_oldest_past_capacity() {
        let mut ctx = ContextManager::new(2, 280);
        ctx.add_message(message("alice", "one"));
        ctx.add_message(message("alice", "two"));
        ctx.add_message(message("alice", "three"));
        let recent = ctx.recent_messages();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "two");
        assert_eq!(recent[1].content, "three");
    }

    #[test]
    fn claude_prompt_returns_system_flag_instead_of_embedding() {
        let mut ctx = ContextManager::new(5, 280);
        ctx.add_message(message("alice", "hello"));
        let prompt_ctx = ctx.get_context_for_agent(
            Arc::from("bob"),
            "claude-code",
            AgentOverrides { system_instruction: Some("be terse".to_string()), instruction_file_text: None },
        );
        let assembled = ContextManager::assemble_prompt("claude-code", &prompt_ctx);
        assert_eq!(assembled.system_flag.as_deref(), Some("be terse"));
        assert!(!assembled.prompt.contains("[SYSTEM]"));
    }

    #[test]
    fn codex_prompt_embeds_system_section() {
        let ctx = ContextManager::new(5, 280);
        let prompt_ctx = ctx.get_context_for_agent(
            Arc::from("bob"),
            "openai-codex",
            AgentOverrides { system_instruction: Some("be terse".to_string()), instruction_file_text: None },
        );
        let assembled = ContextManager::assemble_prompt("openai-codex", &prompt_ctx);
        assert!(assembled.system_flag.is_none());
        assert!(assembled.prompt.contains("[SYSTEM]\nbe terse"));
    }

    #[test]
    fn route_context_surfaces_parent_message() {
        let mut ctx = ContextManager::new(5, 280);
        ctx.add_message(message("alice", "please help bob"));
        let parent_id = ctx.recent_messages()[0].id.clone();
        let item = RoutingItem {
            id: Arc::from("r1"),
            target_member_id: Arc::from("bob"),
            parent_message_id: parent_id,
            trigger_message_id: Arc::from("r1"),
            intent: crate::model::Intent::P2Reply,
            enqueued_at: 0,
        };
        let prompt_ctx = ctx.get_context_for_route(Arc::from("bob"), "claude-code", &item, AgentOverrides::default());
        assert!(prompt_ctx.parent_message.is_some());
        let assembled = ContextManager::assemble_prompt("claude-code", &prompt_ctx);
        assert!(assembled.prompt.contains("please help bob"));
    }
}
