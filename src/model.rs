//! Core data model: members, teams, conversation messages, and routing items.
//!
//! `Arc<str>` is used for the small set of immutable text fields shared
//! across a session (names, roles, content) so that history can be cloned
//! cheaply by downstream consumers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque member identifier. Stable for the lifetime of a `Team`.
pub type MemberId = Arc<str>;

/// Whether a member is a human participant or an AI agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Human,
    Ai,
}

/// A participant in a conversation team.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: MemberId,
    /// Internal name, must match `[A-Za-z0-9_-]+` and be unique within a team.
    pub name: Arc<str>,
    pub display_name: Arc<str>,
    pub role: Arc<str>,
    pub kind: MemberKind,
    /// Stable tie-breaker; the human with the smallest `order` is "first human".
    pub order: u32,
    /// Family tag such as `claude-code`, `openai-codex`, `google-gemini`.
    /// `None` for human members.
    pub agent_type: Option<Arc<str>>,
    pub system_instruction: Option<Arc<str>>,
    pub instruction_file_text: Option<Arc<str>>,
    pub theme_color: Option<Arc<str>>,
    pub env_overrides: std::collections::HashMap<String, String>,
    pub extra_args: Vec<String>,
}

impl Member {
    pub fn is_human(&self) -> bool {
        self.kind == MemberKind::Human
    }

    pub fn is_ai(&self) -> bool {
        self.kind == MemberKind::Ai
    }

    /// Normalized identifier used for addressee matching: lowercase, with
    /// whitespace, `-`, and `_` removed.
    pub fn normalize(s: &str) -> String {
        s.chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .flat_map(|c| c.to_lowercase())
            .collect()
    }
}

/// An ordered set of members plus descriptive metadata. Treated as immutable
/// by the core for the lifetime of a conversation.
#[derive(Debug, Clone)]
pub struct Team {
    pub id: Arc<str>,
    pub name: Arc<str>,
    pub members: Vec<Member>,
}

impl Team {
    pub fn find_by_id(&self, id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id.as_ref() == id)
    }

    /// Resolve a raw addressee token against id, name, then display name, in
    /// that order, on normalized form.
    pub fn resolve(&self, token: &str) -> Option<&Member> {
        let needle = Member::normalize(token);
        self.members
            .iter()
            .find(|m| Member::normalize(&m.id) == needle)
            .or_else(|| self.members.iter().find(|m| Member::normalize(&m.name) == needle))
            .or_else(|| {
                self.members
                    .iter()
                    .find(|m| Member::normalize(&m.display_name) == needle)
            })
    }

    /// The human with the smallest `order`, used as the fallback recipient
    /// and as the rewind target on cancellation.
    pub fn first_human(&self) -> Option<&Member> {
        self.members
            .iter()
            .filter(|m| m.is_human())
            .min_by_key(|m| m.order)
    }

    pub fn humans(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_human())
    }
}

/// Priority intent attached to a routing item, highest to lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    P1Interrupt,
    P2Reply,
    P3Extend,
}

impl Intent {
    /// Parse a marker suffix like `"P1"`/`"p2"`/`"P3"`. Unrecognized input
    /// defaults to `P2Reply`, matching the marker grammar's stated default.
    pub fn from_marker(s: &str) -> Intent {
        match s.to_ascii_uppercase().as_str() {
            "P1" => Intent::P1Interrupt,
            "P3" => Intent::P3Extend,
            _ => Intent::P2Reply,
        }
    }

    pub fn as_marker(&self) -> &'static str {
        match self {
            Intent::P1Interrupt => "P1",
            Intent::P2Reply => "P2",
            Intent::P3Extend => "P3",
        }
    }

    /// Ordering key for the local/global sort: P2 before P3 (P1 is handled
    /// separately by global preemption and never reaches this comparison).
    fn sort_rank(&self) -> u8 {
        match self {
            Intent::P1Interrupt => 0,
            Intent::P2Reply => 1,
            Intent::P3Extend => 2,
        }
    }
}

impl PartialOrd for Intent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Intent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_rank().cmp(&other.sort_rank())
    }
}

/// A `[NEXT:name!Pn]` entry extracted by the marker parser, before it is
/// resolved against a `Team`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAddressee {
    pub name: String,
    pub intent: Intent,
}

/// A single message in the conversation timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Arc<str>,
    pub timestamp: DateTime<Utc>,
    pub speaker: SpeakerSnapshot,
    /// Routing markers stripped; `[FROM]`/`[TEAM_TASK]` preserved.
    pub content: String,
    pub routing: MessageRouting,
}

impl ConversationMessage {
    pub fn new(speaker: SpeakerSnapshot, content: String, routing: MessageRouting) -> Self {
        ConversationMessage {
            id: Arc::from(Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            speaker,
            content,
            routing,
        }
    }
}

/// A snapshot of a member's identity at the moment they spoke, so history
/// renders correctly even if the member is later removed from the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSnapshot {
    pub member_id: MemberId,
    pub display_name: Arc<str>,
    pub kind: MemberKind,
}

impl From<&Member> for SpeakerSnapshot {
    fn from(m: &Member) -> Self {
        SpeakerSnapshot {
            member_id: m.id.clone(),
            display_name: m.display_name.clone(),
            kind: m.kind,
        }
    }
}

/// Routing metadata carried on a `ConversationMessage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRouting {
    pub raw_next_markers: Vec<ParsedAddressee>,
    pub resolved: Vec<MemberId>,
    pub parent_message_id: Option<Arc<str>>,
    pub intent: Option<Intent>,
}

/// A queued request for a specific member to speak next.
#[derive(Debug, Clone)]
pub struct RoutingItem {
    pub id: Arc<str>,
    pub target_member_id: MemberId,
    pub parent_message_id: Arc<str>,
    pub trigger_message_id: Arc<str>,
    pub intent: Intent,
    /// Monotonic tick, not wall-clock: ordering within a priority tier must
    /// be enqueue order, which a coarse timestamp can't guarantee under load.
    pub enqueued_at: u64,
}

impl RoutingItem {
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.parent_message_id,
            self.target_member_id,
            self.intent.as_marker()
        )
    }
}

/// The current team task string, truncated to a fixed soft cap.
#[derive(Debug, Clone, Default)]
pub struct TeamTask {
    text: String,
}

impl TeamTask {
    pub fn set(&mut self, text: &str, soft_cap: usize) {
        self.text = truncate_with_ellipsis(text, soft_cap);
    }

    pub fn get(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

fn truncate_with_ellipsis(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(cap.saturating_sub(1)).collect();
    truncated.push('\u{2026}');
    truncated
}
