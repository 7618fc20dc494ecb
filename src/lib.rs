//! Orchestrates multi-party conversations between AI command-line coding
//! agents (Claude Code, Codex, Gemini) and humans: routing-marker parsing,
//! priority turn scheduling, subprocess lifecycle management, and a unified
//! event stream.
//!
//! The crate root re-exports the handful of types a caller needs to drive a
//! conversation end to end; everything else is reached through its owning
//! module (`coordinator::Coordinator`, `routing_queue::RoutingQueue`, ...).

pub mod agent_manager;
pub mod collaborators;
pub mod collector;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod marker;
pub mod model;
pub mod routing_queue;
pub mod stream;

pub use agent_manager::AgentManager;
pub use collaborators::{
    Adapter, AdapterFactory, AgentConfig, AgentConfigManager, ExecutionEnvironment,
    SessionStorage, Snapshot, TokioExecutionEnvironment,
};
pub use config::ChatterConfig;
pub use coordinator::{Coordinator, ConversationStatus};
pub use error::{ChatterError, ChatterResult};
pub use event::{AgentEvent, AgentEventKind, CoordinatorObserver, FinishReason};
pub use event_bus::EventBus;
pub use model::{Intent, Member, MemberId, MemberKind, Team};
