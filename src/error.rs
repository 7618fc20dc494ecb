//! Crate-wide error type.
//!
//! Every fallible public entry point returns [`ChatterResult<T>`]. Variants
//! mirror the error taxonomy of the conversation engine rather than wrapping
//! arbitrary third-party errors; the one exception is [`ChatterError::Io`],
//! which `?`-converts from [`std::io::Error`] at process-spawn boundaries.

use thiserror::Error;

pub type ChatterResult<T> = Result<T, ChatterError>;

/// A machine-stable error kind, surfaced to collaborators alongside a free
/// text message so UIs can render a short code and a human explanation.
#[derive(Debug, Error)]
pub enum ChatterError {
    #[error("no member resolves to addressee(s): {0:?}")]
    UnknownAddressee(Vec<String>),

    #[error("[FROM:{0}] resolves to a non-human member")]
    NonHumanFrom(String),

    #[error("message mentions TEAM_TASK but is not in the form [TEAM_TASK:...]")]
    InvalidTeamTask,

    #[error("failed to spawn agent process: {0}")]
    ProcessSpawn(String),

    #[error("agent process exited with status {0} before completing its turn")]
    ProcessExit(i32),

    #[error("no running agent for member {0}")]
    NoRunningAgent(String),

    #[error("unknown agent family: {0}")]
    UnknownAgentFamily(String),

    #[error("missing configuration for agent config id {0}")]
    ConfigMissing(String),

    #[error("no active team: call set_team before sending messages")]
    NoActiveTeam,

    #[error("conversation already stopped")]
    ConversationStopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatterError {
    /// A short machine-stable code, e.g. `"PROCESS_EXIT"`, matching the
    /// taxonomy codes named in the conversation engine's error handling
    /// design (`AUTH_MISSING`, `JSONL_PARSE_ERROR`, `PROCESS_EXIT`, ...).
    pub fn code(&self) -> &'static str {
        match self {
            ChatterError::UnknownAddressee(_) => "UNKNOWN_ADDRESSEE",
            ChatterError::NonHumanFrom(_) => "NON_HUMAN_FROM",
            ChatterError::InvalidTeamTask => "INVALID_TEAM_TASK",
            ChatterError::ProcessSpawn(_) => "PROCESS_SPAWN_ERROR",
            ChatterError::ProcessExit(_) => "PROCESS_EXIT",
            ChatterError::NoRunningAgent(_) => "NO_RUNNING_AGENT",
            ChatterError::UnknownAgentFamily(_) => "UNKNOWN_AGENT_FAMILY",
            ChatterError::ConfigMissing(_) => "CONFIG_MISSING",
            ChatterError::NoActiveTeam => "NO_ACTIVE_TEAM",
            ChatterError::ConversationStopped => "CONVERSATION_STOPPED",
            ChatterError::Io(_) => "IO_ERROR",
        }
    }
}
