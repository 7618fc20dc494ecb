//! External interfaces the core consumes: process spawning, agent adapters,
//! agent configuration lookup, and session persistence.
//!
//! None of these are implemented in full by the core beyond
//! [`TokioExecutionEnvironment`] (the sole production `ExecutionEnvironment`)
//! and [`NullSessionStorage`] (a no-op `SessionStorage` for callers and tests
//! with nothing to persist). Discovery, schema storage, and file watching for
//! team/agent configuration stay outside this crate.
//!
//! The spawn shape is the familiar `tokio::process::Command` +
//! `Stdio::piped()` one, generalized behind a trait so `AgentManager` can be
//! driven by a `MockExecutionEnvironment` in tests instead of real
//! subprocesses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::process::Command as TokioCommand;

use crate::error::{ChatterError, ChatterResult};
use crate::model::ConversationMessage;

/// Whether an adapter spawns a fresh process per message, or keeps one
/// long-lived process per member with messages interleaved over stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Stateless,
    Stateful,
}

/// Opaque handle to a running (or about-to-be-running) agent subprocess,
/// resolved from an `AgentConfigManager` lookup.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Options passed to [`ExecutionEnvironment::spawn`]. stdin is always
/// discarded (never a TTY) so CLI agents never activate raw-mode input
/// handling meant for an interactive terminal.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Outcome of waiting on a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A boxed, type-erased async byte stream; stdout/stderr handles are exposed
/// this way so `AgentManager` need not depend on `tokio::process` directly.
pub type BoxedAsyncRead = Box<dyn AsyncRead + Send + Unpin>;

/// A single spawned process, piped stdout/stderr, signallable by PID.
#[async_trait]
pub trait Process: Send {
    fn id(&self) -> Option<u32>;
    fn take_stdout(&mut self) -> Option<BoxedAsyncRead>;
    fn take_stderr(&mut self) -> Option<BoxedAsyncRead>;
    async fn kill(&mut self, signal: Signal) -> ChatterResult<()>;
    async fn wait(&mut self) -> ChatterResult<ExitOutcome>;
}

/// Collaborator that turns a command + argv into a running [`Process`].
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> ChatterResult<Box<dyn Process>>;
}

/// Thin wrapper over `tokio::process::Child`.
pub struct TokioProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl Process for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<BoxedAsyncRead> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as BoxedAsyncRead)
    }

    fn take_stderr(&mut self) -> Option<BoxedAsyncRead> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as BoxedAsyncRead)
    }

    async fn kill(&mut self, signal: Signal) -> ChatterResult<()> {
        match self.child.id() {
            Some(pid) => {
                let _ = nix::sys::signal::kill(Pid::from_raw(pid as i32), signal);
                Ok(())
            }
            // Process already reaped; nothing to signal.
            None => Ok(()),
        }
    }

    async fn wait(&mut self) -> ChatterResult<ExitOutcome> {
        let status = self.child.wait().await.map_err(ChatterError::Io)?;
        Ok(ExitOutcome {
            code: status.code(),
            #[cfg(unix)]
            signal: std::os::unix::process::ExitStatusExt::signal(&status),
            #[cfg(not(unix))]
            signal: None,
        })
    }
}

/// The sole production `ExecutionEnvironment`: spawns via
/// `tokio::process::Command` with `stdin(Stdio::null())` so agents never see
/// a TTY, and piped stdout/stderr.
pub struct TokioExecutionEnvironment;

#[async_trait]
impl ExecutionEnvironment for TokioExecutionEnvironment {
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> ChatterResult<Box<dyn Process>> {
        let mut cmd = TokioCommand::new(command);
        cmd.args(args);
        cmd.envs(&options.env);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let child = cmd
            .spawn()
            .map_err(|e| ChatterError::ProcessSpawn(e.to_string()))?;
        Ok(Box::new(TokioProcess { child }))
    }
}

/// One agent family's fixed properties: which binary to run, its default
/// args, and whether it is reused across turns.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn agent_type(&self) -> &str;
    fn command(&self) -> &str;
    fn execution_mode(&self) -> ExecutionMode;
    fn default_args(&self) -> Vec<String>;

    /// Optional teardown for adapters holding external resources (a
    /// long-lived stateful process, temp files). No-op by default.
    async fn cleanup(&self) {}
}

/// Creates an [`Adapter`] for a resolved `agentType`/`AgentConfig` pair.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, agent_type: &str, config: &AgentConfig) -> ChatterResult<Box<dyn Adapter>>;
}

/// Resolves a member's `agentConfigId` into a runnable command, args, and
/// environment. Storage, schema, and file-watching for the underlying config
/// records are a collaborator concern, out of scope for this crate.
#[async_trait]
pub trait AgentConfigManager: Send + Sync {
    async fn get_agent_config(&self, config_id: &str) -> ChatterResult<AgentConfig>;
}

/// The payload the core hands to [`SessionStorage`] at each save trigger:
/// history, the current team task, and enough status to resume a paused
/// conversation. Routing-queue contents are deliberately not persisted —
/// resuming re-derives routing from the next human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub team_id: String,
    pub messages: Vec<ConversationMessage>,
    pub team_task: String,
    pub waiting_for_member_id: Option<String>,
    pub status: SnapshotStatus,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

/// Serializable mirror of `coordinator::ConversationStatus`, kept separate so
/// the coordinator's in-memory status type is free to gain non-serializable
/// fields later without touching the persisted shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Active,
    Paused,
    Completed,
}

/// Opaque persistence collaborator. The core only calls `save_session` at a
/// handful of trigger points (pause, stop, cancellation); `load_session`
/// and `get_latest_session` exist for a resuming caller, never invoked by the
/// core's own turn loop.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save_session(&self, team_id: &str, snapshot: Snapshot) -> ChatterResult<()>;
    async fn load_session(&self, team_id: &str, session_id: &str) -> ChatterResult<Option<Snapshot>>;
    async fn get_latest_session(&self, team_id: &str) -> ChatterResult<Option<Snapshot>>;
}

/// No-op [`SessionStorage`] for callers and tests with no persistence needs.
pub struct NullSessionStorage;

#[async_trait]
impl SessionStorage for NullSessionStorage {
    async fn save_session(&self, _team_id: &str, _snapshot: Snapshot) -> ChatterResult<()> {
        Ok(())
    }

    async fn load_session(&self, _team_id: &str, _session_id: &str) -> ChatterResult<Option<Snapshot>> {
        Ok(None)
    }

    async fn get_latest_session(&self, _team_id: &str) -> ChatterResult<Option<Snapshot>> {
        Ok(None)
    }
}

/// Type alias used throughout the manager/coordinator to avoid repeating the
/// `Arc<dyn Trait>` spelling at every call site.
pub type SharedExecutionEnvironment = Arc<dyn ExecutionEnvironment>;
pub type SharedAdapterFactory = Arc<dyn AdapterFactory>;
pub type SharedAgentConfigManager = Arc<dyn AgentConfigManager>;
pub type SharedSessionStorage = Arc<dyn SessionStorage>;
