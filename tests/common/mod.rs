//! Shared fixtures for the crate-level scenario tests: a team builder plus
//! a `MockExecutionEnvironment` that hands a canned Claude
//! `stream-json` transcript back to whichever member the coordinator
//! dispatches, so a whole turn runs through the real `Coordinator` and
//! `AgentManager` without touching a real subprocess.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use agent_chatter::collaborators::{
    Adapter, AdapterFactory, AgentConfig, AgentConfigManager, ExecutionEnvironment, ExecutionMode,
    ExitOutcome, Process, SpawnOptions,
};
use agent_chatter::{AgentManager, ChatterConfig, ChatterResult, Coordinator, EventBus, Member, MemberKind, Team};

pub fn human(id: &str, order: u32) -> Member {
    Member {
        id: Arc::from(id),
        name: Arc::from(id),
        display_name: Arc::from(id),
        role: Arc::from("human"),
        kind: MemberKind::Human,
        order,
        agent_type: None,
        system_instruction: None,
        instruction_file_text: None,
        theme_color: None,
        env_overrides: HashMap::new(),
        extra_args: Vec::new(),
    }
}

pub fn claude_agent(id: &str, order: u32) -> Member {
    claude_agent_tagged(id, order, &[])
}

/// Same as [`claude_agent`] but with extra argv entries, so a test can tell
/// dispatched members apart in a spawn recorder without needing per-member
/// transcripts.
pub fn claude_agent_tagged(id: &str, order: u32, extra_args: &[&str]) -> Member {
    Member {
        id: Arc::from(id),
        name: Arc::from(id),
        display_name: Arc::from(id),
        role: Arc::from("agent"),
        kind: MemberKind::Ai,
        order,
        agent_type: Some(Arc::from("claude-code")),
        system_instruction: None,
        instruction_file_text: None,
        theme_color: None,
        env_overrides: HashMap::new(),
        extra_args: extra_args.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn team_of(members: Vec<Member>) -> Arc<Team> {
    Arc::new(Team { id: Arc::from("team-1"), name: Arc::from("Team One"), members })
}

/// Reads a fixed byte buffer once, then EOFs, mimicking a process whose
/// stdout closes right after it finishes writing.
struct FixedReader {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for FixedReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Never produces data; simulates a process that outlives a cancellation or
/// timeout deadline.
struct HangingReader;

impl AsyncRead for HangingReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

struct MockProcess {
    stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    exit: ExitOutcome,
    kill_log: Arc<StdMutex<Vec<i32>>>,
}

#[async_trait]
impl Process for MockProcess {
    fn id(&self) -> Option<u32> {
        Some(9999)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
        None
    }

    async fn kill(&mut self, signal: nix::sys::signal::Signal) -> ChatterResult<()> {
        self.kill_log.lock().unwrap().push(signal as i32);
        Ok(())
    }

    async fn wait(&mut self) -> ChatterResult<ExitOutcome> {
        Ok(self.exit)
    }
}

/// Hands every spawned member the same scripted stdout transcript. Scripts
/// are keyed by agent argv's trailing prompt substring match is unnecessary
/// here since each scenario only dispatches one member at a time; a richer
/// harness could key on `command`/`args` if a scenario needed per-member
/// scripts.
pub struct MockExecutionEnvironment {
    pub script: Option<Vec<u8>>,
    pub hang: bool,
    pub exit: ExitOutcome,
    pub kill_log: Arc<StdMutex<Vec<i32>>>,
    pub spawn_count: AtomicUsize,
    /// Full argv of every spawn call, in call order.
    pub spawn_log: Arc<StdMutex<Vec<Vec<String>>>>,
}

impl MockExecutionEnvironment {
    pub fn scripted(script: &str) -> Self {
        MockExecutionEnvironment {
            script: Some(script.as_bytes().to_vec()),
            hang: false,
            exit: ExitOutcome { code: Some(0), signal: None },
            kill_log: Arc::new(StdMutex::new(Vec::new())),
            spawn_count: AtomicUsize::new(0),
            spawn_log: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn hanging() -> Self {
        MockExecutionEnvironment {
            script: None,
            hang: true,
            exit: ExitOutcome { code: None, signal: Some(15) },
            kill_log: Arc::new(StdMutex::new(Vec::new())),
            spawn_count: AtomicUsize::new(0),
            spawn_log: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for MockExecutionEnvironment {
    async fn spawn(&self, _command: &str, args: &[String], _options: SpawnOptions) -> ChatterResult<Box<dyn Process>> {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        self.spawn_log.lock().unwrap().push(args.to_vec());
        let stdout: Box<dyn AsyncRead + Send + Unpin> = if self.hang {
            Box::new(HangingReader)
        } else {
            Box::new(FixedReader { data: self.script.clone().unwrap_or_default(), pos: 0 })
        };
        Ok(Box::new(MockProcess { stdout: Some(stdout), exit: self.exit, kill_log: self.kill_log.clone() }))
    }
}

struct MockClaudeAdapter;

#[async_trait]
impl Adapter for MockClaudeAdapter {
    fn agent_type(&self) -> &str {
        "claude-code"
    }
    fn command(&self) -> &str {
        "mock-claude"
    }
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Stateless
    }
    fn default_args(&self) -> Vec<String> {
        Vec::new()
    }
}

pub struct MockAdapterFactory;

impl AdapterFactory for MockAdapterFactory {
    fn create(&self, _agent_type: &str, _config: &AgentConfig) -> ChatterResult<Box<dyn Adapter>> {
        Ok(Box::new(MockClaudeAdapter))
    }
}

pub struct MockAgentConfigManager;

#[async_trait]
impl AgentConfigManager for MockAgentConfigManager {
    async fn get_agent_config(&self, _config_id: &str) -> ChatterResult<AgentConfig> {
        Ok(AgentConfig::default())
    }
}

/// A `Coordinator` wired to a `MockExecutionEnvironment`, ready to drive a
/// full turn through `send_message`. Returns the coordinator alongside the
/// env's spawn log so a test can inspect dispatch order after the fact.
pub fn coordinator_with_env(env: MockExecutionEnvironment) -> (Coordinator, Arc<StdMutex<Vec<Vec<String>>>>) {
    let spawn_log = env.spawn_log.clone();
    let agents = Arc::new(AgentManager::new(
        Arc::new(env),
        Arc::new(MockAdapterFactory),
        Arc::new(MockAgentConfigManager),
        EventBus::new(64),
        Duration::from_millis(300),
        Duration::from_secs(30 * 60),
    ));
    (Coordinator::new(agents, ChatterConfig::default()), spawn_log)
}
