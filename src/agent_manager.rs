//! Lazily spawns, reuses, streams, times out, and cancels agent subprocesses,
//! publishing every parsed event on the [`EventBus`].
//!
//! One CLI agent per member: spawn with `stream-json` output, tag stdout
//! against the matching family parser, and race a `oneshot` kill-channel
//! against the read loop and a timeout deadline via
//! `tokio::select! { biased; cancel, timeout, read }` so cancellation and
//! timeout both win over continued reading. The race runs through the
//! injected [`ExecutionEnvironment`] trait rather than `tokio::process`
//! directly, so tests substitute a `MockExecutionEnvironment`. SIGTERM is
//! sent first, with a bounded wait before escalating to SIGKILL via
//! `nix::sys::signal`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, Mutex};

use crate::collaborators::{
    Adapter, AgentConfig, SharedAdapterFactory, SharedAgentConfigManager, SharedExecutionEnvironment,
    SpawnOptions,
};
use crate::error::{ChatterError, ChatterResult};
use crate::event::{AgentEvent, AgentEventKind, FinishReason, TextCategory};
use crate::event_bus::EventBus;
use crate::model::{Member, MemberId, Team};
use crate::stream::claude::ClaudeStreamParser;
use crate::stream::codex::CodexStreamParser;
use crate::stream::gemini::GeminiStreamParser;
use crate::stream::StreamParser;

const CLAUDE_AGENT_TYPE: &str = "claude-code";
const CODEX_AGENT_TYPE: &str = "openai-codex";
const GEMINI_AGENT_TYPE: &str = "google-gemini";

/// Options for a single [`AgentManager::send`] call, layered on top of the
/// adapter's and config's fixed argv.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Rendered by the context manager for Claude; passed as `--append-system-prompt`.
    pub system_flag: Option<String>,
    /// Overrides `default_agent_timeout`, clamped to `max_agent_timeout`.
    pub timeout: Option<Duration>,
}

/// Result of a completed, timed-out, or cancelled `send`.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub finish_reason: FinishReason,
    pub accumulated_text: String,
}

struct CachedAdapter {
    adapter: Box<dyn Adapter>,
    config: AgentConfig,
}

struct RunningHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct AgentManager {
    env: SharedExecutionEnvironment,
    factory: SharedAdapterFactory,
    configs: SharedAgentConfigManager,
    bus: EventBus,
    adapters: Mutex<HashMap<MemberId, CachedAdapter>>,
    running: Mutex<HashMap<MemberId, RunningHandle>>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl AgentManager {
    pub fn new(
        env: SharedExecutionEnvironment,
        factory: SharedAdapterFactory,
        configs: SharedAgentConfigManager,
        bus: EventBus,
        default_timeout: Duration,
        max_timeout: Duration,
    ) -> Self {
        AgentManager {
            env,
            factory,
            configs,
            bus,
            adapters: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            default_timeout,
            max_timeout,
        }
    }

    /// Create and cache an adapter for `member` if one isn't already cached.
    /// For `stateless` adapters (the default) no process is spawned here;
    /// spawning happens lazily in [`Self::send`].
    pub async fn ensure_started(&self, member: &Member, config_id: &str) -> ChatterResult<()> {
        let mut adapters = self.adapters.lock().await;
        if adapters.contains_key(&member.id) {
            return Ok(());
        }
        let agent_type = member
            .agent_type
            .as_deref()
            .ok_or_else(|| ChatterError::UnknownAgentFamily("<human member has no agent_type>".into()))?;
        let config = self.configs.get_agent_config(config_id).await?;
        let adapter = self.factory.create(agent_type, &config)?;
        adapters.insert(member.id.clone(), CachedAdapter { adapter, config });
        Ok(())
    }

    /// Dispatch one turn to `member`'s cached adapter, streaming its output
    /// through the matching family parser and publishing every event on the
    /// bus. Resolves exactly once, carrying the single `turn.completed`
    /// outcome — it never rejects on timeout or cancellation, only on a
    /// spawn failure or a non-zero exit the child never explained.
    pub async fn send(
        &self,
        member: &Member,
        team: Arc<Team>,
        prompt: &str,
        options: SendOptions,
    ) -> ChatterResult<SendOutcome> {
        let agent_type: Arc<str> = member
            .agent_type
            .clone()
            .ok_or_else(|| ChatterError::UnknownAgentFamily("<human member has no agent_type>".into()))?;

        let (command, default_args, config) = {
            let adapters = self.adapters.lock().await;
            let cached = adapters
                .get(&member.id)
                .ok_or_else(|| ChatterError::NoRunningAgent(member.id.to_string()))?;
            (
                cached.adapter.command().to_string(),
                cached.adapter.default_args(),
                cached.config.clone(),
            )
        };

        let argv = build_argv(
            &agent_type,
            &default_args,
            &config.args,
            &member.extra_args,
            options.system_flag.as_deref(),
            prompt,
        );
        let env = merge_env(&config.env, &member.env_overrides);
        let spawn_options = SpawnOptions { cwd: config.cwd.clone(), env };

        let mut process = self.env.spawn(&command, &argv, spawn_options).await?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        {
            let mut running = self.running.lock().await;
            running.insert(member.id.clone(), RunningHandle { cancel_tx: Some(cancel_tx) });
        }

        let mut parser = make_parser(&agent_type)?;
        let mut accumulated = String::new();
        let mut finish_reason: Option<FinishReason> = None;
        let timeout = options
            .timeout
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        if let Some(mut stdout) = process.take_stdout() {
            let sleep = tokio::time::sleep(timeout);
            tokio::pin!(sleep);
            let mut buf = [0u8; 8192];
            loop {
                tokio::select! {
                    biased;

                    _ = &mut cancel_rx => {
                        let _ = process.kill(Signal::SIGTERM).await;
                        finish_reason = Some(FinishReason::Cancelled);
                        break;
                    }

                    _ = &mut sleep => {
                        let _ = process.kill(Signal::SIGTERM).await;
                        finish_reason = Some(FinishReason::Timeout);
                        break;
                    }

                    read = stdout.read(&mut buf) => {
                        let n = read.map_err(ChatterError::Io)?;
                        if n == 0 {
                            break;
                        }
                        let events = parser.parse_chunk(&buf[..n]);
                        if self.dispatch(member, &agent_type, &team, events, &mut accumulated, &mut finish_reason) {
                            break;
                        }
                    }
                }
            }
        }

        if finish_reason.is_none() {
            let events = parser.flush();
            self.dispatch(member, &agent_type, &team, events, &mut accumulated, &mut finish_reason);
        }

        if matches!(finish_reason, Some(FinishReason::Cancelled) | Some(FinishReason::Timeout)) {
            tokio::select! {
                _ = process.wait() => {}
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    let _ = process.kill(Signal::SIGKILL).await;
                }
            }
        }

        let exit = process.wait().await?;

        self.running.lock().await.remove(&member.id);

        let resolved = match finish_reason {
            Some(fr) => fr,
            None => {
                if exit.success() {
                    self.publish(
                        member,
                        &agent_type,
                        &team,
                        AgentEventKind::TurnCompleted { finish_reason: FinishReason::Done },
                    );
                    FinishReason::Done
                } else {
                    self.publish(
                        member,
                        &agent_type,
                        &team,
                        AgentEventKind::Error {
                            error: format!("agent process exited with status {:?}", exit.code),
                            code: "PROCESS_EXIT",
                        },
                    );
                    return Err(ChatterError::ProcessExit(exit.code.unwrap_or(-1)));
                }
            }
        };

        if matches!(resolved, FinishReason::Cancelled) {
            self.adapters.lock().await.remove(&member.id);
        }

        Ok(SendOutcome {
            success: matches!(resolved, FinishReason::Done),
            finish_reason: resolved,
            accumulated_text: accumulated,
        })
    }

    /// Publish each event, folding `result`/`message` text into
    /// `accumulated` and latching `finish_reason` on `turn.completed`.
    /// Returns whether a `turn.completed` was observed, so the read loop
    /// knows to stop.
    fn dispatch(
        &self,
        member: &Member,
        agent_type: &Arc<str>,
        team: &Arc<Team>,
        events: Vec<AgentEventKind>,
        accumulated: &mut String,
        finish_reason: &mut Option<FinishReason>,
    ) -> bool {
        let mut completed = false;
        for event in events {
            match &event {
                AgentEventKind::Text { text, category }
                    if matches!(category, TextCategory::Result | TextCategory::Message) =>
                {
                    accumulated.push_str(text);
                }
                AgentEventKind::TurnCompleted { finish_reason: fr } => {
                    *finish_reason = Some(*fr);
                    completed = true;
                }
                _ => {}
            }
            self.publish(member, agent_type, team, event);
        }
        completed
    }

    fn publish(&self, member: &Member, agent_type: &Arc<str>, team: &Arc<Team>, kind: AgentEventKind) {
        self.bus.publish(AgentEvent::new(
            member.id.clone(),
            agent_type.clone(),
            team.clone(),
            kind,
        ));
    }

    /// Idempotent: the second call on an already-cancelled or already-exited
    /// member finds no cancel sender left to consume and is a no-op.
    pub async fn cancel(&self, member_id: &MemberId) {
        let mut running = self.running.lock().await;
        if let Some(handle) = running.get_mut(member_id) {
            if let Some(tx) = handle.cancel_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    pub async fn stop(&self, member_id: &MemberId) {
        self.cancel(member_id).await;
        let cached = self.adapters.lock().await.remove(member_id);
        if let Some(cached) = cached {
            cached.adapter.cleanup().await;
        }
    }

    pub async fn cleanup(&self) {
        let ids: Vec<MemberId> = self.running.lock().await.keys().cloned().collect();
        for id in ids {
            self.cancel(&id).await;
        }
        let cached: Vec<CachedAdapter> = self.adapters.lock().await.drain().map(|(_, v)| v).collect();
        for entry in cached {
            entry.adapter.cleanup().await;
        }
    }
}

fn make_parser(agent_type: &str) -> ChatterResult<Box<dyn StreamParser>> {
    match agent_type {
        CLAUDE_AGENT_TYPE => Ok(Box::new(ClaudeStreamParser::new())),
        CODEX_AGENT_TYPE => Ok(Box::new(CodexStreamParser::new())),
        GEMINI_AGENT_TYPE => Ok(Box::new(GeminiStreamParser::new())),
        other => Err(ChatterError::UnknownAgentFamily(other.to_string())),
    }
}

/// Assemble final argv: adapter defaults, then config args, then member
/// extras, then family-specific enforced flags (only appended when the
/// corresponding flag is absent), then the prompt as the final positional.
fn build_argv(
    agent_type: &str,
    adapter_default_args: &[String],
    config_args: &[String],
    member_extra_args: &[String],
    system_flag: Option<&str>,
    prompt: &str,
) -> Vec<String> {
    let mut args = Vec::new();
    args.extend(adapter_default_args.iter().cloned());
    args.extend(config_args.iter().cloned());
    args.extend(member_extra_args.iter().cloned());

    match agent_type {
        CLAUDE_AGENT_TYPE => enforce_claude_flags(&mut args, system_flag),
        CODEX_AGENT_TYPE => enforce_codex_flags(&mut args),
        GEMINI_AGENT_TYPE => enforce_gemini_flags(&mut args),
        _ => {}
    }

    args.push(prompt.to_string());
    args
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn enforce_claude_flags(args: &mut Vec<String>, system_flag: Option<&str>) {
    if !has_flag(args, "-p") {
        args.push("-p".to_string());
    }
    if !has_flag(args, "--permission-mode") {
        args.push("--permission-mode".to_string());
        args.push("bypassPermissions".to_string());
    }
    if !has_flag(args, "--output-format") {
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
    }
    if let Some(system) = system_flag {
        if !has_flag(args, "--append-system-prompt") {
            args.push("--append-system-prompt".to_string());
            args.push(system.to_string());
        }
    }
}

fn enforce_codex_flags(args: &mut Vec<String>) {
    args.retain(|a| a != "--full-auto");
    if !has_flag(args, "--dangerously-bypass-approvals-and-sandbox") {
        args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
    }
}

fn enforce_gemini_flags(args: &mut Vec<String>) {
    if !has_flag(args, "--yolo") {
        args.push("--yolo".to_string());
    }
    if !has_flag(args, "--output-format") {
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
    }
}

/// Process env + config env + member env, later wins.
fn merge_env(
    config_env: &HashMap<String, String>,
    member_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = std::env::vars().collect();
    merged.extend(config_env.clone());
    merged.extend(member_env.clone());
    merged
}
