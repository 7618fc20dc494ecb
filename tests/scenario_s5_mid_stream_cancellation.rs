//! S5: a human cancels a turn while the agent's process is still running.
//! The agent manager must resolve with `Cancelled` rather than hanging, and
//! must escalate to killing the underlying process.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agent_chatter::agent_manager::SendOptions;
use agent_chatter::event::FinishReason;
use agent_chatter::AgentManager;
use common::{claude_agent, team_of, MockAdapterFactory, MockAgentConfigManager, MockExecutionEnvironment};
use agent_chatter::EventBus;

#[tokio::test]
async fn cancel_resolves_the_hanging_send_as_cancelled() {
    let bot = claude_agent("bot", 0);
    let team = team_of(vec![bot.clone()]);

    let env = MockExecutionEnvironment::hanging();
    let kill_log = env.kill_log.clone();

    let manager = Arc::new(AgentManager::new(
        Arc::new(env),
        Arc::new(MockAdapterFactory),
        Arc::new(MockAgentConfigManager),
        EventBus::new(16),
        Duration::from_secs(60),
        Duration::from_secs(120),
    ));

    manager.ensure_started(&bot, "bot").await.unwrap();

    let send_manager = manager.clone();
    let send_team = team.clone();
    let send_member = bot.clone();
    let handle = tokio::spawn(async move {
        send_manager
            .send(&send_member, send_team, "do something slow", SendOptions::default())
            .await
    });

    // Give the spawn a moment to register its cancel handle before cancelling.
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.cancel(&bot.id).await;

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Cancelled);
    assert!(!outcome.success);
    assert!(!kill_log.lock().unwrap().is_empty(), "cancellation must escalate to killing the process");

    // Cancelling again after resolution is a no-op, not a panic.
    manager.cancel(&bot.id).await;
}
