//! S4: a bare, unbracketed mention of `TEAM_TASK` in message text is
//! rejected outright - the coordinator never touches history or the team
//! task for a malformed message.

mod common;

use agent_chatter::{ChatterError, ConversationStatus};
use common::{claude_agent, coordinator_with_env, human, team_of, MockExecutionEnvironment};

#[tokio::test]
async fn unbracketed_team_task_mention_is_rejected() {
    let team = team_of(vec![human("alice", 0), claude_agent("bot", 1)]);
    let env = MockExecutionEnvironment::scripted("");
    let (mut coordinator, spawn_log) = coordinator_with_env(env);
    coordinator.set_team(team, Default::default()).await.unwrap();

    let result = coordinator
        .send_message("please update the TEAM_TASK to something else", None)
        .await;

    assert!(matches!(result, Err(ChatterError::InvalidTeamTask)));
    assert!(coordinator.get_session().is_empty(), "rejected message must not land in history");
    assert_eq!(coordinator.get_status(), ConversationStatus::Paused, "status unaffected by a rejected send");
    assert!(spawn_log.lock().unwrap().is_empty(), "no agent should ever be dispatched for a rejected message");
}

#[tokio::test]
async fn properly_bracketed_team_task_is_accepted() {
    let team = team_of(vec![human("alice", 0), claude_agent("bot", 1)]);
    let env = MockExecutionEnvironment::scripted(concat!(
        r#"{"type":"system","subtype":"init","session_id":"s4"}"#, "\n",
        r#"{"type":"result","subtype":"success","is_error":false,"result":"ack"}"#, "\n",
    ));
    let (mut coordinator, _spawn_log) = coordinator_with_env(env);
    coordinator.set_team(team, Default::default()).await.unwrap();

    let result = coordinator
        .send_message("[TEAM_TASK:ship the release] let's get moving [NEXT:bot]", None)
        .await;

    assert!(result.is_ok());
    assert_eq!(coordinator.get_session().len(), 2);
}
