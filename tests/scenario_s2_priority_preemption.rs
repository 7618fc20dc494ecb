//! S2: a human message addresses two AI members in one `[NEXT]` list, one
//! tagged `!P1` and one left at the default `P2`. The routing queue must
//! dispatch the `P1` member first regardless of list order.

mod common;

use common::{claude_agent_tagged, coordinator_with_env, human, team_of, MockExecutionEnvironment};

#[tokio::test]
async fn p1_member_dispatched_before_p2_member() {
    let team = team_of(vec![
        human("alice", 0),
        claude_agent_tagged("carol", 1, &["--member-tag=carol"]),
        claude_agent_tagged("dave", 2, &["--member-tag=dave"]),
    ]);

    let transcript = concat!(
        r#"{"type":"system","subtype":"init","session_id":"s2"}"#, "\n",
        r#"{"type":"result","subtype":"success","is_error":false,"result":"ack"}"#, "\n",
    );
    let env = MockExecutionEnvironment::scripted(transcript);
    let (mut coordinator, spawn_log) = coordinator_with_env(env);
    coordinator.set_team(team, Default::default()).await.unwrap();

    // carol listed first at default priority, dave listed second but marked
    // P1 - dave must still go first.
    coordinator
        .send_message("[FROM:alice] go [NEXT:carol, dave!P1]", None)
        .await
        .unwrap();

    let log = spawn_log.lock().unwrap();
    assert_eq!(log.len(), 2, "both members should have been dispatched");
    let first_call_is_dave = log[0].iter().any(|a| a == "--member-tag=dave");
    let second_call_is_carol = log[1].iter().any(|a| a == "--member-tag=carol");
    assert!(first_call_is_dave, "P1 member must be dispatched first, got: {:?}", log[0]);
    assert!(second_call_is_carol, "P2 member should follow, got: {:?}", log[1]);
}
