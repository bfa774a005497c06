// Verify the envelope wire format matches what the agent gateway expects.
// These tests ensure gateway compatibility is never broken.

use memoh_protocol::{Envelope, IdentityBlock, ModelBlock, RoundPayload, ScheduleBlock};
use serde_json::json;

fn sample_envelope() -> Envelope {
    Envelope {
        model: ModelBlock {
            model_id: "claude-sonnet-4".into(),
            client_type: "anthropic".into(),
            input: vec![],
            api_key: "sk-test".into(),
            base_url: "https://api.anthropic.com".into(),
        },
        active_context_time: 120,
        channels: vec!["feishu".into(), "webchat".into()],
        current_channel: "feishu".into(),
        allowed_actions: None,
        mcp_connections: vec![json!({"name": "files", "type": "stdio"})],
        messages: vec![json!({"role": "user", "content": "hi"})],
        skills: vec!["greeting".into()],
        usable_skills: vec![],
        query: "hi".into(),
        identity: IdentityBlock {
            bot_id: "bot-1".into(),
            session_id: "s-1".into(),
            container_id: "mcp-bot-1".into(),
            contact_id: "ci-1".into(),
            contact_name: "Ada".into(),
            contact_alias: None,
            user_id: Some("u-1".into()),
            current_platform: Some("feishu".into()),
            reply_target: None,
            session_token: None,
        },
        attachments: vec![],
        schedule: None,
    }
}

#[test]
fn envelope_uses_camel_case_keys() {
    let value = serde_json::to_value(sample_envelope()).unwrap();

    assert!(value.get("activeContextTime").is_some());
    assert!(value.get("currentChannel").is_some());
    assert!(value.get("mcpConnections").is_some());
    assert!(value.get("usableSkills").is_some());
    assert_eq!(value["model"]["clientType"], "anthropic");
    assert_eq!(value["identity"]["botId"], "bot-1");
    assert_eq!(value["identity"]["containerId"], "mcp-bot-1");
    // Optional identity fields are omitted, not null.
    assert!(value["identity"].get("replyTarget").is_none());
}

#[test]
fn absent_schedule_and_allowed_actions_are_omitted() {
    let value = serde_json::to_value(sample_envelope()).unwrap();
    assert!(value.get("schedule").is_none());
    assert!(value.get("allowedActions").is_none());
}

#[test]
fn schedule_block_round_trips() {
    let mut envelope = sample_envelope();
    envelope.schedule = Some(ScheduleBlock {
        id: "sch-1".into(),
        name: "daily digest".into(),
        description: "".into(),
        pattern: "0 9 * * *".into(),
        max_calls: Some(30),
        command: "summarize the day".into(),
    });

    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["schedule"]["pattern"], "0 9 * * *");
    assert_eq!(value["schedule"]["maxCalls"], 30);
}

#[test]
fn round_payload_tolerates_missing_skills() {
    let payload: RoundPayload =
        serde_json::from_value(json!({"messages": [{"role": "assistant", "content": "ok"}]}))
            .unwrap();
    assert_eq!(payload.messages.len(), 1);
    assert!(payload.skills.is_empty());

    let payload: RoundPayload = serde_json::from_value(json!({})).unwrap();
    assert!(payload.messages.is_empty());
}
