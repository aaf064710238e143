// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn state_change_round_trips_through_json() -> anyhow::Result<()> {
    let event = AgentEvent::state_change(State::Active, SubState::ToolUse);
    let line = serde_json::to_string(&event)?;

    let value: serde_json::Value = serde_json::from_str(&line)?;
    assert_eq!(value["type"], "state_change");
    assert_eq!(value["data"]["state"], "active");
    assert_eq!(value["data"]["sub_state"], "tool_use");
    // RFC 3339 with a trailing Z.
    let ts = value["timestamp"].as_str().unwrap_or_default();
    assert!(ts.ends_with('Z'), "timestamp not RFC 3339: {ts}");

    let back: AgentEvent = serde_json::from_str(&line)?;
    assert_eq!(back, event);
    Ok(())
}

#[test]
fn unit_kinds_serialize_without_data() -> anyhow::Result<()> {
    let event = AgentEvent::now(EventPayload::SessionEnded);
    let value: serde_json::Value = serde_json::to_value(&event)?;
    assert_eq!(value["type"], "session_ended");
    assert!(value.get("data").is_none());
    Ok(())
}

#[test]
fn turn_completed_carries_token_fields() -> anyhow::Result<()> {
    let event = AgentEvent::now(EventPayload::TurnCompleted {
        input_tokens: 120,
        output_tokens: 45,
        cached_tokens: 1000,
        cost_usd: 0.0125,
    });
    let value: serde_json::Value = serde_json::to_value(&event)?;
    assert_eq!(value["data"]["input_tokens"], 120);
    assert_eq!(value["data"]["cached_tokens"], 1000);
    assert_eq!(value["data"]["cost_usd"], 0.0125);
    Ok(())
}

#[test]
fn optional_tool_fields_are_omitted() -> anyhow::Result<()> {
    let event = AgentEvent::now(EventPayload::ToolStarted {
        tool_name: "Bash".into(),
        call_id: None,
    });
    let value: serde_json::Value = serde_json::to_value(&event)?;
    assert!(value["data"].get("call_id").is_none());
    Ok(())
}

#[test]
fn kind_names_match_wire_strings() {
    assert_eq!(EventPayload::UserPrompt.kind(), "user_prompt");
    assert_eq!(
        EventPayload::ApprovalRequested { tool_name: String::new() }.kind(),
        "approval_requested"
    );
    assert_eq!(AgentEvent::state_change(State::Idle, SubState::None).kind(), "state_change");
}

#[test]
fn exited_state_formats_as_snake_case() {
    assert_eq!(State::Exited.to_string(), "exited");
    assert_eq!(SubState::WaitingForPermission.to_string(), "waiting_for_permission");
}
