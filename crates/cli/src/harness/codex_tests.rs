// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Tunables;
use crate::event::{AgentEvent, EventPayload, State, SubState};
use crate::harness::CommandArgsConfig;

use super::CodexHarness;

struct Running {
    harness: std::sync::Arc<CodexHarness>,
    events: mpsc::Receiver<AgentEvent>,
    cancel: CancellationToken,
}

fn start() -> Running {
    let harness = std::sync::Arc::new(CodexHarness::new(None, &Tunables::fast()));
    let (tx, events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    {
        let harness = harness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = harness.start(cancel, tx).await;
        });
    }
    Running { harness, events, cancel }
}

async fn next(events: &mut mpsc::Receiver<AgentEvent>) -> AgentEvent {
    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(event)) => event,
        _ => unreachable!("expected an event"),
    }
}

fn record(event_name: &str, attrs: &[(&str, serde_json::Value)]) -> serde_json::Value {
    let mut attributes = vec![json!({"key": "event.name", "value": {"stringValue": event_name}})];
    for (key, value) in attrs {
        attributes.push(json!({"key": key, "value": value}));
    }
    json!({
        "resourceLogs": [{"scopeLogs": [{"logRecords": [{"attributes": attributes}]}]}]
    })
}

fn completed(input: u64, output: u64, cached: u64) -> serde_json::Value {
    record(
        "codex.sse_event",
        &[
            ("kind", json!({"stringValue": "response.completed"})),
            ("input_tokens", json!({"intValue": input.to_string()})),
            ("output_tokens", json!({"intValue": output.to_string()})),
            ("cached_tokens", json!({"intValue": cached.to_string()})),
        ],
    )
}

#[tokio::test]
async fn conversation_starts_resets_and_reports_identity() {
    let mut running = start();
    running.harness.ingest_payload(&record(
        "codex.conversation_starts",
        &[
            ("thread_id", json!({"stringValue": "conv-9"})),
            ("model", json!({"stringValue": "gpt-5-codex"})),
        ],
    ));

    let started = next(&mut running.events).await;
    assert_eq!(
        started.payload,
        EventPayload::SessionStarted { thread_id: "conv-9".into(), model: "gpt-5-codex".into() }
    );
    let state = next(&mut running.events).await;
    assert_eq!(
        state.payload,
        EventPayload::StateChange { state: State::Idle, sub_state: SubState::None }
    );
    running.cancel.cancel();
}

#[tokio::test]
async fn cumulative_inputs_yield_deltas() {
    let mut running = start();
    running.harness.ingest_payload(&record("codex.user_prompt", &[]));
    let _user_prompt = next(&mut running.events).await;
    let _thinking = next(&mut running.events).await;

    running.harness.ingest_payload(&completed(1000, 50, 400));
    let turn = next(&mut running.events).await;
    assert_eq!(
        turn.payload,
        EventPayload::TurnCompleted {
            input_tokens: 1000,
            output_tokens: 50,
            cached_tokens: 400,
            cost_usd: 0.0,
        }
    );

    running.harness.ingest_payload(&completed(1600, 70, 900));
    let turn = next(&mut running.events).await;
    assert_eq!(
        turn.payload,
        EventPayload::TurnCompleted {
            input_tokens: 600,
            output_tokens: 70,
            cached_tokens: 500,
            cost_usd: 0.0,
        }
    );
    running.cancel.cancel();
}

#[tokio::test]
async fn decreasing_cumulative_value_is_a_reset() {
    let mut running = start();
    running.harness.ingest_payload(&completed(1000, 10, 300));
    let _first = next(&mut running.events).await;

    // Raw input dropped below the baseline: emitted delta is the raw value.
    running.harness.ingest_payload(&completed(200, 5, 100));
    let turn = next(&mut running.events).await;
    assert_eq!(
        turn.payload,
        EventPayload::TurnCompleted {
            input_tokens: 200,
            output_tokens: 5,
            cached_tokens: 100,
            cost_usd: 0.0,
        }
    );
    running.cancel.cancel();
}

#[tokio::test]
async fn completion_then_quiet_debounces_to_idle() {
    let mut running = start();
    running.harness.ingest_payload(&record("codex.user_prompt", &[]));
    let _user_prompt = next(&mut running.events).await;
    let _thinking = next(&mut running.events).await;

    running.harness.ingest_payload(&completed(100, 10, 0));
    let _turn = next(&mut running.events).await;

    // After the debounce delay the idle transition fires.
    let idle = next(&mut running.events).await;
    assert_eq!(
        idle.payload,
        EventPayload::StateChange { state: State::Idle, sub_state: SubState::None }
    );
    running.cancel.cancel();
}

#[tokio::test]
async fn tool_decision_cancels_pending_idle() {
    let mut running = start();
    running.harness.ingest_payload(&record("codex.user_prompt", &[]));
    let _user_prompt = next(&mut running.events).await;
    let _thinking = next(&mut running.events).await;

    running.harness.ingest_payload(&completed(100, 10, 0));
    let _turn = next(&mut running.events).await;

    // Approval arrives before the debounce fires.
    running.harness.ingest_payload(&record(
        "codex.tool_decision",
        &[
            ("decision", json!({"stringValue": "approved"})),
            ("tool_name", json!({"stringValue": "shell"})),
            ("call_id", json!({"stringValue": "call-1"})),
        ],
    ));

    let started = next(&mut running.events).await;
    assert_eq!(
        started.payload,
        EventPayload::ToolStarted { tool_name: "shell".into(), call_id: Some("call-1".into()) }
    );
    let state = next(&mut running.events).await;
    assert_eq!(
        state.payload,
        EventPayload::StateChange { state: State::Active, sub_state: SubState::ToolUse }
    );

    // Wait past the debounce window: no idle may sneak through.
    tokio::time::sleep(Tunables::fast().codex_idle_debounce * 4).await;
    assert!(running.events.try_recv().is_err(), "debounced idle fired after tool start");
    running.cancel.cancel();
}

#[tokio::test]
async fn ask_user_decision_requests_approval() {
    let mut running = start();
    running.harness.ingest_payload(&record(
        "codex.tool_decision",
        &[
            ("decision", json!({"stringValue": "ask_user"})),
            ("tool_name", json!({"stringValue": "apply_patch"})),
        ],
    ));

    let approval = next(&mut running.events).await;
    assert_eq!(
        approval.payload,
        EventPayload::ApprovalRequested { tool_name: "apply_patch".into() }
    );
    let state = next(&mut running.events).await;
    assert_eq!(
        state.payload,
        EventPayload::StateChange {
            state: State::Active,
            sub_state: SubState::WaitingForPermission
        }
    );
    running.cancel.cancel();
}

#[tokio::test]
async fn other_decisions_are_ignored() {
    let mut running = start();
    running.harness.ingest_payload(&record(
        "codex.tool_decision",
        &[("decision", json!({"stringValue": "denied"}))],
    ));
    running.harness.ingest_payload(&record("codex.user_prompt", &[]));
    let event = next(&mut running.events).await;
    assert_eq!(event.payload, EventPayload::UserPrompt);
    running.cancel.cancel();
}

#[tokio::test]
async fn tool_result_success_flag() {
    let mut running = start();
    running.harness.ingest_payload(&record(
        "codex.tool_result",
        &[
            ("tool_name", json!({"stringValue": "shell"})),
            ("call_id", json!({"stringValue": "c-2"})),
            ("duration_ms", json!({"intValue": "87"})),
            ("success", json!({"stringValue": "true"})),
        ],
    ));
    let event = next(&mut running.events).await;
    assert_eq!(
        event.payload,
        EventPayload::ToolCompleted {
            tool_name: "shell".into(),
            call_id: Some("c-2".into()),
            duration_ms: Some(87),
            success: true,
        }
    );
    running.cancel.cancel();
}

#[test]
fn role_args_permission_mapping() {
    let harness = CodexHarness::new(None, &Tunables::fast());

    let mode = |mode: Option<&str>| {
        let cfg = CommandArgsConfig {
            permission_mode: mode.map(str::to_owned),
            ..Default::default()
        };
        harness.role_args(&cfg).join(" ")
    };

    assert!(mode(Some("confirm")).contains("--ask-for-approval untrusted"));
    assert!(mode(Some("auto-edit")).contains("--ask-for-approval on-request"));
    assert!(mode(Some("auto")).contains("--ask-for-approval never"));
    let plan = mode(Some("plan"));
    assert!(plan.contains("--ask-for-approval untrusted"));
    assert!(plan.contains("--sandbox read-only"));
    assert!(mode(None).contains("--full-auto"));
}

#[test]
fn instructions_are_json_escaped() {
    let harness = CodexHarness::new(None, &Tunables::fast());
    let cfg = CommandArgsConfig {
        instructions: Some("line one\n\"quoted\"".to_owned()),
        ..Default::default()
    };
    let args = harness.role_args(&cfg);
    assert_eq!(args[0], "-c");
    assert_eq!(args[1], "instructions=\"line one\\n\\\"quoted\\\"\"");
}

#[tokio::test]
async fn prepare_returns_single_otel_flag() -> anyhow::Result<()> {
    let harness = CodexHarness::new(None, &Tunables::fast());
    let plan = harness.prepare_for_launch("beta", None, false).await?;

    assert_eq!(plan.prepend_args.len(), 2);
    assert_eq!(plan.prepend_args[0], "-c");
    assert!(plan.prepend_args[1].starts_with("otel.trace_exporter={type=\"otlp-http\""));
    assert!(plan.prepend_args[1].contains("endpoint=\"http://127.0.0.1:"));
    assert!(plan.prepend_args[1].ends_with("protocol=\"json\"}"));
    // No environment injection for Codex.
    assert!(plan.env.is_empty());

    harness.stop().await;
    Ok(())
}
