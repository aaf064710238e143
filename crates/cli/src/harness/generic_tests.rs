// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Tunables;
use crate::event::{AgentEvent, EventPayload, State, SubState};

use super::GenericHarness;

async fn next(events: &mut mpsc::Receiver<AgentEvent>) -> AgentEvent {
    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(event)) => event,
        _ => unreachable!("expected an event"),
    }
}

#[tokio::test]
async fn output_and_silence_become_state_changes() -> anyhow::Result<()> {
    let harness = std::sync::Arc::new(GenericHarness::new(None, &Tunables::fast()));
    harness.prepare_for_launch("shelly", None, false)?;

    let (tx, mut events) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    {
        let harness = harness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = harness.start(cancel, tx).await;
        });
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    harness.handle_output();
    let event = next(&mut events).await;
    assert_eq!(
        event.payload,
        EventPayload::StateChange { state: State::Active, sub_state: SubState::None }
    );

    // Silence threshold elapses with no further output.
    let event = next(&mut events).await;
    assert_eq!(
        event.payload,
        EventPayload::StateChange { state: State::Idle, sub_state: SubState::None }
    );

    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn interrupt_forces_idle_immediately() -> anyhow::Result<()> {
    let harness = std::sync::Arc::new(GenericHarness::new(Some("bash".to_owned()), &Tunables::fast()));
    harness.prepare_for_launch("shelly", None, false)?;
    assert_eq!(harness.command(), "bash");

    let (tx, mut events) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    {
        let harness = harness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = harness.start(cancel, tx).await;
        });
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    harness.handle_output();
    let _active = next(&mut events).await;

    assert!(harness.handle_interrupt());
    let event = next(&mut events).await;
    assert_eq!(
        event.payload,
        EventPayload::StateChange { state: State::Idle, sub_state: SubState::None }
    );

    cancel.cancel();
    Ok(())
}

#[test]
fn interrupt_before_prepare_is_unhandled() {
    let harness = GenericHarness::new(None, &Tunables::fast());
    assert!(!harness.handle_interrupt());
}

#[tokio::test]
async fn session_id_passes_through_launch_plan() -> anyhow::Result<()> {
    let harness = GenericHarness::new(None, &Tunables::fast());
    let plan = harness.prepare_for_launch("shelly", Some("keep-me"), true)?;
    assert_eq!(plan.session_id.as_deref(), Some("keep-me"));
    assert!(plan.env.is_empty());
    assert!(plan.prepend_args.is_empty());
    Ok(())
}
