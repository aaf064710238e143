// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::test_support::{FakeAgent, ScopedH2Dir};

use super::{run_send, run_status, run_stop, NameArgs, SendArgs};

#[tokio::test]
#[serial_test::serial]
async fn send_verb_round_trips() -> anyhow::Result<()> {
    let _dir = ScopedH2Dir::new()?;
    let agent = FakeAgent::spawn("alpha", "idle").await?;

    let args = SendArgs {
        name: "alpha".to_owned(),
        body: "from the cli".to_owned(),
        priority: "high".to_owned(),
        from: "cli".to_owned(),
    };
    assert_eq!(run_send(&args).await, 0);
    assert_eq!(agent.received_bodies(), ["from the cli"]);
    let recorded = &agent.requests.lock()[0];
    assert_eq!(recorded.priority.as_deref(), Some("high"));
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn status_and_stop_verbs_succeed_against_live_agent() -> anyhow::Result<()> {
    let _dir = ScopedH2Dir::new()?;
    let _agent = FakeAgent::spawn("alpha", "active").await?;

    let name = NameArgs { name: "alpha".to_owned() };
    assert_eq!(run_status(&name).await, 0);
    assert_eq!(run_stop(&name).await, 0);
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn verbs_fail_cleanly_when_agent_is_missing() -> anyhow::Result<()> {
    let _dir = ScopedH2Dir::new()?;
    let name = NameArgs { name: "ghost".to_owned() };
    assert_eq!(run_status(&name).await, 1);
    assert_eq!(run_stop(&name).await, 1);

    let send = SendArgs {
        name: "ghost".to_owned(),
        body: "nobody home".to_owned(),
        priority: "normal".to_owned(),
        from: "cli".to_owned(),
    };
    assert_eq!(run_send(&send).await, 1);
    Ok(())
}
