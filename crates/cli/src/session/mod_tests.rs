// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Tunables;
use crate::event::{AgentEvent, EventPayload, State, SubState};
use crate::viewer::ViewerCallbacks;

use super::{Session, SessionSpec};

fn session() -> Arc<Session> {
    Session::new(SessionSpec::minimal("alpha", "cat"), Tunables::fast())
}

#[test]
fn enqueue_defaults_to_normal_priority() -> anyhow::Result<()> {
    let session = session();
    session.enqueue("tester", None, "hello")?;
    session.enqueue("tester", Some(""), "also normal")?;
    session.enqueue("tester", Some("critical"), "urgent")?;

    // Critical pops first despite being enqueued last.
    let first = session.queue().pop_ready().map(|m| m.body);
    assert_eq!(first.as_deref(), Some("urgent"));
    Ok(())
}

#[test]
fn enqueue_rejects_unknown_priority() {
    let session = session();
    assert!(session.enqueue("tester", Some("blocker"), "x").is_err());
}

#[test]
fn passthrough_take_pauses_and_release_unpauses() -> anyhow::Result<()> {
    let session = session();
    let viewer = session.register_viewer(ViewerCallbacks::default());

    session.take_passthrough(viewer)?;
    assert_eq!(session.passthrough_owner(), Some(viewer));
    assert_eq!(session.queue().pending_count().1, true, "take must pause");

    session.release_passthrough(viewer)?;
    assert_eq!(session.passthrough_owner(), None);
    assert_eq!(session.queue().pending_count().1, false, "release must unpause");
    Ok(())
}

#[test]
fn passthrough_is_exclusive() -> anyhow::Result<()> {
    let session = session();
    let first = session.register_viewer(ViewerCallbacks::default());
    let second = session.register_viewer(ViewerCallbacks::default());

    session.take_passthrough(first)?;
    assert!(session.take_passthrough(second).is_err());
    // Re-take by the owner is fine.
    session.take_passthrough(first)?;

    assert!(session.release_passthrough(second).is_err());
    session.release_passthrough(first)?;
    assert!(session.release_passthrough(first).is_err(), "double release");
    Ok(())
}

#[test]
fn unregister_releases_held_passthrough() -> anyhow::Result<()> {
    let session = session();
    let viewer = session.register_viewer(ViewerCallbacks::default());
    session.take_passthrough(viewer)?;

    session.unregister_viewer(viewer);
    assert_eq!(session.passthrough_owner(), None);
    assert_eq!(session.queue().pending_count().1, false);
    Ok(())
}

#[test]
fn agent_info_reflects_monitor_and_queue() -> anyhow::Result<()> {
    let session = session();
    let monitor = session.current_monitor();
    monitor.process_event(&AgentEvent::now(EventPayload::SessionStarted {
        thread_id: "t1".into(),
        model: "m1".into(),
    }));
    monitor.process_event(&AgentEvent::state_change(State::Active, SubState::ToolUse));
    session.enqueue("tester", None, "queued")?;

    let info = session.agent_info();
    assert_eq!(info.name, "alpha");
    assert_eq!(info.state, "active");
    assert_eq!(info.sub_state, "tool_use");
    assert_eq!(info.thread_id.as_deref(), Some("t1"));
    assert_eq!(info.model.as_deref(), Some("m1"));
    assert_eq!(info.message_queue_pending, 1);
    Ok(())
}

#[test]
fn viewers_receive_state_notifications() {
    let session = session();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.register_viewer(ViewerCallbacks {
        on_state: Some(Arc::new(move |info| sink.lock().push(info.state.clone()))),
        ..Default::default()
    });

    session.notify_viewers_state();
    assert_eq!(seen.lock().as_slice(), ["initialized"]);
}

#[test]
fn install_monitor_resets_lifecycle_view() {
    let session = session();
    session
        .current_monitor()
        .process_event(&AgentEvent::now(EventPayload::SessionEnded));
    assert!(session.is_exited());

    let seeded = crate::monitor::Monitor::with_metrics(session.current_monitor().metrics());
    session.install_monitor(Arc::new(seeded));
    assert!(!session.is_exited());
}
