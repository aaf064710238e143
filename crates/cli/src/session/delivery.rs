// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery loop and heartbeat: idle-gated, exactly-once message
//! delivery into the PTY.
//!
//! A popped message is delivered strictly after the agent becomes idle
//! *subsequent to* the pop. The body is written as a single paste; a
//! carriage return follows on a separate task after a short delay so the
//! agent sees paste-then-submit. On cancellation a popped-but-undelivered
//! message returns to the queue front; a write against a dead child
//! drops the message (operators requeue manually).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::event::State;

use super::{HeartbeatConfig, Session};

/// Run the delivery loop until the session is cancelled.
pub async fn delivery_loop(session: Arc<Session>) {
    let cancel = session.cancel_token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = session.queue().ready() => {}
        }
        let Some(message) = session.queue().pop_ready() else {
            continue;
        };

        // Gate on idle-and-unblocked against the *current* monitor,
        // re-subscribing when relaunch swaps it.
        let deliverable = loop {
            let monitor = session.current_monitor();
            let swapped = session.monitor_swapped().notified();
            tokio::select! {
                ok = monitor.wait_for_deliverable(&cancel) => break ok,
                _ = swapped => continue,
            }
        };
        if !deliverable {
            session.queue().requeue_front(message);
            return;
        }

        let Some(pty) = session.current_pty() else {
            session.queue().requeue_front(message);
            continue;
        };

        match pty.write(message.body.as_bytes()).await {
            Ok(_) => {
                let delay = session.tunables().carriage_return_delay;
                let submit_pty = Arc::clone(&pty);
                let submit = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = submit_pty.write(b"\r").await {
                        debug!("deferred carriage return failed: {e}");
                    }
                });
                session.notify_delivered(&message);
                // The next message must not land between this paste and
                // its submit.
                let _ = submit.await;
            }
            Err(e) if pty.child_exited() || pty.child_hung() => {
                warn!(
                    id = %message.id,
                    "dropping message addressed to a dead child: {e}"
                );
            }
            Err(e) => {
                warn!(id = %message.id, "delivery write failed, dropping message: {e}");
            }
        }
    }
}

/// Run the heartbeat nudge until the session is cancelled.
///
/// Fires once per continuous idle period: after the agent has been idle
/// for `idle_for`, the configured message is enqueued at low priority,
/// then the loop re-arms only after the agent leaves idle.
pub async fn heartbeat_loop(session: Arc<Session>, config: HeartbeatConfig) {
    if config.message.is_empty() || config.idle_for.is_zero() {
        return;
    }
    let cancel = session.cancel_token();

    loop {
        let monitor = session.current_monitor();
        let swapped = session.monitor_swapped().notified();
        tokio::select! {
            reached = monitor.wait_for_state(State::Idle, &cancel) => {
                if !reached {
                    return;
                }
            }
            _ = swapped => continue,
        }

        tokio::select! {
            _ = tokio::time::sleep(config.idle_for) => {
                if condition_holds(&config) {
                    debug!(message = %config.message, "heartbeat nudge");
                    let _ = session.enqueue("heartbeat", Some("low"), &config.message);
                }
                // One nudge per idle period: wait out the current one.
                let monitor = session.current_monitor();
                if !monitor.wait_for_departure(State::Idle, &cancel).await {
                    return;
                }
            }
            departed = monitor.wait_for_departure(State::Idle, &cancel) => {
                if !departed {
                    return;
                }
            }
        }
    }
}

/// Evaluate the heartbeat gate. The expression is opaque at this layer
/// and treated as an always-true predicate.
fn condition_holds(config: &HeartbeatConfig) -> bool {
    if let Some(ref expr) = config.condition {
        debug!(condition = %expr, "heartbeat condition treated as true");
    }
    true
}

/// Periodic status/screen refresh for attached viewers.
pub async fn status_tick_loop(session: Arc<Session>) {
    let cancel = session.cancel_token();
    let mut tick = tokio::time::interval(session.tunables().status_tick_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {}
        }
        session.notify_viewers_state();
        if let Some(pty) = session.current_pty() {
            let snapshot = pty
                .with_screen(|screen| {
                    if screen.changed() {
                        screen.clear_changed();
                        Some(screen.snapshot())
                    } else {
                        None
                    }
                })
                .await;
            if let Some(snapshot) = snapshot {
                session.notify_viewers_screen(&snapshot);
            }
        }
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
