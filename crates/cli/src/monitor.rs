// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-driven monitor: consumes the normalized event stream from a
//! harness and derives `(state, sub_state)` plus accumulated metrics.
//!
//! Events are processed strictly in arrival order. The top-level state is
//! mirrored into a watch channel so callers can wait for a target state
//! without polling; sub-state-only transitions deliberately do not wake
//! watchers. `Exited` is sticky: a fresh monitor (relaunch) is the only
//! way back.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::{AgentEvent, AgentState, EventPayload, State, SubState};
use crate::event_log::EventWriter;

/// Capacity of the event intake channel. Harnesses emit adjacent event
/// pairs (e.g. tool_started + state_change); overflow here is a bug, not
/// an expected condition.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Accumulated per-child-lifetime counters. Monotonic while one child
/// lives; relaunch seeds the next monitor with the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_cost_usd: f64,
    pub turn_count: u64,
    pub user_prompt_count: u64,
    pub tool_counts: HashMap<String, u64>,
}

/// Vendor identity reported by `session_started`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub thread_id: Option<String>,
    pub model: Option<String>,
    pub last_tool: Option<String>,
}

struct MonitorState {
    agent: AgentState,
    metrics: MetricsSnapshot,
    identity: AgentIdentity,
}

/// Derived-state accumulator for one child lifetime.
pub struct Monitor {
    state: RwLock<MonitorState>,
    state_tx: watch::Sender<State>,
    /// Notified after every processed event, including sub-state-only
    /// transitions that skip the watch channel.
    event_tick: Notify,
    writer: RwLock<EventWriter>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self::with_metrics(MetricsSnapshot::default())
    }

    /// Build a monitor pre-seeded with metrics, used on relaunch so
    /// counters stay cumulative across child lifetimes.
    pub fn with_metrics(metrics: MetricsSnapshot) -> Self {
        let (state_tx, _) = watch::channel(State::Initialized);
        Self {
            state: RwLock::new(MonitorState {
                agent: AgentState::initialized(),
                metrics,
                identity: AgentIdentity::default(),
            }),
            state_tx,
            event_tick: Notify::new(),
            writer: RwLock::new(EventWriter::disabled()),
        }
    }

    /// Install the append-only event writer. Must be called before
    /// [`run`](Self::run) so no event misses the log.
    pub fn set_writer(&self, writer: EventWriter) {
        *self.writer.write() = writer;
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<AgentEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.process_event(&event),
                    None => break,
                },
            }
        }
    }

    /// Apply a single event: log it, then fold it into derived state.
    pub fn process_event(&self, event: &AgentEvent) {
        self.writer.read().append(event);

        match &event.payload {
            EventPayload::SessionStarted { thread_id, model } => {
                let mut state = self.state.write();
                state.identity.thread_id = Some(thread_id.clone());
                state.identity.model = Some(model.clone());
            }
            EventPayload::UserPrompt => {
                self.state.write().metrics.user_prompt_count += 1;
            }
            EventPayload::TurnCompleted { input_tokens, output_tokens, cached_tokens, cost_usd } => {
                let mut state = self.state.write();
                state.metrics.input_tokens += input_tokens;
                state.metrics.output_tokens += output_tokens;
                state.metrics.cached_tokens += cached_tokens;
                state.metrics.total_cost_usd += cost_usd;
                state.metrics.turn_count += 1;
                // Never touches the state channel.
            }
            EventPayload::ToolStarted { tool_name, .. } => {
                self.state.write().identity.last_tool = Some(tool_name.clone());
            }
            EventPayload::ToolCompleted { tool_name, .. } => {
                let mut state = self.state.write();
                *state.metrics.tool_counts.entry(tool_name.clone()).or_insert(0) += 1;
                state.identity.last_tool = Some(tool_name.clone());
            }
            EventPayload::ApprovalRequested { .. } => {
                // No counter; the harness emits the accompanying
                // state_change to (active, waiting_for_permission).
            }
            EventPayload::AgentMessage { .. } => {
                // Surfaced verbatim through the writer above.
            }
            EventPayload::StateChange { state, sub_state } => {
                self.transition(AgentState { state: *state, sub_state: *sub_state });
            }
            EventPayload::SessionEnded => {
                self.force_exited();
            }
        }

        self.event_tick.notify_waiters();
    }

    fn transition(&self, next: AgentState) {
        let top_changed = {
            let mut state = self.state.write();
            if state.agent.state == State::Exited {
                debug!(next = next.state.as_str(), "ignoring transition after exit");
                return;
            }
            let changed = state.agent.state != next.state;
            state.agent = next;
            changed
        };
        if top_changed {
            self.state_tx.send_replace(next.state);
        }
    }

    fn force_exited(&self) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.agent.state != State::Exited;
            state.agent = AgentState::exited();
            changed
        };
        if changed {
            self.state_tx.send_replace(State::Exited);
        }
    }

    /// Current `(state, sub_state)` pair.
    pub fn agent_state(&self) -> AgentState {
        self.state.read().agent
    }

    /// Isolated copy of the accumulated metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.read().metrics.clone()
    }

    /// Reported thread id / model / last tool.
    pub fn identity(&self) -> AgentIdentity {
        self.state.read().identity.clone()
    }

    /// Wait until the top-level state equals `target`.
    ///
    /// Returns `true` on reaching the target, `false` on cancellation.
    /// The current value is re-read on every iteration so a transition
    /// that lands between wakeups is never missed.
    pub async fn wait_for_state(&self, target: State, cancel: &CancellationToken) -> bool {
        let mut rx = self.state_tx.subscribe();
        loop {
            if *rx.borrow_and_update() == target {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait until the top-level state is anything but `from`.
    ///
    /// Returns `true` once departed, `false` on cancellation.
    pub async fn wait_for_departure(&self, from: State, cancel: &CancellationToken) -> bool {
        let mut rx = self.state_tx.subscribe();
        loop {
            if *rx.borrow_and_update() != from {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait until the agent is idle and not waiting for permission:
    /// the delivery gate. Returns `false` on cancellation.
    pub async fn wait_for_deliverable(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.state_tx.subscribe();
        loop {
            // Register for the tick before reading state so an event
            // landing in between cannot be missed.
            let tick = self.event_tick.notified();
            {
                let state = self.state.read();
                if state.agent.state == State::Idle
                    && state.agent.sub_state != SubState::WaitingForPermission
                {
                    return true;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = tick => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
