// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic harness for arbitrary shells and agents without telemetry.
//!
//! State estimation falls back to the silence detector: any PTY output
//! means active, sustained quiet means idle, and a local interrupt
//! forces idle immediately.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Tunables;
use crate::event::{AgentEvent, State, SubState};

use super::silence::{SilenceDetector, StateUpdate};
use super::{EventSink, LaunchPlan};

pub struct GenericHarness {
    command: String,
    idle_after: std::time::Duration,
    sink: EventSink,
    intake: parking_lot::Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    detector: parking_lot::RwLock<Option<Arc<SilenceDetector>>>,
}

impl GenericHarness {
    pub fn new(command_override: Option<String>, tunables: &Tunables) -> Self {
        let (sink, intake) = EventSink::channel();
        Self {
            command: command_override.unwrap_or_else(|| "sh".to_owned()),
            idle_after: tunables.silence_idle_after,
            sink,
            intake: parking_lot::Mutex::new(Some(intake)),
            detector: parking_lot::RwLock::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn display_command(&self) -> String {
        self.command.clone()
    }

    /// No launch-time resources beyond the silence detector.
    pub fn prepare_for_launch(
        &self,
        _agent_name: &str,
        session_id: Option<&str>,
        _dry_run: bool,
    ) -> anyhow::Result<LaunchPlan> {
        *self.detector.write() = Some(Arc::new(SilenceDetector::new(self.idle_after)));
        Ok(LaunchPlan { session_id: session_id.map(str::to_owned), ..Default::default() })
    }

    /// Bridge silence-detector updates into state-change events and
    /// forward them until cancellation.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let Some(mut intake) = self.intake.lock().take() else {
            anyhow::bail!("harness already started");
        };
        let detector = self.detector.read().clone();

        if let Some(detector) = detector {
            let (updates_tx, mut updates_rx) = mpsc::channel::<StateUpdate>(16);
            let sink = self.sink.clone();
            let bridge_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = bridge_cancel.cancelled() => break,
                        update = updates_rx.recv() => match update {
                            Some(StateUpdate::Active) => {
                                sink.emit_state(State::Active, SubState::None);
                            }
                            Some(StateUpdate::Idle) => {
                                sink.emit_state(State::Idle, SubState::None);
                            }
                            None => break,
                        },
                    }
                }
            });

            let run_cancel = cancel.clone();
            tokio::spawn(async move { detector.run(updates_tx, run_cancel).await });
        }

        super::forward_events(&mut intake, &events, &cancel).await;
        Ok(())
    }

    pub fn handle_output(&self) {
        if let Some(detector) = self.detector.read().as_ref() {
            detector.note_output();
        }
    }

    /// A local Ctrl+C means the user took over: report idle right away.
    pub fn handle_interrupt(&self) -> bool {
        match self.detector.read().as_ref() {
            Some(detector) => {
                detector.note_interrupt();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "generic_tests.rs"]
mod tests;
