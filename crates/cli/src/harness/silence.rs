// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Silence detector: idle-timer-based state estimation for agents with
//! no telemetry.
//!
//! Emits `Active` immediately when output is noted and `Idle` once the
//! idle threshold elapses with no further output. An interrupt forces an
//! immediate `Idle`. The timer is monotonic and re-arms safely when
//! output arrives before it fires.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Estimated activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    Active,
    Idle,
}

enum Ping {
    Output,
    Interrupt,
}

/// Handle used by the harness to feed observations in.
pub struct SilenceDetector {
    idle_after: Duration,
    ping_tx: mpsc::Sender<Ping>,
    ping_rx: parking_lot::Mutex<Option<mpsc::Receiver<Ping>>>,
}

impl SilenceDetector {
    pub fn new(idle_after: Duration) -> Self {
        let (ping_tx, ping_rx) = mpsc::channel(64);
        Self { idle_after, ping_tx, ping_rx: parking_lot::Mutex::new(Some(ping_rx)) }
    }

    /// Note that the child produced output.
    pub fn note_output(&self) {
        let _ = self.ping_tx.try_send(Ping::Output);
    }

    /// Note a local interrupt; forces an immediate idle update.
    pub fn note_interrupt(&self) {
        let _ = self.ping_tx.try_send(Ping::Interrupt);
    }

    /// Run the detector until cancellation, emitting deduplicated
    /// [`StateUpdate`]s. May be called once per detector.
    pub async fn run(&self, updates: mpsc::Sender<StateUpdate>, cancel: CancellationToken) {
        let Some(mut pings) = self.ping_rx.lock().take() else {
            return;
        };

        let mut last: Option<StateUpdate> = None;
        let mut deadline: Option<tokio::time::Instant> = None;

        let emit = |last: &mut Option<StateUpdate>, update: StateUpdate| {
            if *last == Some(update) {
                return true;
            }
            *last = Some(update);
            updates.try_send(update).is_ok()
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ping = pings.recv() => match ping {
                    Some(Ping::Output) => {
                        if !emit(&mut last, StateUpdate::Active) {
                            break;
                        }
                        deadline = Some(tokio::time::Instant::now() + self.idle_after);
                    }
                    Some(Ping::Interrupt) => {
                        if !emit(&mut last, StateUpdate::Idle) {
                            break;
                        }
                        deadline = None;
                    }
                    None => break,
                },
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if deadline.is_some() => {
                    if !emit(&mut last, StateUpdate::Idle) {
                        break;
                    }
                    deadline = None;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "silence_tests.rs"]
mod tests;
