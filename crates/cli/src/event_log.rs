// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed append-only event log.
//!
//! Every [`AgentEvent`](crate::event::AgentEvent) the monitor processes is
//! appended as one JSON line to `events.jsonl` in the session directory.
//! The log is best-effort: append failures are logged and swallowed so a
//! full disk never takes the session down. Readers tolerate a torn
//! trailing line (a crash mid-append leaves at most one).

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::event::AgentEvent;

/// Append-only writer for the session event log.
///
/// `None` destination (tests, ephemeral sessions) turns every append into
/// a no-op.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Option<PathBuf>,
}

impl EventWriter {
    /// Create a writer for `events.jsonl` inside `session_dir`, creating
    /// the directory if needed (best-effort).
    pub fn new(session_dir: Option<&Path>) -> Self {
        let path = session_dir.map(|dir| {
            let _ = std::fs::create_dir_all(dir);
            dir.join("events.jsonl")
        });
        Self { path }
    }

    /// A writer that discards everything.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Path of the log file, if writing is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one event as a JSON line.
    pub fn append(&self, event: &AgentEvent) {
        let Some(ref path) = self.path else {
            return;
        };
        let Ok(mut line) = serde_json::to_string(event) else {
            return;
        };
        line.push('\n');
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) else {
            tracing::warn!("failed to open event log at {}", path.display());
            return;
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!("event log append failed: {e}");
        }
    }
}

/// Read all events from a log file, skipping unparseable lines.
///
/// A partial trailing line (no terminating newline yet, or torn mid-write)
/// simply fails to parse and is skipped; earlier lines are unaffected.
pub fn read_events(path: &Path) -> Vec<AgentEvent> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return vec![];
    };
    contents.lines().filter_map(|line| serde_json::from_str::<AgentEvent>(line).ok()).collect()
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
