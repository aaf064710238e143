// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-log tailer: incrementally reads newline-terminated JSONL
//! records from a vendor transcript file.
//!
//! The file usually does not exist yet when the session starts; the
//! tailer polls (with a `notify` wake for responsiveness) until it
//! appears, and keeps watching after that since the agent may recreate
//! it. A partial
//! trailing line is left unconsumed until its newline arrives.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct SessionLogTailer {
    path: PathBuf,
    offset: u64,
    poll_interval: Duration,
}

impl SessionLogTailer {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self { path, offset: 0, poll_interval }
    }

    /// Current byte offset into the log file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read new complete lines appended since the last read.
    ///
    /// Lines without a terminating newline are left for the next read.
    /// A missing file yields no lines; a file that shrank below the
    /// tracked offset (truncation) resets to the beginning.
    pub fn read_new_lines(&mut self) -> anyhow::Result<Vec<String>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        if let Ok(meta) = file.metadata() {
            if meta.len() < self.offset {
                self.offset = 0;
            }
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;

        let mut lines = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Partial trailing line: wait for the newline.
                break;
            }
            self.offset += bytes_read as u64;
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_owned());
            }
        }

        Ok(lines)
    }

    /// Watch the file, sending batches of new lines to `line_tx` until
    /// cancellation or the receiver closes.
    pub async fn run(mut self, line_tx: mpsc::Sender<Vec<String>>, cancel: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);

        let mut poll = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }

            match self.read_new_lines() {
                Ok(lines) if !lines.is_empty() => {
                    if line_tx.send(lines).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("tailer read failed: {e}"),
            }
        }
    }

    /// Watch the parent directory so file creation is also detected.
    /// Returns the watcher handle (must stay alive).
    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;

        let watch_path = self.path.parent().unwrap_or(self.path.as_ref());
        watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;

        Some(watcher)
    }
}

#[cfg(test)]
#[path = "tailer_tests.rs"]
mod tests;
