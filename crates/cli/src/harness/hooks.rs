// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook ingress for Claude Code sessions.
//!
//! The child's settings file registers shell hooks that copy each hook's
//! stdin JSON (which carries `hook_event_name`) as one line into a named
//! pipe at `$H2_HOOK_PIPE`. The receiver side reads those lines with
//! non-blocking I/O so shutdown never leaks a blocked thread.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use serde_json::json;
use tokio::io::unix::AsyncFd;

/// One shell command per hook: forward the hook's stdin JSON verbatim.
const FORWARD_COMMAND: &str =
    "input=$(cat); printf '%s\\n' \"$input\" > \"$H2_HOOK_PIPE\"";

/// Hooks the session subscribes to. `hook_event_name` in the forwarded
/// JSON distinguishes them, so they all share one command.
const HOOKED_EVENTS: [&str; 7] = [
    "SessionStart",
    "SessionEnd",
    "Stop",
    "UserPromptSubmit",
    "PreToolUse",
    "PostToolUse",
    "PreCompact",
];

/// Generate the Claude settings JSON wiring every subscribed hook to the
/// forward command.
pub fn generate_hook_settings() -> serde_json::Value {
    let mut hooks = serde_json::Map::new();
    for event in HOOKED_EVENTS {
        hooks.insert(
            event.to_owned(),
            json!([{
                "matcher": "",
                "hooks": [{"type": "command", "command": FORWARD_COMMAND}]
            }]),
        );
    }
    json!({ "hooks": hooks })
}

/// Write the hook settings file into the session directory.
pub fn write_hook_settings(session_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(session_dir)?;
    let path = session_dir.join("hook-settings.json");
    let contents = serde_json::to_string_pretty(&generate_hook_settings())?;
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// Newtype for the FIFO file descriptor, for use with [`AsyncFd`].
struct FifoFd(OwnedFd);

impl AsRawFd for FifoFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for FifoFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Receives hook JSON lines from a named pipe.
pub struct HookReceiver {
    pipe_path: PathBuf,
    async_fd: Option<AsyncFd<FifoFd>>,
    line_buf: Vec<u8>,
}

impl HookReceiver {
    /// Create the named pipe at `pipe_path` (replacing any stale one).
    pub fn new(pipe_path: &Path) -> anyhow::Result<Self> {
        if pipe_path.exists() {
            std::fs::remove_file(pipe_path)?;
        }
        nix::unistd::mkfifo(pipe_path, Mode::from_bits_truncate(0o600))?;
        Ok(Self {
            pipe_path: pipe_path.to_path_buf(),
            async_fd: None,
            line_buf: Vec::with_capacity(4096),
        })
    }

    pub fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    /// Read the next hook event: `(hook_event_name, full payload)`.
    ///
    /// Returns `None` on EOF or unrecoverable error. Malformed lines are
    /// skipped.
    pub async fn next_event(&mut self) -> Option<(String, serde_json::Value)> {
        self.ensure_fd().ok()?;

        loop {
            if let Some(event) = self.try_parse_line() {
                return Some(event);
            }

            let afd = self.async_fd.as_ref()?;
            let mut guard = match afd.readable().await {
                Ok(guard) => guard,
                Err(_) => return None,
            };
            let mut buf = [0u8; 4096];
            match guard.try_io(|inner| {
                nix::unistd::read(inner.get_ref(), &mut buf)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            }) {
                Ok(Ok(0)) => return None,
                Ok(Ok(n)) => self.line_buf.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => return None,
                Err(_would_block) => continue,
            }
        }
    }

    /// Pop the first parseable complete line from the buffer.
    fn try_parse_line(&mut self) -> Option<(String, serde_json::Value)> {
        loop {
            let pos = self.line_buf.iter().position(|&b| b == b'\n')?;
            let line = String::from_utf8_lossy(&self.line_buf[..pos]).to_string();
            self.line_buf.drain(..=pos);
            if let Some(event) = parse_hook_line(line.trim()) {
                return Some(event);
            }
            // Malformed line, try the next one.
        }
    }

    /// Open the pipe lazily with `O_RDWR | O_NONBLOCK`: `O_RDWR` avoids
    /// spurious EOF when the last hook writer closes; `O_NONBLOCK` keeps
    /// reads cancellable through [`AsyncFd`].
    fn ensure_fd(&mut self) -> anyhow::Result<()> {
        if self.async_fd.is_none() {
            let file =
                std::fs::OpenOptions::new().read(true).write(true).open(&self.pipe_path)?;
            crate::pty::nbio::set_nonblocking(&file)?;
            let owned: OwnedFd = file.into();
            self.async_fd = Some(AsyncFd::new(FifoFd(owned))?);
        }
        Ok(())
    }
}

impl Drop for HookReceiver {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.pipe_path);
    }
}

/// Parse one forwarded hook line into `(hook_event_name, payload)`.
fn parse_hook_line(line: &str) -> Option<(String, serde_json::Value)> {
    let payload: serde_json::Value = serde_json::from_str(line).ok()?;
    let name = payload
        .get("hook_event_name")
        .or_else(|| payload.get("event"))
        .and_then(|v| v.as_str())?
        .to_owned();
    Some((name, payload))
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
