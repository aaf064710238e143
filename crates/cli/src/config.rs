// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Timeouts and intervals, injected everywhere so tests can shrink them.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Deadline for a PTY write before the child is declared hung.
    pub pty_write_timeout: Duration,
    /// Delay between a delivered message body and its carriage return.
    pub carriage_return_delay: Duration,
    /// Codex completion-to-idle debounce.
    pub codex_idle_debounce: Duration,
    /// Bridge typing-indicator tick.
    pub typing_tick_interval: Duration,
    /// Unix-socket dial deadline for probes and routing.
    pub dial_timeout: Duration,
    /// Whitelisted shell exec deadline.
    pub exec_timeout: Duration,
    /// Grace between SIGHUP and SIGKILL on shutdown.
    pub shutdown_grace: Duration,
    /// Periodic status refresh for attached viewers.
    pub status_tick_interval: Duration,
    /// Generic-harness silence threshold before reporting idle.
    pub silence_idle_after: Duration,
    /// Session-log tailer polling fallback.
    pub tailer_poll_interval: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            pty_write_timeout: Duration::from_secs(3),
            carriage_return_delay: Duration::from_millis(50),
            codex_idle_debounce: Duration::from_millis(200),
            typing_tick_interval: Duration::from_secs(4),
            dial_timeout: Duration::from_secs(2),
            exec_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            status_tick_interval: Duration::from_secs(1),
            silence_idle_after: Duration::from_secs(2),
            tailer_poll_interval: Duration::from_secs(1),
        }
    }
}

impl Tunables {
    /// Fast variant for tests: everything sub-second.
    pub fn fast() -> Self {
        Self {
            pty_write_timeout: Duration::from_millis(500),
            carriage_return_delay: Duration::from_millis(10),
            codex_idle_debounce: Duration::from_millis(20),
            typing_tick_interval: Duration::from_millis(50),
            dial_timeout: Duration::from_millis(500),
            exec_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(200),
            status_tick_interval: Duration::from_millis(50),
            silence_idle_after: Duration::from_millis(30),
            tailer_poll_interval: Duration::from_millis(20),
        }
    }
}

/// H2 configuration root: `$H2_DIR`, defaulting to `~/.h2`.
pub fn h2_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("H2_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_default();
    PathBuf::from(home).join(".h2")
}

/// Per-session artifact directory (event log, harness config).
pub fn session_dir(name: &str) -> PathBuf {
    h2_dir().join("sessions").join(name)
}

/// Configuration for the `run` verb: one supervised agent session.
#[derive(Debug, Clone, Parser)]
pub struct RunConfig {
    /// Session name; also names the agent socket.
    #[arg(env = "H2_ACTOR")]
    pub name: String,

    /// Role name (maps to a harness type unless --harness is given).
    #[arg(long, env = "H2_ROLE")]
    pub role: Option<String>,

    /// Harness type: claude_code | claude | codex | generic | shell.
    #[arg(long)]
    pub harness: Option<String>,

    /// Command override (defaults to the harness's own command).
    #[arg(long)]
    pub command: Option<String>,

    /// Reuse a vendor session UUID instead of generating one.
    #[arg(long)]
    pub session_id: Option<String>,

    /// Instructions text passed to the agent (harness-specific mapping).
    #[arg(long)]
    pub instructions: Option<String>,

    /// System prompt override.
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Text appended to the default system prompt.
    #[arg(long)]
    pub append_system_prompt: Option<String>,

    /// Model name forwarded to the agent.
    #[arg(long)]
    pub model: Option<String>,

    /// Permission/approval policy (confirm, auto-edit, auto, plan, ...).
    #[arg(long)]
    pub permission_mode: Option<String>,

    /// Tool allowlist entries (repeatable).
    #[arg(long = "allow-tool")]
    pub allowed_tools: Vec<String>,

    /// Tool denylist entries (repeatable).
    #[arg(long = "deny-tool")]
    pub disallowed_tools: Vec<String>,

    /// Additional directories the agent may access (repeatable).
    #[arg(long = "add-dir")]
    pub additional_dirs: Vec<PathBuf>,

    /// Extra KEY=VALUE environment for the child (repeatable).
    #[arg(long = "env")]
    pub extra_env: Vec<String>,

    /// Run headless at the default terminal size.
    #[arg(long)]
    pub daemon: bool,

    /// Virtual terminal columns.
    #[arg(long, default_value = "200")]
    pub cols: u16,

    /// Virtual terminal rows.
    #[arg(long, default_value = "50")]
    pub rows: u16,

    /// Kernel terminal rows for the child (defaults to --rows).
    #[arg(long)]
    pub child_rows: Option<u16>,

    /// Idle seconds before the heartbeat nudge fires (0 = disabled).
    #[arg(long, default_value = "0")]
    pub heartbeat_idle: u64,

    /// Message the heartbeat enqueues at low priority.
    #[arg(long)]
    pub heartbeat_message: Option<String>,

    /// Opaque condition gating the heartbeat (treated as always true).
    #[arg(long)]
    pub heartbeat_condition: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "H2_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "H2_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Extra args forwarded to the agent command (after --).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra_args: Vec<String>,
}

impl RunConfig {
    /// Parse `--env KEY=VALUE` pairs.
    pub fn env_pairs(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut pairs = Vec::with_capacity(self.extra_env.len());
        for entry in &self.extra_env {
            match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    pairs.push((key.to_owned(), value.to_owned()));
                }
                _ => anyhow::bail!("invalid --env entry (want KEY=VALUE): {entry}"),
            }
        }
        Ok(pairs)
    }

    pub fn child_rows(&self) -> u16 {
        self.child_rows.unwrap_or(self.rows)
    }
}

/// Initialize tracing/logging. Uses `try_init` so it's safe to call
/// multiple times (e.g. from tests).
pub fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    // Priority: --log-level / H2_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("H2_LOG_LEVEL").is_err() && log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match log_format {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
