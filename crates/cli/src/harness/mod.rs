// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness layer: per-vendor adapters that launch an agent, parse its
//! telemetry, and translate vendor hooks into the normalized event
//! stream.
//!
//! Behavior differences live in the [`Harness`] sum type, not an
//! inheritance chain. The registry is a static table seeded at compile
//! time; resolution of an unknown name is a typed error.

pub mod claude;
pub mod codex;
pub mod generic;
pub mod hooks;
pub mod silence;
pub mod tailer;

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Tunables;
use crate::event::{AgentEvent, EventPayload, State, SubState};
use crate::monitor::EVENT_CHANNEL_CAPACITY;

pub use claude::ClaudeHarness;
pub use codex::CodexHarness;
pub use generic::GenericHarness;

/// The known harness types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessKind {
    Claude,
    Codex,
    Generic,
}

impl HarnessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude_code",
            Self::Codex => "codex",
            Self::Generic => "generic",
        }
    }
}

/// Name registry: canonical name plus aliases for each kind.
const REGISTRY: [(&str, &[&str], HarnessKind); 3] = [
    ("claude_code", &["claude"], HarnessKind::Claude),
    ("codex", &[], HarnessKind::Codex),
    ("generic", &["shell"], HarnessKind::Generic),
];

/// Resolve a harness type name or alias.
pub fn resolve(name: &str) -> anyhow::Result<HarnessKind> {
    for (canonical, aliases, kind) in REGISTRY {
        if name == canonical || aliases.contains(&name) {
            return Ok(kind);
        }
    }
    anyhow::bail!("unknown harness type: {name}")
}

/// Resolve a kind from role + command, the `run` verb's resolution rule:
/// an explicit harness name wins, then a role whose name is a registered
/// harness, then a command whose basename is one, then generic.
pub fn resolve_for(
    harness: Option<&str>,
    role: Option<&str>,
    command: Option<&str>,
) -> anyhow::Result<HarnessKind> {
    if let Some(name) = harness {
        return resolve(name);
    }
    if let Some(role) = role {
        if let Ok(kind) = resolve(role) {
            return Ok(kind);
        }
    }
    if let Some(command) = command {
        let base = Path::new(command)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(command);
        if let Ok(kind) = resolve(base) {
            return Ok(kind);
        }
    }
    Ok(HarnessKind::Generic)
}

/// Generic launch configuration mapped to vendor flags by each harness.
#[derive(Debug, Clone, Default)]
pub struct CommandArgsConfig {
    pub instructions: Option<String>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub additional_dirs: Vec<PathBuf>,
}

/// Result of `prepare_for_launch`: what the session must merge into the
/// child's environment and argv.
#[derive(Debug, Clone, Default)]
pub struct LaunchPlan {
    pub env: Vec<(String, String)>,
    pub prepend_args: Vec<String>,
    pub session_id: Option<String>,
}

/// Emitter for normalized events into the harness's internal channel.
///
/// The channel is sized so overflow indicates a stalled monitor, which
/// is a bug; overflowing events are dropped with a warning rather than
/// blocking telemetry callbacks.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, payload: EventPayload) {
        if let Err(e) = self.tx.try_send(AgentEvent::now(payload)) {
            warn!("event channel overflow, dropping event: {e}");
        }
    }

    pub(crate) fn emit_state(&self, state: State, sub_state: SubState) {
        self.emit(EventPayload::StateChange { state, sub_state });
    }
}

/// Forward the harness's internal events to the session's external
/// channel until cancellation, then drain whatever is already buffered.
pub(crate) async fn forward_events(
    intake: &mut mpsc::Receiver<AgentEvent>,
    out: &mpsc::Sender<AgentEvent>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = intake.recv() => match event {
                Some(event) => {
                    if out.send(event).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
        }
    }
    // Drain in-flight events so adjacent pairs are never half-delivered.
    while let Ok(event) = intake.try_recv() {
        if out.try_send(event).is_err() {
            break;
        }
    }
}

/// A supervised agent's vendor adapter.
pub enum Harness {
    Claude(ClaudeHarness),
    Codex(CodexHarness),
    Generic(GenericHarness),
}

impl Harness {
    /// Build a harness of the given kind.
    pub fn build(
        kind: HarnessKind,
        command_override: Option<String>,
        tunables: &Tunables,
    ) -> Self {
        match kind {
            HarnessKind::Claude => Self::Claude(ClaudeHarness::new(command_override, tunables)),
            HarnessKind::Codex => Self::Codex(CodexHarness::new(command_override, tunables)),
            HarnessKind::Generic => Self::Generic(GenericHarness::new(command_override, tunables)),
        }
    }

    pub fn kind(&self) -> HarnessKind {
        match self {
            Self::Claude(_) => HarnessKind::Claude,
            Self::Codex(_) => HarnessKind::Codex,
            Self::Generic(_) => HarnessKind::Generic,
        }
    }

    /// Registry name of this harness.
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// The command (argv0) this harness launches.
    pub fn command(&self) -> &str {
        match self {
            Self::Claude(h) => h.command(),
            Self::Codex(h) => h.command(),
            Self::Generic(h) => h.command(),
        }
    }

    /// Human-readable command line for banners and logs.
    pub fn display_command(&self) -> String {
        match self {
            Self::Claude(h) => h.display_command(),
            Self::Codex(h) => h.display_command(),
            Self::Generic(h) => h.display_command(),
        }
    }

    /// Compose the full child argv (after argv0):
    /// `prepend_args ++ extra_args ++ role_args`.
    pub fn build_command_args(
        &self,
        cfg: &CommandArgsConfig,
        prepend_args: &[String],
        extra_args: &[String],
    ) -> Vec<String> {
        let mut args = Vec::new();
        args.extend_from_slice(prepend_args);
        args.extend_from_slice(extra_args);
        match self {
            Self::Claude(h) => args.extend(h.role_args(cfg)),
            Self::Codex(h) => args.extend(h.role_args(cfg)),
            Self::Generic(_) => {}
        }
        args
    }

    /// Vendor environment derived from the H2 config root.
    pub fn build_command_env(&self, h2_dir: &Path) -> Vec<(String, String)> {
        match self {
            Self::Claude(h) => h.build_command_env(h2_dir),
            Self::Codex(_) | Self::Generic(_) => vec![],
        }
    }

    /// Create the vendor config directory under the H2 root.
    pub fn ensure_config_dir(&self, h2_dir: &Path) -> anyhow::Result<()> {
        match self {
            Self::Claude(h) => h.ensure_config_dir(h2_dir),
            Self::Codex(_) | Self::Generic(_) => Ok(()),
        }
    }

    /// Allocate launch-time resources (session id, telemetry receiver)
    /// and return what the session must merge into the child invocation.
    pub async fn prepare_for_launch(
        &self,
        agent_name: &str,
        session_id: Option<&str>,
        dry_run: bool,
    ) -> anyhow::Result<LaunchPlan> {
        match self {
            Self::Claude(h) => h.prepare_for_launch(agent_name, session_id, dry_run).await,
            Self::Codex(h) => h.prepare_for_launch(agent_name, session_id, dry_run).await,
            Self::Generic(h) => h.prepare_for_launch(agent_name, session_id, dry_run),
        }
    }

    /// Run the harness, forwarding normalized events to `events` until
    /// `cancel` fires. Blocks for the harness's lifetime.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        match self {
            Self::Claude(h) => h.start(cancel, events).await,
            Self::Codex(h) => h.start(cancel, events).await,
            Self::Generic(h) => h.start(cancel, events).await,
        }
    }

    /// Translate a vendor hook into events. Returns whether the hook was
    /// recognized.
    pub fn handle_hook_event(&self, name: &str, payload: &serde_json::Value) -> bool {
        match self {
            Self::Claude(h) => h.handle_hook_event(name, payload),
            Self::Codex(_) => false,
            Self::Generic(_) => false,
        }
    }

    /// Local Ctrl+C observed by the viewer. Returns whether the harness
    /// acted on it.
    pub fn handle_interrupt(&self) -> bool {
        match self {
            Self::Claude(h) => h.handle_interrupt(),
            Self::Codex(_) => false,
            Self::Generic(h) => h.handle_interrupt(),
        }
    }

    /// Called by the PTY read pump for every output chunk.
    pub fn handle_output(&self) {
        if let Self::Generic(h) = self {
            h.handle_output();
        }
    }

    /// Release launch-time resources (telemetry receiver, timers).
    pub async fn stop(&self) {
        match self {
            Self::Claude(h) => h.stop().await,
            Self::Codex(h) => h.stop().await,
            Self::Generic(_) => {}
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
