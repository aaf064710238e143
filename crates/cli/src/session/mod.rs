// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session: the per-agent runtime binding queue, PTY host, harness, and
//! monitor into one supervised child, with the unix-socket RPC surface
//! and relaunch support.

pub mod delivery;
pub mod rpc;
pub mod run;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Tunables;
use crate::event::State;
use crate::harness::{CommandArgsConfig, Harness, HarnessKind};
use crate::monitor::Monitor;
use crate::pty::PtyHost;
use crate::queue::{Message, MessageQueue, Priority};
use crate::socket::AgentInfo;
use crate::viewer::{ViewerCallbacks, ViewerEntry, ViewerId};

/// Heartbeat nudge: enqueue `message` at low priority once the agent has
/// been continuously idle for `idle_for`.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub idle_for: Duration,
    pub message: String,
    /// Opaque gating expression; treated as an always-true predicate.
    pub condition: Option<String>,
}

/// Everything needed to construct a session, resolved by the CLI layer.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub name: String,
    pub harness_kind: HarnessKind,
    pub command_override: Option<String>,
    pub extra_args: Vec<String>,
    pub session_id: Option<String>,
    pub role_name: Option<String>,
    pub args_config: CommandArgsConfig,
    pub extra_env: Vec<(String, String)>,
    pub heartbeat: Option<HeartbeatConfig>,
    pub rows: u16,
    pub cols: u16,
    pub child_rows: u16,
}

impl SessionSpec {
    /// Resolve a spec from the `run` verb's configuration.
    pub fn from_run_config(config: &crate::config::RunConfig) -> anyhow::Result<Self> {
        let harness_kind = crate::harness::resolve_for(
            config.harness.as_deref(),
            config.role.as_deref(),
            config.command.as_deref(),
        )?;
        let heartbeat = match (&config.heartbeat_message, config.heartbeat_idle) {
            (Some(message), secs) if secs > 0 && !message.is_empty() => Some(HeartbeatConfig {
                idle_for: Duration::from_secs(secs),
                message: message.clone(),
                condition: config.heartbeat_condition.clone(),
            }),
            _ => None,
        };
        Ok(Self {
            name: config.name.clone(),
            harness_kind,
            command_override: config.command.clone(),
            extra_args: config.extra_args.clone(),
            session_id: config.session_id.clone(),
            role_name: config.role.clone(),
            args_config: CommandArgsConfig {
                instructions: config.instructions.clone(),
                system_prompt: config.system_prompt.clone(),
                append_system_prompt: config.append_system_prompt.clone(),
                model: config.model.clone(),
                permission_mode: config.permission_mode.clone(),
                allowed_tools: config.allowed_tools.clone(),
                disallowed_tools: config.disallowed_tools.clone(),
                additional_dirs: config.additional_dirs.clone(),
            },
            extra_env: config.env_pairs()?,
            heartbeat,
            rows: config.rows,
            cols: config.cols,
            child_rows: config.child_rows(),
        })
    }

    /// A minimal spec for tests: generic harness running `command`.
    pub fn minimal(name: &str, command: &str) -> Self {
        Self {
            name: name.to_owned(),
            harness_kind: HarnessKind::Generic,
            command_override: Some(command.to_owned()),
            extra_args: vec![],
            session_id: None,
            role_name: None,
            args_config: CommandArgsConfig::default(),
            extra_env: vec![],
            heartbeat: None,
            rows: 24,
            cols: 80,
            child_rows: 24,
        }
    }
}

/// Control verbs the viewer (or RPC) sends the lifecycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Rebuild PTY + virtual terminal + monitor and resume delivery.
    Relaunch,
    /// Drain and return.
    Quit,
}

/// One supervised agent.
pub struct Session {
    spec: SessionSpec,
    tunables: Tunables,
    queue: Arc<MessageQueue>,
    harness: Arc<Harness>,
    monitor: parking_lot::RwLock<Arc<Monitor>>,
    monitor_swapped: Notify,
    pty: parking_lot::RwLock<Option<Arc<PtyHost>>>,
    /// Composed argv + env, captured at first launch and reused verbatim
    /// on relaunch.
    launch: parking_lot::RwLock<Option<(Vec<String>, Vec<(String, String)>)>>,
    passthrough: parking_lot::Mutex<Option<ViewerId>>,
    viewers: parking_lot::Mutex<Vec<ViewerEntry>>,
    next_viewer_id: AtomicU64,
    started_at: Instant,
    cancel: CancellationToken,
    control_tx: mpsc::Sender<SessionControl>,
    control_rx: tokio::sync::Mutex<Option<mpsc::Receiver<SessionControl>>>,
}

impl Session {
    pub fn new(spec: SessionSpec, tunables: Tunables) -> Arc<Self> {
        let harness =
            Harness::build(spec.harness_kind, spec.command_override.clone(), &tunables);
        let (control_tx, control_rx) = mpsc::channel(4);
        Arc::new(Self {
            spec,
            tunables,
            queue: Arc::new(MessageQueue::new()),
            harness: Arc::new(harness),
            monitor: parking_lot::RwLock::new(Arc::new(Monitor::new())),
            monitor_swapped: Notify::new(),
            pty: parking_lot::RwLock::new(None),
            launch: parking_lot::RwLock::new(None),
            passthrough: parking_lot::Mutex::new(None),
            viewers: parking_lot::Mutex::new(Vec::new()),
            next_viewer_id: AtomicU64::new(1),
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
            control_tx,
            control_rx: tokio::sync::Mutex::new(Some(control_rx)),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn harness(&self) -> &Arc<Harness> {
        &self.harness
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The monitor for the current child lifetime.
    pub fn current_monitor(&self) -> Arc<Monitor> {
        self.monitor.read().clone()
    }

    /// Notified whenever the monitor is replaced on relaunch.
    pub(crate) fn monitor_swapped(&self) -> &Notify {
        &self.monitor_swapped
    }

    pub fn current_pty(&self) -> Option<Arc<PtyHost>> {
        self.pty.read().clone()
    }

    pub fn install_pty(&self, pty: Arc<PtyHost>) {
        *self.pty.write() = Some(pty);
    }

    pub fn install_monitor(&self, monitor: Arc<Monitor>) {
        *self.monitor.write() = monitor;
        self.monitor_swapped.notify_waiters();
    }

    pub(crate) fn remember_launch(&self, argv: Vec<String>, env: Vec<(String, String)>) {
        *self.launch.write() = Some((argv, env));
    }

    pub(crate) fn launch_parameters(&self) -> Option<(Vec<String>, Vec<(String, String)>)> {
        self.launch.read().clone()
    }

    /// Enqueue a message from the RPC surface.
    pub fn enqueue(
        &self,
        from: &str,
        priority: Option<&str>,
        body: &str,
    ) -> anyhow::Result<uuid::Uuid> {
        let priority = match priority {
            None | Some("") => Priority::Normal,
            Some(name) => Priority::from_name(name)
                .ok_or_else(|| anyhow::anyhow!("unknown priority: {name}"))?,
        };
        self.queue.enqueue(Message::new(from, priority, body))
    }

    /// Snapshot for `status` responses and viewer ticks.
    pub fn agent_info(&self) -> AgentInfo {
        let monitor = self.current_monitor();
        let (pending, _paused) = self.queue.pending_count();
        AgentInfo::assemble(
            &self.spec.name,
            monitor.agent_state(),
            monitor.metrics(),
            monitor.identity(),
            self.started_at.elapsed(),
            pending,
        )
    }

    /// Ask the lifecycle loop to relaunch after an exit.
    pub fn request_relaunch(&self) {
        let _ = self.control_tx.try_send(SessionControl::Relaunch);
    }

    /// Ask the lifecycle loop to quit.
    pub fn request_quit(&self) {
        let _ = self.control_tx.try_send(SessionControl::Quit);
    }

    pub(crate) async fn take_control_rx(&self) -> Option<mpsc::Receiver<SessionControl>> {
        self.control_rx.lock().await.take()
    }

    // -- Viewer surface -------------------------------------------------------

    /// Register a viewer; the returned id is its only handle.
    pub fn register_viewer(&self, callbacks: ViewerCallbacks) -> ViewerId {
        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        self.viewers.lock().push(ViewerEntry { id, callbacks });
        id
    }

    /// Remove a viewer, releasing passthrough if it held it.
    pub fn unregister_viewer(&self, id: ViewerId) {
        self.viewers.lock().retain(|entry| entry.id != id);
        let mut passthrough = self.passthrough.lock();
        if *passthrough == Some(id) {
            *passthrough = None;
            self.queue.unpause();
        }
    }

    /// Take the passthrough lock: raw keystrokes flow, queued delivery
    /// pauses. At most one viewer may hold it.
    pub fn take_passthrough(&self, id: ViewerId) -> anyhow::Result<()> {
        let mut passthrough = self.passthrough.lock();
        match *passthrough {
            Some(owner) if owner != id => {
                anyhow::bail!("passthrough already held by viewer {owner}")
            }
            _ => {
                *passthrough = Some(id);
                self.queue.pause();
                Ok(())
            }
        }
    }

    /// Release passthrough; queued delivery resumes.
    pub fn release_passthrough(&self, id: ViewerId) -> anyhow::Result<()> {
        let mut passthrough = self.passthrough.lock();
        match *passthrough {
            Some(owner) if owner == id => {
                *passthrough = None;
                self.queue.unpause();
                Ok(())
            }
            Some(owner) => anyhow::bail!("passthrough held by viewer {owner}, not {id}"),
            None => anyhow::bail!("passthrough not held"),
        }
    }

    pub fn passthrough_owner(&self) -> Option<ViewerId> {
        *self.passthrough.lock()
    }

    /// Raw input from the passthrough viewer.
    pub async fn submit_input(&self, data: &[u8]) -> anyhow::Result<()> {
        let Some(pty) = self.current_pty() else {
            anyhow::bail!("no child process");
        };
        pty.write(data).await?;
        Ok(())
    }

    /// Local Ctrl+C from a viewer.
    pub fn interrupt(&self) -> bool {
        self.harness.handle_interrupt()
    }

    /// Whether the agent is currently exited (lifecycle view).
    pub fn is_exited(&self) -> bool {
        self.current_monitor().agent_state().state == State::Exited
    }

    /// Push the current status to every registered viewer.
    pub(crate) fn notify_viewers_state(&self) {
        let info = self.agent_info();
        let viewers = self.viewers.lock();
        for entry in viewers.iter() {
            if let Some(ref on_state) = entry.callbacks.on_state {
                on_state(&info);
            }
        }
    }

    /// Push a screen snapshot to every registered viewer.
    pub(crate) fn notify_viewers_screen(&self, snapshot: &crate::screen::ScreenSnapshot) {
        let viewers = self.viewers.lock();
        for entry in viewers.iter() {
            if let Some(ref on_screen) = entry.callbacks.on_screen {
                on_screen(snapshot);
            }
        }
    }

    pub(crate) fn notify_delivered(&self, message: &Message) {
        debug!(id = %message.id, priority = message.priority.as_str(), "message delivered");
        self.notify_viewers_state();
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
