// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge service: routes external chat traffic into the fleet of agent
//! sessions and tags outbound agent messages for chat transport.
//!
//! Channels are decomposed into capability traits: a channel may
//! implement any subset of [`Sender`], [`Receiver`], and
//! [`TypingIndicator`], and the bridge dispatches on capability
//! presence. The routing mutex is never held across network I/O.

pub mod exec;
pub mod paging;
pub mod service;

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Tunables;
use crate::socket::{agent_socket_path, list_agent_sockets, request, AgentInfo, BridgeInfo, Request};

/// Outbound chat capability.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Typing-indicator capability.
#[async_trait]
pub trait TypingIndicator: Send + Sync {
    async fn send_typing(&self) -> anyhow::Result<()>;
}

/// An inbound chat message from a channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Addressed agent, or empty for default routing.
    pub target_agent: String,
    /// Chat-side sender identity, forwarded as the message `from`.
    pub from: String,
    pub body: String,
}

/// Inbound chat capability. The bridge takes the stream once when it
/// binds its receivers.
pub trait Receiver: Send + Sync {
    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>>;
}

/// One chat channel, exposing whichever capabilities it has.
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Release channel resources on shutdown.
    fn close(&self) {}

    fn as_sender(&self) -> Option<&dyn Sender> {
        None
    }

    fn as_receiver(&self) -> Option<&dyn Receiver> {
        None
    }

    fn as_typing(&self) -> Option<&dyn TypingIndicator> {
        None
    }
}

/// Mutable routing state, guarded by one mutex.
#[derive(Debug, Default)]
struct RoutingState {
    concierge: Option<String>,
    /// Agent that most recently sent outbound traffic.
    last_sender: Option<String>,
    /// Agent that most recently received a routed inbound message.
    last_routed: Option<String>,
    messages_sent: u64,
    messages_received: u64,
    last_activity: Option<SystemTime>,
    /// Whether the concierge answered its most recent probe; drives the
    /// down-edge detection in the typing tick.
    concierge_was_up: bool,
}

/// The bridge routing engine.
pub struct BridgeService {
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    allowed_commands: Vec<String>,
    state: parking_lot::Mutex<RoutingState>,
    tunables: Tunables,
    started_at: Instant,
    cancel: CancellationToken,
    user: String,
}

impl BridgeService {
    pub fn new(
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        allowed_commands: Vec<String>,
        tunables: Tunables,
    ) -> Arc<Self> {
        let user = std::env::var("USER").unwrap_or_else(|_| "user".to_owned());
        Arc::new(Self {
            adapters,
            allowed_commands,
            state: parking_lot::Mutex::new(RoutingState::default()),
            tunables,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
            user,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn adapters(&self) -> &[Arc<dyn ChannelAdapter>] {
        &self.adapters
    }

    pub fn last_routed(&self) -> Option<String> {
        self.state.lock().last_routed.clone()
    }

    pub fn concierge(&self) -> Option<String> {
        self.state.lock().concierge.clone()
    }

    /// Route one inbound chat message to an agent session.
    pub async fn handle_inbound(&self, target_agent: &str, from: &str, body: &str) {
        let target = if target_agent.is_empty() {
            match self.resolve_default_target() {
                Some(target) => target,
                None => {
                    self.reply_all_senders(
                        "No agents are running, unable to deliver message.",
                    )
                    .await;
                    return;
                }
            }
        } else {
            target_agent.to_owned()
        };

        match self.deliver_to_agent(&target, from, body).await {
            Ok(()) => {
                let mut state = self.state.lock();
                state.last_routed = Some(target.clone());
                state.messages_received += 1;
                state.last_activity = Some(SystemTime::now());
                drop(state);
                debug!(target = %target, "routed inbound message");
            }
            Err(e) => {
                debug!(target = %target, "inbound delivery failed: {e}");
                self.reply_all_senders(&format!(
                    "{target} agent is not running, unable to deliver message."
                ))
                .await;
            }
        }
    }

    async fn deliver_to_agent(&self, target: &str, from: &str, body: &str) -> anyhow::Result<()> {
        let path = agent_socket_path(target)?;
        let response =
            request(&path, &Request::send(from, "normal", body), self.tunables.dial_timeout)
                .await?;
        if !response.ok {
            anyhow::bail!(response.error.unwrap_or_else(|| "send rejected".to_owned()));
        }
        Ok(())
    }

    /// Outbound message from a session: tag (unless concierge) and fan
    /// out to every sender in adapter order. Per-sender failures are
    /// collected into one combined error.
    pub async fn handle_outbound(&self, from_agent: &str, body: &str) -> anyhow::Result<()> {
        let tagged = {
            let mut state = self.state.lock();
            state.last_sender = Some(from_agent.to_owned());
            state.messages_sent += 1;
            state.last_activity = Some(SystemTime::now());
            if state.concierge.as_deref() == Some(from_agent) {
                body.to_owned()
            } else {
                format!("[{from_agent}] {body}")
            }
        };

        let mut failures = Vec::new();
        for adapter in &self.adapters {
            let Some(sender) = adapter.as_sender() else {
                continue;
            };
            if let Err(e) = sender.send_text(&tagged).await {
                failures.push(format!("{}: {e}", adapter.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("send failed on {}", failures.join("; "))
        }
    }

    /// Default routing target: concierge, else the agent that last sent
    /// outbound traffic, else the lexicographically first agent socket.
    pub fn resolve_default_target(&self) -> Option<String> {
        {
            let state = self.state.lock();
            if let Some(ref concierge) = state.concierge {
                return Some(concierge.clone());
            }
            if let Some(ref last_sender) = state.last_sender {
                return Some(last_sender.clone());
            }
        }
        list_agent_sockets().into_iter().next()
    }

    /// Best-effort broadcast to every sender adapter.
    pub async fn reply_all_senders(&self, text: &str) {
        for adapter in &self.adapters {
            let Some(sender) = adapter.as_sender() else {
                continue;
            };
            if let Err(e) = sender.send_text(text).await {
                warn!(channel = adapter.name(), "broadcast failed: {e}");
            }
        }
    }

    async fn probe_agent(&self, name: &str) -> anyhow::Result<AgentInfo> {
        let path = agent_socket_path(name)?;
        let response = request(&path, &Request::new("status"), self.tunables.dial_timeout).await?;
        response.agent.ok_or_else(|| anyhow::anyhow!("status response without agent info"))
    }

    /// One typing-indicator tick: watch the concierge's liveness, then
    /// show typing on the routed target while it is active.
    pub async fn typing_tick(&self) {
        let concierge = self.concierge();
        if let Some(name) = concierge {
            match self.probe_agent(&name).await {
                Ok(_) => self.state.lock().concierge_was_up = true,
                Err(e) => {
                    let was_up = self.state.lock().concierge_was_up;
                    debug!(concierge = %name, "concierge probe failed: {e}");
                    if was_up {
                        self.handle_concierge_down(&name).await;
                    }
                    return;
                }
            }
        }

        let last_routed = self.state.lock().last_routed.clone();
        let Some(target) = last_routed.or_else(|| self.resolve_default_target()) else {
            return;
        };
        let Ok(info) = self.probe_agent(&target).await else {
            return;
        };
        if info.state != "active" {
            return;
        }
        for adapter in &self.adapters {
            let Some(typing) = adapter.as_typing() else {
                continue;
            };
            if let Err(e) = typing.send_typing().await {
                // Logged and skipped until the next tick.
                debug!(channel = adapter.name(), "typing indicator failed: {e}");
            }
        }
    }

    /// The concierge stopped answering after having been up: clear the
    /// routing state that pointed at it and tell the channels.
    pub async fn handle_concierge_down(&self, name: &str) {
        {
            let mut state = self.state.lock();
            state.concierge = None;
            state.last_routed = None;
            state.concierge_was_up = false;
        }
        info!(concierge = %name, "concierge went down");
        self.reply_all_senders(&format!(
            "Concierge agent {name} stopped. Unaddressed messages will be \
             routed to the most recent sender."
        ))
        .await;
    }

    /// Set or replace the concierge. The probe is advisory: an
    /// unreachable agent may still be designated.
    pub async fn set_concierge(&self, name: &str) -> Option<String> {
        let probe_ok = self.probe_agent(name).await.is_ok();
        if !probe_ok {
            warn!(concierge = %name, "concierge set while unreachable");
        }
        let old = {
            let mut state = self.state.lock();
            let old = state.concierge.replace(name.to_owned());
            state.last_routed = None;
            state.concierge_was_up = probe_ok;
            old
        };
        self.reply_all_senders(&format!(
            "Concierge added/changed. Unaddressed messages will be routed to {name}."
        ))
        .await;
        old
    }

    /// Clear the concierge. Errors if none is set.
    pub async fn remove_concierge(&self) -> anyhow::Result<String> {
        let removed = {
            let mut state = self.state.lock();
            let Some(removed) = state.concierge.take() else {
                anyhow::bail!("no concierge set");
            };
            state.last_routed = None;
            state.concierge_was_up = false;
            removed
        };
        self.reply_all_senders(
            "Concierge removed. Unaddressed messages will be routed to the \
             most recent sender.",
        )
        .await;
        Ok(removed)
    }

    /// Run a whitelisted shell command on behalf of a channel.
    pub async fn exec_allowed(&self, command: &str, args: &str) -> String {
        if !self.allowed_commands.iter().any(|allowed| allowed == command) {
            return format!("ERROR: command not allowed: {command}");
        }
        exec::exec_command(command, args, self.tunables.exec_timeout).await
    }

    pub fn bridge_info(&self) -> BridgeInfo {
        let state = self.state.lock();
        BridgeInfo {
            name: format!("bridge-{}", self.user),
            channels: self.adapters.iter().map(|a| a.name().to_owned()).collect(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            messages_sent: state.messages_sent,
            messages_received: state.messages_received,
            last_activity_epoch_ms: state.last_activity.map(|t| {
                t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
            }),
            concierge: state.concierge.clone(),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
