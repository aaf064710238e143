// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex harness: OTLP telemetry with cumulative-token delta tracking
//! and a completion-to-idle debounce.
//!
//! Codex emits `response.completed` *before* a subsequent
//! `tool_decision(approved)` in tight sequences, so idle is not reported
//! immediately on completion: a short debounce timer fires idle only if
//! nothing proves the agent is still acting, and any tool start or
//! approval cancels the pending timer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Tunables;
use crate::event::{AgentEvent, AgentState, EventPayload, State, SubState};
use crate::otel::{self, OtelCallbacks, OtelReceiver};

use super::{CommandArgsConfig, EventSink, LaunchPlan};

/// Previous cumulative token totals reported by Codex. Input and cached
/// counts are cumulative across a conversation; output is per-turn.
#[derive(Debug, Default, Clone, Copy)]
struct TokenBaseline {
    input: u64,
    cached: u64,
}

/// Shared telemetry state, cloned into OTEL callbacks.
struct CodexTelemetry {
    sink: EventSink,
    idle_debounce: std::time::Duration,
    /// Shadow of the last emitted state. Events are consumed downstream
    /// in emission order, so at debounce-fire time this agrees with the
    /// monitor's view.
    shadow: Arc<parking_lot::RwLock<AgentState>>,
    baseline: parking_lot::Mutex<TokenBaseline>,
    pending_idle: parking_lot::Mutex<Option<CancellationToken>>,
}

impl CodexTelemetry {
    fn emit_state(&self, state: State, sub_state: SubState) {
        *self.shadow.write() = AgentState { state, sub_state };
        self.sink.emit_state(state, sub_state);
    }

    fn cancel_pending_idle(&self) {
        if let Some(token) = self.pending_idle.lock().take() {
            token.cancel();
        }
    }

    /// Arm (or re-arm) the idle debounce. On fire, transition to idle
    /// iff the agent still looks active and is not mid-tool.
    fn schedule_idle(&self) {
        let token = CancellationToken::new();
        {
            let mut pending = self.pending_idle.lock();
            if let Some(previous) = pending.take() {
                previous.cancel();
            }
            *pending = Some(token.clone());
        }
        let sink = self.sink.clone();
        let shadow = Arc::clone(&self.shadow);
        let delay = self.idle_debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let current = *shadow.read();
                    if current.state == State::Active && current.sub_state != SubState::ToolUse {
                        *shadow.write() = AgentState::idle();
                        sink.emit_state(State::Idle, SubState::None);
                    }
                }
            }
        });
    }

    /// Fold one OTLP payload's `codex.*` log records into events.
    fn handle_payload(&self, payload: &serde_json::Value) {
        if std::env::var("OTEL_DEBUG_LOGGING_ENABLED").is_ok() {
            debug!(payload = %payload, "otel codex payload");
        }
        for record in otel::log_records(payload) {
            let Some(name) = otel::event_name(record) else {
                continue;
            };
            match name {
                "codex.conversation_starts" => {
                    *self.baseline.lock() = TokenBaseline::default();
                    self.sink.emit(EventPayload::SessionStarted {
                        thread_id: otel::attr_str(record, "thread_id")
                            .unwrap_or_default()
                            .to_owned(),
                        model: otel::attr_str(record, "model").unwrap_or_default().to_owned(),
                    });
                    self.emit_state(State::Idle, SubState::None);
                }
                "codex.user_prompt" => {
                    self.sink.emit(EventPayload::UserPrompt);
                    self.emit_state(State::Active, SubState::Thinking);
                }
                "codex.sse_event" => self.handle_sse_event(record),
                "codex.tool_result" => {
                    self.sink.emit(EventPayload::ToolCompleted {
                        tool_name: otel::attr_str(record, "tool_name")
                            .unwrap_or_default()
                            .to_owned(),
                        call_id: otel::attr_str(record, "call_id").map(Into::into),
                        duration_ms: otel::attr_u64(record, "duration_ms"),
                        success: otel::attr_str(record, "success") != Some("false"),
                    });
                }
                "codex.tool_decision" => self.handle_tool_decision(record),
                other => debug!(event = other, "ignoring codex record"),
            }
        }
    }

    fn handle_sse_event(&self, record: &serde_json::Value) {
        match otel::attr_str(record, "kind") {
            Some("response.created") => {
                self.emit_state(State::Active, SubState::Thinking);
            }
            Some("response.completed") => {
                let raw_input = otel::attr_u64(record, "input_tokens").unwrap_or(0);
                let output = otel::attr_u64(record, "output_tokens").unwrap_or(0);
                let raw_cached = otel::attr_u64(record, "cached_tokens").unwrap_or(0);

                if raw_input != 0 || output != 0 || raw_cached != 0 {
                    let (delta_input, delta_cached) = {
                        let mut baseline = self.baseline.lock();
                        // A decreasing cumulative value means the counter
                        // reset; use the raw value as the delta.
                        let delta_input = if raw_input < baseline.input {
                            raw_input
                        } else {
                            raw_input - baseline.input
                        };
                        let delta_cached = if raw_cached < baseline.cached {
                            raw_cached
                        } else {
                            raw_cached - baseline.cached
                        };
                        baseline.input = raw_input;
                        baseline.cached = raw_cached;
                        (delta_input, delta_cached)
                    };
                    self.sink.emit(EventPayload::TurnCompleted {
                        input_tokens: delta_input,
                        output_tokens: output,
                        cached_tokens: delta_cached,
                        cost_usd: otel::attr_f64(record, "cost_usd").unwrap_or(0.0),
                    });
                } else {
                    debug!("ignoring response.completed with zero usage");
                }

                self.schedule_idle();
            }
            other => debug!(kind = ?other, "ignoring sse event"),
        }
    }

    fn handle_tool_decision(&self, record: &serde_json::Value) {
        let tool_name = otel::attr_str(record, "tool_name").unwrap_or_default().to_owned();
        let call_id = otel::attr_str(record, "call_id").map(str::to_owned);
        match otel::attr_str(record, "decision") {
            Some("approved") => {
                self.cancel_pending_idle();
                self.sink.emit(EventPayload::ToolStarted { tool_name, call_id });
                self.emit_state(State::Active, SubState::ToolUse);
            }
            Some("ask_user") => {
                self.cancel_pending_idle();
                self.sink.emit(EventPayload::ApprovalRequested { tool_name });
                self.emit_state(State::Active, SubState::WaitingForPermission);
            }
            other => debug!(decision = ?other, "ignoring tool decision"),
        }
    }
}

pub struct CodexHarness {
    command: String,
    telemetry: Arc<CodexTelemetry>,
    intake: parking_lot::Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    otel: tokio::sync::Mutex<Option<OtelReceiver>>,
    session_id: parking_lot::RwLock<Option<String>>,
}

impl CodexHarness {
    pub fn new(command_override: Option<String>, tunables: &Tunables) -> Self {
        let (sink, intake) = EventSink::channel();
        Self {
            command: command_override.unwrap_or_else(|| "codex".to_owned()),
            telemetry: Arc::new(CodexTelemetry {
                sink,
                idle_debounce: tunables.codex_idle_debounce,
                shadow: Arc::new(parking_lot::RwLock::new(AgentState::initialized())),
                baseline: parking_lot::Mutex::new(TokenBaseline::default()),
                pending_idle: parking_lot::Mutex::new(None),
            }),
            intake: parking_lot::Mutex::new(Some(intake)),
            otel: tokio::sync::Mutex::new(None),
            session_id: parking_lot::RwLock::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn display_command(&self) -> String {
        self.command.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Map the generic launch config onto Codex CLI flags.
    pub fn role_args(&self, cfg: &CommandArgsConfig) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref instructions) = cfg.instructions {
            let escaped = serde_json::Value::String(instructions.clone()).to_string();
            args.push("-c".to_owned());
            args.push(format!("instructions={escaped}"));
        }
        if let Some(ref model) = cfg.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        match cfg.permission_mode.as_deref() {
            Some("confirm") => {
                args.push("--ask-for-approval".to_owned());
                args.push("untrusted".to_owned());
            }
            Some("auto-edit") => {
                args.push("--ask-for-approval".to_owned());
                args.push("on-request".to_owned());
            }
            Some("auto") => {
                args.push("--ask-for-approval".to_owned());
                args.push("never".to_owned());
            }
            Some("plan") => {
                args.push("--ask-for-approval".to_owned());
                args.push("untrusted".to_owned());
                args.push("--sandbox".to_owned());
                args.push("read-only".to_owned());
            }
            Some(other) => {
                args.push("--ask-for-approval".to_owned());
                args.push(other.to_owned());
            }
            None => args.push("--full-auto".to_owned()),
        }
        args
    }

    /// Start the OTEL receiver and return the `-c` exporter flag.
    pub async fn prepare_for_launch(
        &self,
        _agent_name: &str,
        session_id: Option<&str>,
        dry_run: bool,
    ) -> anyhow::Result<LaunchPlan> {
        let sid = match session_id {
            Some(id) => id.to_owned(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        *self.session_id.write() = Some(sid.clone());

        let mut plan = LaunchPlan { session_id: Some(sid), ..Default::default() };
        if dry_run {
            return Ok(plan);
        }

        let telemetry = Arc::clone(&self.telemetry);
        let logs_telemetry = Arc::clone(&telemetry);
        let callbacks = OtelCallbacks::default()
            .with_logs(Arc::new(move |payload| logs_telemetry.handle_payload(&payload)))
            .with_traces(Arc::new(move |payload| telemetry.handle_payload(&payload)));
        let receiver = OtelReceiver::start(callbacks).await?;

        plan.prepend_args = vec![
            "-c".to_owned(),
            format!(
                "otel.trace_exporter={{type=\"otlp-http\",endpoint=\"http://127.0.0.1:{}\",protocol=\"json\"}}",
                receiver.port()
            ),
        ];
        *self.otel.lock().await = Some(receiver);
        Ok(plan)
    }

    pub async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let Some(mut intake) = self.intake.lock().take() else {
            anyhow::bail!("harness already started");
        };
        super::forward_events(&mut intake, &events, &cancel).await;
        Ok(())
    }

    pub async fn stop(&self) {
        self.telemetry.cancel_pending_idle();
        if let Some(receiver) = self.otel.lock().await.take() {
            receiver.stop().await;
        }
    }

    /// Feed a raw OTLP payload directly (tests and replay tooling).
    pub fn ingest_payload(&self, payload: &serde_json::Value) {
        self.telemetry.handle_payload(payload);
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
