// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude Code harness: OTEL telemetry, vendor hooks, and the session
//! transcript tailer.
//!
//! Launch wires the child to a local OTLP receiver via environment
//! variables and registers shell hooks that forward their stdin JSON
//! into a named pipe read here. The transcript tailer surfaces
//! assistant messages that telemetry alone does not carry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{h2_dir, Tunables};
use crate::event::{AgentEvent, EventPayload, State, SubState};
use crate::otel::{self, OtelCallbacks, OtelReceiver};

use super::hooks::{write_hook_settings, HookReceiver};
use super::tailer::SessionLogTailer;
use super::{CommandArgsConfig, EventSink, LaunchPlan};

pub struct ClaudeHarness {
    command: String,
    tailer_poll: std::time::Duration,
    sink: EventSink,
    intake: parking_lot::Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    otel: tokio::sync::Mutex<Option<OtelReceiver>>,
    session_id: parking_lot::RwLock<Option<String>>,
    transcript_path: parking_lot::RwLock<Option<PathBuf>>,
    hook_receiver: parking_lot::Mutex<Option<HookReceiver>>,
}

impl ClaudeHarness {
    pub fn new(command_override: Option<String>, tunables: &Tunables) -> Self {
        let (sink, intake) = EventSink::channel();
        Self {
            command: command_override.unwrap_or_else(|| "claude".to_owned()),
            tailer_poll: tunables.tailer_poll_interval,
            sink,
            intake: parking_lot::Mutex::new(Some(intake)),
            otel: tokio::sync::Mutex::new(None),
            session_id: parking_lot::RwLock::new(None),
            transcript_path: parking_lot::RwLock::new(None),
            hook_receiver: parking_lot::Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn display_command(&self) -> String {
        match self.session_id.read().as_deref() {
            Some(id) => format!("{} --session-id {id}", self.command),
            None => self.command.clone(),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Vendor config lives under `<h2_dir>/claude` so agent state stays
    /// inside the H2 root.
    pub fn config_dir(&self, h2_dir: &Path) -> PathBuf {
        h2_dir.join("claude")
    }

    pub fn ensure_config_dir(&self, h2_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(self.config_dir(h2_dir))?;
        Ok(())
    }

    pub fn build_command_env(&self, h2_dir: &Path) -> Vec<(String, String)> {
        vec![(
            "CLAUDE_CONFIG_DIR".to_owned(),
            self.config_dir(h2_dir).display().to_string(),
        )]
    }

    /// Map the generic launch config onto Claude CLI flags.
    pub fn role_args(&self, cfg: &CommandArgsConfig) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(id) = self.session_id.read().as_deref() {
            args.push("--session-id".to_owned());
            args.push(id.to_owned());
        }
        if let Some(ref prompt) = cfg.system_prompt {
            args.push("--system-prompt".to_owned());
            args.push(prompt.clone());
        }
        if let Some(ref prompt) = cfg.append_system_prompt {
            args.push("--append-system-prompt".to_owned());
            args.push(prompt.clone());
        }
        if let Some(ref model) = cfg.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        if let Some(ref mode) = cfg.permission_mode {
            args.push("--permission-mode".to_owned());
            args.push(mode.clone());
        }
        if !cfg.allowed_tools.is_empty() {
            args.push("--allowedTools".to_owned());
            args.push(cfg.allowed_tools.join(","));
        }
        if !cfg.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_owned());
            args.push(cfg.disallowed_tools.join(","));
        }
        for dir in &cfg.additional_dirs {
            args.push("--add-dir".to_owned());
            args.push(dir.display().to_string());
        }
        args
    }

    /// Generate (or accept) the session UUID, start the OTEL receiver,
    /// set up the hook pipe, and return the telemetry environment and
    /// settings args for the child.
    pub async fn prepare_for_launch(
        &self,
        agent_name: &str,
        session_id: Option<&str>,
        dry_run: bool,
    ) -> anyhow::Result<LaunchPlan> {
        let sid = match session_id {
            Some(id) => id.to_owned(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        *self.session_id.write() = Some(sid.clone());

        let working_dir = std::env::current_dir()?;
        *self.transcript_path.write() =
            Some(transcript_path(&self.config_dir(&h2_dir()), &working_dir, &sid));

        let mut plan = LaunchPlan { session_id: Some(sid), ..Default::default() };
        if dry_run {
            return Ok(plan);
        }

        // Hook ingress: settings file + named pipe in the session dir.
        let session_dir = crate::config::session_dir(agent_name);
        let settings_path = write_hook_settings(&session_dir)?;
        let receiver = HookReceiver::new(&session_dir.join("hooks.pipe"))?;
        plan.env
            .push(("H2_HOOK_PIPE".to_owned(), receiver.pipe_path().display().to_string()));
        plan.prepend_args =
            vec!["--settings".to_owned(), settings_path.display().to_string()];
        *self.hook_receiver.lock() = Some(receiver);

        let sink = self.sink.clone();
        let callbacks = OtelCallbacks::default()
            .with_logs(Arc::new(move |payload| handle_otel_logs(&sink, &payload)))
            .with_metrics(Arc::new(|_payload| {
                // Cumulative gauges are not converted to discrete events.
            }));
        let otel_receiver = OtelReceiver::start(callbacks).await?;

        plan.env.extend([
            ("CLAUDE_CODE_ENABLE_TELEMETRY".to_owned(), "1".to_owned()),
            ("OTEL_LOGS_EXPORTER".to_owned(), "otlp".to_owned()),
            ("OTEL_METRICS_EXPORTER".to_owned(), "otlp".to_owned()),
            ("OTEL_TRACES_EXPORTER".to_owned(), "otlp".to_owned()),
            ("OTEL_EXPORTER_OTLP_PROTOCOL".to_owned(), "http/json".to_owned()),
            ("OTEL_EXPORTER_OTLP_ENDPOINT".to_owned(), otel_receiver.endpoint()),
            ("OTEL_METRIC_EXPORT_INTERVAL".to_owned(), "1000".to_owned()),
            ("OTEL_LOGS_EXPORT_INTERVAL".to_owned(), "500".to_owned()),
        ]);
        *self.otel.lock().await = Some(otel_receiver);
        Ok(plan)
    }

    /// Forward events and tail the vendor transcript until cancellation.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let Some(mut intake) = self.intake.lock().take() else {
            anyhow::bail!("harness already started");
        };

        if let Some(mut hook_receiver) = self.hook_receiver.lock().take() {
            let sink = self.sink.clone();
            let hook_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = hook_cancel.cancelled() => break,
                        event = hook_receiver.next_event() => match event {
                            Some((name, payload)) => {
                                if !translate_hook(&sink, &name, &payload) {
                                    debug!(hook = %name, "unhandled hook event");
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        if let Some(path) = self.transcript_path.read().clone() {
            let tailer = SessionLogTailer::new(path, self.tailer_poll);
            let (line_tx, mut line_rx) = mpsc::channel::<Vec<String>>(16);
            let tail_cancel = cancel.clone();
            tokio::spawn(async move { tailer.run(line_tx, tail_cancel).await });

            let sink = self.sink.clone();
            let parse_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = parse_cancel.cancelled() => break,
                        lines = line_rx.recv() => match lines {
                            Some(lines) => {
                                for line in lines {
                                    if let Some(content) = assistant_message(&line) {
                                        sink.emit(EventPayload::AgentMessage { content });
                                    }
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        super::forward_events(&mut intake, &events, &cancel).await;
        Ok(())
    }

    /// Translate a vendor hook into normalized events.
    pub fn handle_hook_event(&self, name: &str, payload: &serde_json::Value) -> bool {
        translate_hook(&self.sink, name, payload)
    }

    /// A local Ctrl+C behaves like the vendor's Interrupt hook.
    pub fn handle_interrupt(&self) -> bool {
        self.sink.emit_state(State::Idle, SubState::None);
        true
    }

    pub async fn stop(&self) {
        if let Some(receiver) = self.otel.lock().await.take() {
            receiver.stop().await;
        }
    }
}

/// Map a vendor hook name + payload onto normalized events. Returns
/// whether the hook was recognized.
fn translate_hook(sink: &EventSink, name: &str, payload: &serde_json::Value) -> bool {
    let tool =
        |key: &str| payload.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_owned();
    match name {
        "UserPromptSubmit" => {
            sink.emit(EventPayload::UserPrompt);
            sink.emit_state(State::Active, SubState::Thinking);
        }
        "PreToolUse" => {
            sink.emit(EventPayload::ToolStarted {
                tool_name: tool("tool_name"),
                call_id: payload.get("tool_use_id").and_then(|v| v.as_str()).map(Into::into),
            });
            sink.emit_state(State::Active, SubState::ToolUse);
        }
        "PostToolUse" => {
            sink.emit(EventPayload::ToolCompleted {
                tool_name: tool("tool_name"),
                call_id: payload.get("tool_use_id").and_then(|v| v.as_str()).map(Into::into),
                duration_ms: None,
                success: true,
            });
            sink.emit_state(State::Active, SubState::Thinking);
        }
        "PermissionRequest" => {
            sink.emit(EventPayload::ApprovalRequested { tool_name: tool("tool_name") });
            sink.emit_state(State::Active, SubState::WaitingForPermission);
        }
        "permission_decision" => match payload.get("decision").and_then(|v| v.as_str()) {
            Some("ask_user") => {
                sink.emit_state(State::Active, SubState::WaitingForPermission);
            }
            Some("allow") | Some("approved") | Some("deny") => {
                sink.emit_state(State::Active, SubState::ToolUse);
            }
            // Unknown decisions leave the sub-state untouched.
            _ => {}
        },
        "PreCompact" => {
            sink.emit_state(State::Active, SubState::Compacting);
        }
        "SessionStart" | "Stop" | "Interrupt" => {
            sink.emit_state(State::Idle, SubState::None);
        }
        "SessionEnd" => {
            sink.emit(EventPayload::SessionEnded);
        }
        _ => return false,
    }
    true
}

/// Fold OTEL log records into events. `api_request` carries per-turn
/// token usage; `tool_result` closes a tool invocation. Everything else
/// (including all-zero usage reports) is telemetry noise.
fn handle_otel_logs(sink: &EventSink, payload: &serde_json::Value) {
    if std::env::var("OTEL_DEBUG_LOGGING_ENABLED").is_ok() {
        debug!(payload = %payload, "otel logs payload");
    }
    for record in otel::log_records(payload) {
        match otel::event_name(record) {
            Some("api_request") => {
                let input = otel::attr_u64(record, "input_tokens").unwrap_or(0);
                let output = otel::attr_u64(record, "output_tokens").unwrap_or(0);
                let cached = otel::attr_u64(record, "cache_read_tokens").unwrap_or(0);
                let cost = otel::attr_f64(record, "cost_usd").unwrap_or(0.0);
                if input == 0 && output == 0 && cached == 0 {
                    debug!("ignoring api_request with zero usage");
                    continue;
                }
                sink.emit(EventPayload::TurnCompleted {
                    input_tokens: input,
                    output_tokens: output,
                    cached_tokens: cached,
                    cost_usd: cost,
                });
            }
            Some("tool_result") => {
                let tool_name = otel::attr_str(record, "tool_name")
                    .or_else(|| otel::attr_str(record, "name"))
                    .unwrap_or_default()
                    .to_owned();
                sink.emit(EventPayload::ToolCompleted {
                    tool_name,
                    call_id: otel::attr_str(record, "tool_use_id").map(Into::into),
                    duration_ms: otel::attr_u64(record, "duration_ms"),
                    success: otel::attr_str(record, "success") != Some("false"),
                });
            }
            other => debug!(event = ?other, "ignoring otel log record"),
        }
    }
}

/// Extract assistant text from one transcript JSONL line.
///
/// Returns `None` for non-assistant records and records whose
/// `message.content` is empty. Content may be a plain string or the
/// block-array form; only `text` blocks contribute.
fn assistant_message(line: &str) -> Option<String> {
    let record: serde_json::Value = serde_json::from_str(line).ok()?;
    if record.get("type").and_then(|v| v.as_str()) != Some("assistant") {
        return None;
    }
    let content = record.get("message")?.get("content")?;
    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            parts.join("\n")
        }
        _ => return None,
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

/// Transcript path under the vendor config dir:
/// `<config>/projects/<dashed-working-dir>/<session-id>.jsonl`.
fn transcript_path(config_dir: &Path, working_dir: &Path, session_id: &str) -> PathBuf {
    let canonical =
        std::fs::canonicalize(working_dir).unwrap_or_else(|_| working_dir.to_path_buf());
    let dashed =
        canonical.display().to_string().replace('/', "-").trim_start_matches('-').to_owned();
    config_dir.join("projects").join(dashed).join(format!("{session_id}.jsonl"))
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
