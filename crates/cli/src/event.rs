// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalized agent telemetry: the uniform event stream every harness
//! produces and the derived state pair the monitor maintains.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Top-level derived state of a supervised agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Initialized,
    Active,
    Idle,
    Exited,
}

impl State {
    /// Wire-format string for this state (e.g. `"active"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Exited => "exited",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualifier refining what an `Active` agent is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubState {
    None,
    Thinking,
    ToolUse,
    WaitingForPermission,
    Compacting,
}

impl SubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::WaitingForPermission => "waiting_for_permission",
            Self::Compacting => "compacting",
        }
    }
}

impl std::fmt::Display for SubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined `(state, sub_state)` pair tracked by the monitor.
///
/// `Exited` is sticky: once set, the pair only changes when the monitor
/// itself is replaced on relaunch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub state: State,
    pub sub_state: SubState,
}

impl AgentState {
    pub fn initialized() -> Self {
        Self { state: State::Initialized, sub_state: SubState::None }
    }

    pub fn active(sub_state: SubState) -> Self {
        Self { state: State::Active, sub_state }
    }

    pub fn idle() -> Self {
        Self { state: State::Idle, sub_state: SubState::None }
    }

    pub fn exited() -> Self {
        Self { state: State::Exited, sub_state: SubState::None }
    }
}

/// Per-kind payload of an [`AgentEvent`].
///
/// The serde representation is adjacently tagged so an event line reads
/// `{"type": "...", "data": {...}}`; unit-like kinds omit `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStarted {
        thread_id: String,
        model: String,
    },
    UserPrompt,
    TurnCompleted {
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
        cost_usd: f64,
    },
    ToolStarted {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    ToolCompleted {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        success: bool,
    },
    ApprovalRequested {
        tool_name: String,
    },
    AgentMessage {
        content: String,
    },
    StateChange {
        state: State,
        sub_state: SubState,
    },
    SessionEnded,
}

impl EventPayload {
    /// Wire-format name of this event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::UserPrompt => "user_prompt",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolCompleted { .. } => "tool_completed",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::AgentMessage { .. } => "agent_message",
            Self::StateChange { .. } => "state_change",
            Self::SessionEnded => "session_ended",
        }
    }
}

/// A single normalized telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(with = "rfc3339")]
    pub timestamp: SystemTime,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl AgentEvent {
    /// Stamp a payload with the current time.
    pub fn now(payload: EventPayload) -> Self {
        Self { timestamp: SystemTime::now(), payload }
    }

    pub fn state_change(state: State, sub_state: SubState) -> Self {
        Self::now(EventPayload::StateChange { state, sub_state })
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// RFC 3339 timestamps with nanosecond precision, via humantime.
mod rfc3339 {
    use std::time::SystemTime;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(&humantime::format_rfc3339_nanos(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SystemTime, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
