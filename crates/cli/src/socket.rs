// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-socket surface: directory layout, stale-socket recovery, and the
//! length-prefixed JSON wire format shared by sessions and the bridge.
//!
//! Sockets live under `<H2_DIR>/sockets/`, mode 0700, and trust the
//! filesystem; there is no authentication. A frame is a 4-byte
//! big-endian length followed by that many bytes of UTF-8 JSON.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::config::h2_dir;
use crate::monitor::MetricsSnapshot;

/// Upper bound on a single frame; anything larger is a protocol error.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// `<H2_DIR>/sockets`, created mode 0700 on first use.
pub fn sockets_dir() -> anyhow::Result<PathBuf> {
    let dir = h2_dir().join("sockets");
    if !dir.exists() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .with_context(|| format!("creating socket dir {}", dir.display()))?;
    }
    Ok(dir)
}

/// Socket path for a named agent session.
pub fn agent_socket_path(name: &str) -> anyhow::Result<PathBuf> {
    Ok(sockets_dir()?.join(format!("agent-{name}.sock")))
}

/// Socket path for the bridge service (per user).
pub fn bridge_socket_path() -> anyhow::Result<PathBuf> {
    let user = std::env::var("USER").unwrap_or_else(|_| "user".to_owned());
    Ok(sockets_dir()?.join(format!("bridge-{user}.sock")))
}

/// Agent session names with a socket file present, lexicographic.
pub fn list_agent_sockets() -> Vec<String> {
    let Ok(dir) = sockets_dir() else {
        return vec![];
    };
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return vec![];
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|file| {
            file.strip_prefix("agent-")?.strip_suffix(".sock").map(str::to_owned)
        })
        .collect();
    names.sort();
    names
}

/// Bind a listener at `path` after probing for a live owner.
///
/// If something answers the probe, a previous instance is still running
/// and binding refuses. If the probe fails with connection-refused (or
/// the file is simply absent), any stale file is unlinked and the bind
/// proceeds.
pub async fn bind_with_probe(path: &Path, dial_timeout: Duration) -> anyhow::Result<UnixListener> {
    if path.exists() {
        match tokio::time::timeout(dial_timeout, UnixStream::connect(path)).await {
            Ok(Ok(_stream)) => {
                bail!("socket {} is already in use by a running instance", path.display());
            }
            Ok(Err(_)) | Err(_) => {
                // Stale socket from a dead process.
                std::fs::remove_file(path)
                    .with_context(|| format!("removing stale socket {}", path.display()))?;
            }
        }
    }
    UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))
}

/// Dial a socket with a deadline.
pub async fn dial(path: &Path, dial_timeout: Duration) -> anyhow::Result<UnixStream> {
    match tokio::time::timeout(dial_timeout, UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e).with_context(|| format!("dialing {}", path.display())),
        Err(_) => bail!("timed out dialing {}", path.display()),
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<T: Serialize>(stream: &mut UnixStream, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(value)?;
    if body.len() as u32 > MAX_FRAME_LEN {
        bail!("frame too large: {} bytes", body.len());
    }
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    Ok(())
}

/// Read one length-prefixed JSON frame. `Ok(None)` on clean EOF before
/// the length prefix; errors on malformed length or JSON.
pub async fn read_frame<T: DeserializeOwned>(stream: &mut UnixStream) -> anyhow::Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        bail!("frame length {len} exceeds limit");
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await.context("short frame body")?;
    let value = serde_json::from_slice(&body).context("malformed frame JSON")?;
    Ok(Some(value))
}

/// Dial, send one request, read one response.
pub async fn request(
    path: &Path,
    request: &Request,
    dial_timeout: Duration,
) -> anyhow::Result<Response> {
    let mut stream = dial(path, dial_timeout).await?;
    write_frame(&mut stream, request).await?;
    match read_frame::<Response>(&mut stream).await? {
        Some(response) => Ok(response),
        None => bail!("connection closed before response"),
    }
}

// -- Wire schema --------------------------------------------------------------

/// Request frame. `type` selects the verb; the remaining fields are
/// verb-specific and optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Request {
    pub fn new(kind: &str) -> Self {
        Self { kind: kind.to_owned(), priority: None, from: None, body: None }
    }

    /// A `send` request with the given sender, priority, and body.
    pub fn send(from: &str, priority: &str, body: &str) -> Self {
        Self {
            kind: "send".to_owned(),
            priority: Some(priority.to_owned()),
            from: Some(from.to_owned()),
            body: Some(body.to_owned()),
        }
    }
}

/// Response frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_concierge: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self { ok: true, ..Default::default() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { ok: false, error: Some(message.into()), ..Default::default() }
    }

    pub fn message_id(id: impl Into<String>) -> Self {
        Self { ok: true, message_id: Some(id.into()), ..Default::default() }
    }
}

/// Status snapshot of one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub state: String,
    pub sub_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub uptime_secs: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_cost_usd: f64,
    pub tool_counts: HashMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tool: Option<String>,
    pub message_queue_pending: usize,
}

impl AgentInfo {
    /// Assemble from monitor outputs plus session bookkeeping.
    pub fn assemble(
        name: &str,
        state: crate::event::AgentState,
        metrics: MetricsSnapshot,
        identity: crate::monitor::AgentIdentity,
        uptime: Duration,
        queue_pending: usize,
    ) -> Self {
        Self {
            name: name.to_owned(),
            state: state.state.as_str().to_owned(),
            sub_state: state.sub_state.as_str().to_owned(),
            thread_id: identity.thread_id,
            model: identity.model,
            uptime_secs: uptime.as_secs(),
            input_tokens: metrics.input_tokens,
            output_tokens: metrics.output_tokens,
            cached_tokens: metrics.cached_tokens,
            total_cost_usd: metrics.total_cost_usd,
            tool_counts: metrics.tool_counts,
            last_tool: identity.last_tool,
            message_queue_pending: queue_pending,
        }
    }
}

/// Status snapshot of the bridge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeInfo {
    pub name: String,
    /// Channel adapter names, in registration order.
    pub channels: Vec<String>,
    pub uptime_secs: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concierge: Option<String>,
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
