// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit and integration tests: a scoped H2
//! directory, a fake agent socket server, and a fake chat channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::bridge::{ChannelAdapter, InboundMessage, Receiver, Sender, TypingIndicator};
use crate::socket::{agent_socket_path, read_frame, write_frame, AgentInfo, Request, Response};

/// Points `H2_DIR` at a fresh temp dir for the fixture's lifetime.
/// Tests using this must be `#[serial_test::serial]`; the env var is
/// process-wide.
pub struct ScopedH2Dir {
    _tmp: tempfile::TempDir,
}

impl ScopedH2Dir {
    pub fn new() -> anyhow::Result<Self> {
        let tmp = tempfile::tempdir()?;
        std::env::set_var("H2_DIR", tmp.path());
        Ok(Self { _tmp: tmp })
    }
}

impl Drop for ScopedH2Dir {
    fn drop(&mut self) {
        std::env::remove_var("H2_DIR");
    }
}

/// A minimal agent socket server: records every request and answers
/// `send` with a message id and `status` with a canned state.
pub struct FakeAgent {
    pub name: String,
    pub requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeAgent {
    pub async fn spawn(name: &str, state: &str) -> anyhow::Result<Self> {
        let path = agent_socket_path(name)?;
        let listener = tokio::net::UnixListener::bind(&path)?;
        let requests: Arc<Mutex<Vec<Request>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        let agent_name = name.to_owned();
        let agent_state = state.to_owned();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let seen = seen.clone();
                let agent_name = agent_name.clone();
                let agent_state = agent_state.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, seen, &agent_name, &agent_state).await;
                });
            }
        });

        Ok(Self { name: name.to_owned(), requests })
    }

    /// Bodies of recorded `send` requests.
    pub fn received_bodies(&self) -> Vec<String> {
        self.requests.lock().iter().filter_map(|r| r.body.clone()).collect()
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    seen: Arc<Mutex<Vec<Request>>>,
    name: &str,
    state: &str,
) -> anyhow::Result<()> {
    while let Some(request) = read_frame::<Request>(&mut stream).await? {
        let response = match request.kind.as_str() {
            "send" => Response::message_id(uuid::Uuid::new_v4().to_string()),
            "stop" => Response::ok(),
            "status" => {
                let mut response = Response::ok();
                response.agent = Some(AgentInfo {
                    name: name.to_owned(),
                    state: state.to_owned(),
                    sub_state: "none".to_owned(),
                    thread_id: None,
                    model: None,
                    uptime_secs: 1,
                    input_tokens: 0,
                    output_tokens: 0,
                    cached_tokens: 0,
                    total_cost_usd: 0.0,
                    tool_counts: HashMap::new(),
                    last_tool: None,
                    message_queue_pending: 0,
                });
                response
            }
            other => Response::error(format!("unknown request type: {other}")),
        };
        seen.lock().push(request);
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

/// A fake chat channel implementing all three capabilities.
pub struct FakeChannel {
    name: String,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub typing_count: Arc<AtomicU64>,
    pub fail_sends: AtomicBool,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl FakeChannel {
    pub fn new(name: &str) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        Arc::new(Self {
            name: name.to_owned(),
            sent: Arc::new(Mutex::new(Vec::new())),
            typing_count: Arc::new(AtomicU64::new(0)),
            fail_sends: AtomicBool::new(false),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Inject an inbound chat message as if a user sent it.
    pub async fn push_inbound(&self, target_agent: &str, from: &str, body: &str) {
        let _ = self
            .inbound_tx
            .send(InboundMessage {
                target_agent: target_agent.to_owned(),
                from: from.to_owned(),
                body: body.to_owned(),
            })
            .await;
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Sender for FakeChannel {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            anyhow::bail!("simulated channel outage");
        }
        self.sent.lock().push(text.to_owned());
        Ok(())
    }
}

#[async_trait]
impl TypingIndicator for FakeChannel {
    async fn send_typing(&self) -> anyhow::Result<()> {
        self.typing_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Receiver for FakeChannel {
    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}

impl ChannelAdapter for FakeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_sender(&self) -> Option<&dyn Sender> {
        Some(self)
    }

    fn as_receiver(&self) -> Option<&dyn Receiver> {
        Some(self)
    }

    fn as_typing(&self) -> Option<&dyn TypingIndicator> {
        Some(self)
    }
}
