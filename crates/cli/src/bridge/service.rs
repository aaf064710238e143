// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge serve loop: receiver binding, the bridge unix socket, and the
//! typing-indicator tick.

use std::sync::Arc;

use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::socket::{bind_with_probe, bridge_socket_path, read_frame, write_frame, Request, Response};

use super::{BridgeService, InboundMessage};

/// Run the bridge until its token is cancelled.
///
/// The bridge socket is bound only after every receiver is wired, so the
/// socket's existence means the service is ready to route.
pub async fn serve(service: Arc<BridgeService>) -> anyhow::Result<()> {
    let cancel = service.cancel_token();

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    for adapter in service.adapters() {
        let Some(receiver) = adapter.as_receiver() else {
            continue;
        };
        let Some(mut channel_rx) = receiver.take_inbound() else {
            continue;
        };
        let tx = inbound_tx.clone();
        let forward_cancel = cancel.clone();
        let name = adapter.name().to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => break,
                    message = channel_rx.recv() => match message {
                        Some(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            debug!(channel = %name, "inbound channel closed");
                            break;
                        }
                    },
                }
            }
        });
    }
    drop(inbound_tx);

    let socket_path = bridge_socket_path()?;
    let listener = bind_with_probe(&socket_path, service.tunables.dial_timeout).await?;
    info!(socket = %socket_path.display(), channels = service.adapters.len(), "bridge ready");

    let mut typing = tokio::time::interval(service.tunables.typing_tick_interval);
    typing.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut inbound_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            inbound = inbound_rx.recv(), if inbound_open => match inbound {
                Some(message) => {
                    service
                        .handle_inbound(&message.target_agent, &message.from, &message.body)
                        .await;
                }
                None => inbound_open = false,
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(Arc::clone(&service), stream));
                }
                Err(e) => {
                    debug!("bridge socket accept failed: {e}");
                    break;
                }
            },
            _ = typing.tick() => service.typing_tick().await,
        }
    }

    for adapter in service.adapters() {
        adapter.close();
    }
    let _ = std::fs::remove_file(&socket_path);
    info!("bridge stopped");
    Ok(())
}

async fn handle_connection(service: Arc<BridgeService>, mut stream: UnixStream) {
    loop {
        match read_frame::<Request>(&mut stream).await {
            Ok(Some(request)) => {
                let (response, keep_open) = handle_request(&service, &request).await;
                if write_frame(&mut stream, &response).await.is_err() {
                    break;
                }
                if !keep_open {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ =
                    write_frame(&mut stream, &Response::error(format!("protocol error: {e}")))
                        .await;
                break;
            }
        }
    }
}

async fn handle_request(service: &Arc<BridgeService>, request: &Request) -> (Response, bool) {
    match request.kind.as_str() {
        // Outbound from a session toward the chat channels.
        "send" => {
            let Some(ref from) = request.from else {
                return (Response::error("send requires a from agent"), true);
            };
            let Some(ref body) = request.body else {
                return (Response::error("send requires a body"), true);
            };
            match service.handle_outbound(from, body).await {
                Ok(()) => (Response::ok(), true),
                Err(e) => (Response::error(e.to_string()), true),
            }
        }
        "set-concierge" => {
            let Some(ref name) = request.body else {
                return (Response::error("set-concierge requires an agent name"), true);
            };
            let old = service.set_concierge(name).await;
            let mut response = Response::ok();
            response.old_concierge = old;
            (response, true)
        }
        "remove-concierge" => match service.remove_concierge().await {
            Ok(removed) => {
                let mut response = Response::ok();
                response.old_concierge = Some(removed);
                (response, true)
            }
            Err(e) => (Response::error(e.to_string()), true),
        },
        "status" => {
            let mut response = Response::ok();
            response.bridge = Some(service.bridge_info());
            (response, true)
        }
        "stop" => {
            service.cancel_token().cancel();
            (Response::ok(), false)
        }
        other => (Response::error(format!("unknown request type: {other}")), false),
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
