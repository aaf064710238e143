// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session RPC over the agent's unix socket.
//!
//! Length-prefixed JSON frames; one request, one response, connection
//! kept open for pipelined requests. Protocol errors (malformed frames,
//! unknown types) answer `{ok:false, error}` and close the connection
//! without touching the service.

use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::socket::{read_frame, write_frame, Request, Response};

use super::Session;

enum Disposition {
    Continue,
    Close,
    Stop,
}

/// Accept connections until the session is cancelled.
pub async fn serve(session: Arc<Session>, listener: UnixListener) {
    let cancel = session.cancel_token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(Arc::clone(&session), stream));
                }
                Err(e) => {
                    debug!("agent socket accept failed: {e}");
                    break;
                }
            },
        }
    }
}

async fn handle_connection(session: Arc<Session>, mut stream: UnixStream) {
    loop {
        match read_frame::<Request>(&mut stream).await {
            Ok(Some(request)) => {
                let (response, disposition) = handle_request(&session, &request);
                if write_frame(&mut stream, &response).await.is_err() {
                    break;
                }
                match disposition {
                    Disposition::Continue => {}
                    Disposition::Close => break,
                    Disposition::Stop => {
                        session.request_quit();
                        session.cancel_token().cancel();
                        break;
                    }
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

fn handle_request(session: &Session, request: &Request) -> (Response, Disposition) {
    match request.kind.as_str() {
        "send" => {
            let Some(ref body) = request.body else {
                return (Response::error("send requires a body"), Disposition::Continue);
            };
            let from = request.from.as_deref().unwrap_or("unknown");
            match session.enqueue(from, request.priority.as_deref(), body) {
                Ok(id) => (Response::message_id(id.to_string()), Disposition::Continue),
                Err(e) => (Response::error(e.to_string()), Disposition::Continue),
            }
        }
        "status" => {
            let mut response = Response::ok();
            response.agent = Some(session.agent_info());
            (response, Disposition::Continue)
        }
        "stop" => (Response::ok(), Disposition::Stop),
        other => (
            Response::error(format!("unknown request type: {other}")),
            Disposition::Close,
        ),
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
