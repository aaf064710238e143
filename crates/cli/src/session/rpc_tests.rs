// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::config::Tunables;
use crate::session::{Session, SessionSpec};
use crate::socket::{read_frame, request, Request, Response};

const FAST_DIAL: Duration = Duration::from_millis(500);

struct Served {
    session: Arc<Session>,
    path: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

fn serve() -> anyhow::Result<Served> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("agent-alpha.sock");
    let session = Session::new(SessionSpec::minimal("alpha", "cat"), Tunables::fast());
    let listener = tokio::net::UnixListener::bind(&path)?;
    tokio::spawn(super::serve(Arc::clone(&session), listener));
    Ok(Served { session, path, _tmp: tmp })
}

#[tokio::test]
async fn send_enqueues_and_returns_message_id() -> anyhow::Result<()> {
    let served = serve()?;
    let response =
        request(&served.path, &Request::send("bridge", "high", "do the thing"), FAST_DIAL).await?;

    assert!(response.ok);
    let id = response.message_id.ok_or_else(|| anyhow::anyhow!("no message id"))?;
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let (pending, _) = served.session.queue().pending_count();
    assert_eq!(pending, 1);
    let popped = served.session.queue().pop_ready().ok_or_else(|| anyhow::anyhow!("empty"))?;
    assert_eq!(popped.body, "do the thing");
    assert_eq!(popped.from, "bridge");
    Ok(())
}

#[tokio::test]
async fn send_without_body_is_an_error() -> anyhow::Result<()> {
    let served = serve()?;
    let response = request(&served.path, &Request::new("send"), FAST_DIAL).await?;
    assert!(!response.ok);
    assert!(response.error.unwrap_or_default().contains("body"));
    Ok(())
}

#[tokio::test]
async fn status_returns_agent_snapshot() -> anyhow::Result<()> {
    let served = serve()?;
    served.session.enqueue("tester", None, "pending msg")?;

    let response = request(&served.path, &Request::new("status"), FAST_DIAL).await?;
    assert!(response.ok);
    let agent = response.agent.ok_or_else(|| anyhow::anyhow!("no agent info"))?;
    assert_eq!(agent.name, "alpha");
    assert_eq!(agent.state, "initialized");
    assert_eq!(agent.message_queue_pending, 1);
    Ok(())
}

#[tokio::test]
async fn stop_acks_then_cancels_session() -> anyhow::Result<()> {
    let served = serve()?;
    let response = request(&served.path, &Request::new("stop"), FAST_DIAL).await?;
    assert!(response.ok);

    tokio::time::timeout(Duration::from_secs(1), served.session.cancel_token().cancelled())
        .await?;
    Ok(())
}

#[tokio::test]
async fn unknown_type_answers_error() -> anyhow::Result<()> {
    let served = serve()?;
    let response = request(&served.path, &Request::new("restart"), FAST_DIAL).await?;
    assert!(!response.ok);
    assert!(response.error.unwrap_or_default().contains("unknown request type"));
    Ok(())
}

#[tokio::test]
async fn malformed_frame_answers_protocol_error_and_closes() -> anyhow::Result<()> {
    let served = serve()?;
    let mut stream = UnixStream::connect(&served.path).await?;

    let garbage = b"this is not json";
    stream.write_all(&(garbage.len() as u32).to_be_bytes()).await?;
    stream.write_all(garbage).await?;

    let response: Option<Response> = read_frame(&mut stream).await?;
    let response = response.ok_or_else(|| anyhow::anyhow!("no response"))?;
    assert!(!response.ok);
    assert!(response.error.unwrap_or_default().contains("protocol error"));

    // The connection is closed after a protocol error.
    let next: Option<Response> = read_frame(&mut stream).await?;
    assert!(next.is_none());
    Ok(())
}

#[tokio::test]
async fn connections_support_pipelined_requests() -> anyhow::Result<()> {
    let served = serve()?;
    let mut stream = UnixStream::connect(&served.path).await?;

    for i in 0..3 {
        crate::socket::write_frame(
            &mut stream,
            &Request::send("pipeline", "normal", &format!("m{i}")),
        )
        .await?;
        let response: Option<Response> = read_frame(&mut stream).await?;
        assert!(response.map(|r| r.ok).unwrap_or(false));
    }

    assert_eq!(served.session.queue().pending_count().0, 3);
    Ok(())
}
