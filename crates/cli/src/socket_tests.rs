// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use tokio::net::UnixStream;

use super::*;

const FAST_DIAL: Duration = Duration::from_millis(500);

#[tokio::test]
async fn frame_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("frame.sock");
    let listener = tokio::net::UnixListener::bind(&path)?;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        let request: Option<Request> = read_frame(&mut stream).await?;
        let request = request.ok_or_else(|| anyhow::anyhow!("eof"))?;
        anyhow::ensure!(request.kind == "send");
        anyhow::ensure!(request.body.as_deref() == Some("hello"));
        write_frame(&mut stream, &Response::message_id("m-1")).await?;
        Ok::<_, anyhow::Error>(())
    });

    let response = request(&path, &Request::send("me", "normal", "hello"), FAST_DIAL).await?;
    assert!(response.ok);
    assert_eq!(response.message_id.as_deref(), Some("m-1"));
    server.await??;
    Ok(())
}

#[tokio::test]
async fn read_frame_rejects_oversized_length() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("big.sock");
    let listener = tokio::net::UnixListener::bind(&path)?;

    let client = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let mut stream = UnixStream::connect(&path).await?;
        stream.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await?;
        // Keep the connection open so the server reads the bogus length.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<_, anyhow::Error>(())
    });

    let (mut stream, _) = listener.accept().await?;
    let result = read_frame::<Request>(&mut stream).await;
    assert!(result.is_err());
    client.await??;
    Ok(())
}

#[tokio::test]
async fn read_frame_returns_none_on_clean_eof() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("eof.sock");
    let listener = tokio::net::UnixListener::bind(&path)?;

    let client = tokio::spawn(async move {
        let stream = UnixStream::connect(&path).await?;
        drop(stream);
        Ok::<_, anyhow::Error>(())
    });

    let (mut stream, _) = listener.accept().await?;
    let frame = read_frame::<Request>(&mut stream).await?;
    assert!(frame.is_none());
    client.await??;
    Ok(())
}

#[tokio::test]
async fn probe_refuses_live_socket_and_recovers_stale() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("probe.sock");

    // Live owner: bind refuses.
    let live = tokio::net::UnixListener::bind(&path)?;
    let result = bind_with_probe(&path, FAST_DIAL).await;
    assert!(result.is_err(), "probe should refuse a live socket");
    drop(live);

    // Stale file with no listener: unlinked and re-bound.
    assert!(path.exists());
    let listener = bind_with_probe(&path, FAST_DIAL).await?;
    drop(listener);
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn sockets_dir_created_mode_0700() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    std::env::set_var("H2_DIR", tmp.path());

    let dir = sockets_dir()?;
    let mode = std::fs::metadata(&dir)?.permissions().mode();
    assert_eq!(mode & 0o777, 0o700);

    std::env::remove_var("H2_DIR");
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn agent_sockets_list_lexicographically() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    std::env::set_var("H2_DIR", tmp.path());

    let dir = sockets_dir()?;
    std::fs::write(dir.join("agent-beta.sock"), b"")?;
    std::fs::write(dir.join("agent-alpha.sock"), b"")?;
    std::fs::write(dir.join("bridge-user.sock"), b"")?;
    std::fs::write(dir.join("unrelated.txt"), b"")?;

    assert_eq!(list_agent_sockets(), ["alpha", "beta"]);

    std::env::remove_var("H2_DIR");
    Ok(())
}

#[test]
fn response_constructors() {
    let ok = Response::ok();
    assert!(ok.ok);
    let err = Response::error("nope");
    assert!(!err.ok);
    assert_eq!(err.error.as_deref(), Some("nope"));
}

#[test]
fn request_wire_shape_uses_type_key() -> anyhow::Result<()> {
    let value = serde_json::to_value(Request::send("tg-user", "normal", "hi"))?;
    assert_eq!(value["type"], "send");
    assert_eq!(value["priority"], "normal");
    assert_eq!(value["from"], "tg-user");
    assert_eq!(value["body"], "hi");

    let status = serde_json::to_value(Request::new("status"))?;
    assert_eq!(status["type"], "status");
    assert!(status.get("priority").is_none());
    Ok(())
}
