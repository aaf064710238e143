// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY host integration: real children on real pseudo-terminals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use h2::pty::PtyHost;

const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
}

fn spawn(script: &str) -> anyhow::Result<Arc<PtyHost>> {
    Ok(Arc::new(PtyHost::spawn(&sh(script), &[], 24, 80, 24, WRITE_TIMEOUT)?))
}

async fn poll_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn child_output_fills_the_virtual_terminal() -> anyhow::Result<()> {
    let pty = spawn("printf 'hello from child'; sleep 30")?;
    let cancel = CancellationToken::new();
    Arc::clone(&pty).spawn_read_pump(None, cancel.clone());

    let mut found = false;
    for _ in 0..100 {
        let snapshot = pty.with_screen(|screen| screen.snapshot()).await;
        if snapshot.lines.iter().any(|l| l.contains("hello from child")) {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(found, "child output never reached the screen");

    pty.kill();
    let status = pty.wait_exited().await;
    assert_eq!(status.signal, Some(9));
    assert!(pty.child_exited());
    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn exit_code_is_captured() -> anyhow::Result<()> {
    let pty = spawn("exit 3")?;
    Arc::clone(&pty).spawn_read_pump(None, CancellationToken::new());

    let status = tokio::time::timeout(Duration::from_secs(5), pty.wait_exited()).await?;
    assert_eq!(status.code, Some(3));
    assert_eq!(status.describe(), "exited with code 3");
    Ok(())
}

#[tokio::test]
async fn writes_reach_the_child() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let out = tmp.path().join("seen");
    let pty = spawn(&format!("cat > {}", out.display()))?;
    Arc::clone(&pty).spawn_read_pump(None, CancellationToken::new());

    pty.write(b"typed input\r").await?;

    assert!(
        poll_until(|| {
            std::fs::read_to_string(&out)
                .map(|s| s.contains("typed input"))
                .unwrap_or(false)
        })
        .await,
        "child never observed the write"
    );

    pty.kill();
    pty.wait_exited().await;

    // Writing to an exited child is a closed pipe.
    assert!(pty.write(b"late").await.is_err());
    Ok(())
}

#[tokio::test]
async fn osc_color_query_is_answered() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let out = tmp.path().join("reply");
    // The child asks for the foreground color and records what comes
    // back on its stdin.
    let pty = spawn(&format!("printf '\\033]10;?\\007'; cat > {}", out.display()))?;
    Arc::clone(&pty).spawn_read_pump(None, CancellationToken::new());

    assert!(
        poll_until(|| {
            std::fs::read(&out).map(|bytes| !bytes.is_empty()).unwrap_or(false)
        })
        .await,
        "no OSC reply arrived"
    );

    let reply = std::fs::read(&out)?;
    let text = String::from_utf8_lossy(&reply);
    assert!(text.starts_with("\x1b]10;rgb:"), "unexpected reply: {text:?}");

    pty.kill();
    pty.wait_exited().await;
    Ok(())
}

#[tokio::test]
async fn stalled_child_write_flips_hung_and_kills() -> anyhow::Result<()> {
    // The child never reads stdin, so a large write must back up in the
    // kernel buffer and trip the deadline.
    let pty = spawn("sleep 30")?;
    Arc::clone(&pty).spawn_read_pump(None, CancellationToken::new());

    let blob = vec![b'x'; 4 * 1024 * 1024];
    let result = pty.write(&blob).await;
    assert!(result.is_err(), "giant write should have timed out");
    assert!(pty.child_hung());

    // The process group was killed; the exit is observable.
    let status = tokio::time::timeout(Duration::from_secs(5), pty.wait_exited()).await?;
    assert_eq!(status.signal, Some(9));
    Ok(())
}

#[tokio::test]
async fn on_data_callback_runs_for_each_chunk() -> anyhow::Result<()> {
    let chunks = Arc::new(AtomicU64::new(0));
    let counter = chunks.clone();

    let pty = spawn("printf 'a'; sleep 0.05; printf 'b'; sleep 30")?;
    Arc::clone(&pty).spawn_read_pump(
        Some(Arc::new(move |_chunk: &[u8]| {
            counter.fetch_add(1, Ordering::Relaxed);
        })),
        CancellationToken::new(),
    );

    assert!(poll_until(|| chunks.load(Ordering::Relaxed) >= 2).await);
    pty.kill();
    pty.wait_exited().await;
    Ok(())
}

#[tokio::test]
async fn resize_updates_virtual_terminal() -> anyhow::Result<()> {
    let pty = spawn("sleep 30")?;
    Arc::clone(&pty).spawn_read_pump(None, CancellationToken::new());

    pty.resize(40, 120, 30).await?;
    let snapshot = pty.with_screen(|screen| screen.snapshot()).await;
    assert_eq!(snapshot.cols, 120);
    assert_eq!(snapshot.rows, 40);

    pty.kill();
    pty.wait_exited().await;
    Ok(())
}
