// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: launch, supervise, relaunch or quit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{h2_dir, session_dir, Tunables};
use crate::event::{AgentEvent, EventPayload};
use crate::event_log::EventWriter;
use crate::monitor::{Monitor, EVENT_CHANNEL_CAPACITY};
use crate::pty::{ExitStatus, PtyHost};
use crate::socket::{agent_socket_path, bind_with_probe};

use super::delivery::{delivery_loop, heartbeat_loop, status_tick_loop};
use super::{rpc, Session, SessionControl, SessionSpec};

/// Run a session headless at the spec's default size.
pub async fn run_daemon(spec: SessionSpec, tunables: Tunables) -> anyhow::Result<ExitStatus> {
    run(Session::new(spec, tunables)).await
}

/// Run a session sized to the controlling terminal.
pub async fn run_interactive(
    mut spec: SessionSpec,
    tunables: Tunables,
) -> anyhow::Result<ExitStatus> {
    size_to_terminal(&mut spec);
    run(Session::new(spec, tunables)).await
}

/// Resize a spec to the controlling terminal, when there is one.
pub fn size_to_terminal(spec: &mut SessionSpec) {
    if let Ok(winsize) = rustix::termios::tcgetwinsize(std::io::stdout()) {
        if winsize.ws_col > 0 && winsize.ws_row > 0 {
            spec.cols = winsize.ws_col;
            spec.rows = winsize.ws_row;
            spec.child_rows = winsize.ws_row;
        }
    }
}

/// Full lifecycle: setup, launch, supervise until quit or cancellation.
pub async fn run(session: Arc<Session>) -> anyhow::Result<ExitStatus> {
    let cancel = session.cancel_token();
    let spec = session.spec().clone();
    let h2_root = h2_dir();

    // Agent setup: config dir, launch plan, env + argv composition.
    session.harness().ensure_config_dir(&h2_root)?;
    let plan = session
        .harness()
        .prepare_for_launch(&spec.name, spec.session_id.as_deref(), false)
        .await?;

    let session_path = session_dir(&spec.name);
    let mut env = session.harness().build_command_env(&h2_root);
    env.extend(plan.env.iter().cloned());
    env.push(("H2_DIR".to_owned(), h2_root.display().to_string()));
    env.push(("H2_ACTOR".to_owned(), spec.name.clone()));
    if let Some(ref role) = spec.role_name {
        env.push(("H2_ROLE".to_owned(), role.clone()));
    }
    env.push(("H2_SESSION_DIR".to_owned(), session_path.display().to_string()));
    env.extend(spec.extra_env.iter().cloned());

    let mut argv = vec![session.harness().command().to_owned()];
    argv.extend(session.harness().build_command_args(
        &spec.args_config,
        &plan.prepend_args,
        &spec.extra_args,
    ));

    // Socket probe before the child exists: a name collision must abort
    // without ever spawning.
    let socket_path = agent_socket_path(&spec.name)?;
    let listener = match bind_with_probe(&socket_path, session.tunables().dial_timeout).await {
        Ok(listener) => listener,
        Err(e) => {
            session.harness().stop().await;
            return Err(e);
        }
    };

    // Event log + first child.
    session.current_monitor().set_writer(EventWriter::new(Some(&session_path)));
    let pty = Arc::new(
        PtyHost::spawn(
            &argv,
            &env,
            spec.rows,
            spec.cols,
            spec.child_rows,
            session.tunables().pty_write_timeout,
        )
        .with_context(|| format!("spawning {}", session.harness().display_command()))?,
    );
    session.install_pty(Arc::clone(&pty));
    session.remember_launch(argv, env);
    info!(name = %spec.name, command = %session.harness().display_command(), "session started");

    // External event channel: harness → dispatcher → current monitor.
    let (events_tx, mut events_rx) = mpsc::channel::<AgentEvent>(EVENT_CHANNEL_CAPACITY);
    {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(event) => session.current_monitor().process_event(&event),
                        None => break,
                    },
                }
            }
        });
    }
    {
        let harness = Arc::clone(session.harness());
        let cancel = cancel.clone();
        let tx = events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = harness.start(cancel, tx).await {
                warn!("harness stopped with error: {e}");
            }
        });
    }
    tokio::spawn(delivery_loop(Arc::clone(&session)));
    tokio::spawn(status_tick_loop(Arc::clone(&session)));
    if let Some(heartbeat) = spec.heartbeat.clone() {
        tokio::spawn(heartbeat_loop(Arc::clone(&session), heartbeat));
    }
    tokio::spawn(rpc::serve(Arc::clone(&session), listener));
    spawn_read_pump(&session, &pty);

    // Supervise until quit.
    let mut control_rx = session
        .take_control_rx()
        .await
        .ok_or_else(|| anyhow::anyhow!("session already running"))?;

    let status = loop {
        let Some(pty) = session.current_pty() else {
            anyhow::bail!("no child process");
        };
        tokio::select! {
            status = pty.wait_exited() => {
                session.queue().pause();
                let _ = events_tx.send(AgentEvent::now(EventPayload::SessionEnded)).await;
                session.notify_viewers_state();
                info!(outcome = %status.describe(), "child exited");

                tokio::select! {
                    control = control_rx.recv() => match control {
                        Some(SessionControl::Relaunch) => {
                            if let Err(e) = relaunch(&session).await {
                                cancel.cancel();
                                session.harness().stop().await;
                                let _ = std::fs::remove_file(&socket_path);
                                return Err(e);
                            }
                            continue;
                        }
                        Some(SessionControl::Quit) | None => break status,
                    },
                    _ = cancel.cancelled() => break status,
                }
            }
            control = control_rx.recv() => match control {
                Some(SessionControl::Quit) | None => {
                    break shutdown_child(&pty, session.tunables().shutdown_grace).await;
                }
                // Relaunch only makes sense after an exit.
                Some(SessionControl::Relaunch) => continue,
            },
            _ = cancel.cancelled() => {
                break shutdown_child(&pty, session.tunables().shutdown_grace).await;
            }
        }
    };

    cancel.cancel();
    session.harness().stop().await;
    let _ = std::fs::remove_file(&socket_path);
    info!(outcome = %status.describe(), "session finished");
    Ok(status)
}

/// Rebuild PTY + virtual terminal + monitor, reusing the composed
/// launch parameters, then resume delivery.
pub(crate) async fn relaunch(session: &Arc<Session>) -> anyhow::Result<()> {
    let (argv, env) = session
        .launch_parameters()
        .ok_or_else(|| anyhow::anyhow!("relaunch before first launch"))?;
    let spec = session.spec();

    let pty = Arc::new(PtyHost::spawn(
        &argv,
        &env,
        spec.rows,
        spec.cols,
        spec.child_rows,
        session.tunables().pty_write_timeout,
    )?);

    // Fresh monitor (clears the sticky exit) seeded with cumulative
    // metrics; the event log keeps appending to the same file.
    let monitor = Arc::new(Monitor::with_metrics(session.current_monitor().metrics()));
    monitor.set_writer(EventWriter::new(Some(&session_dir(&spec.name))));
    session.install_monitor(monitor);
    session.install_pty(Arc::clone(&pty));
    spawn_read_pump(session, &pty);

    session.queue().unpause();
    info!(name = %spec.name, "relaunched");
    Ok(())
}

fn spawn_read_pump(session: &Arc<Session>, pty: &Arc<PtyHost>) {
    let harness = Arc::clone(session.harness());
    Arc::clone(pty).spawn_read_pump(
        Some(Arc::new(move |_chunk: &[u8]| harness.handle_output())),
        session.cancel_token(),
    );
}

/// SIGHUP the child group, give it the grace period, then SIGKILL.
async fn shutdown_child(pty: &Arc<PtyHost>, grace: Duration) -> ExitStatus {
    signal_group_hup(pty);
    match tokio::time::timeout(grace, pty.wait_exited()).await {
        Ok(status) => status,
        Err(_) => {
            debug!("shutdown grace elapsed, killing child group");
            pty.kill();
            pty.wait_exited().await
        }
    }
}

fn signal_group_hup(pty: &Arc<PtyHost>) {
    let pid = pty.child_pid() as i32;
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(-pid),
        nix::sys::signal::Signal::SIGHUP,
    );
}
