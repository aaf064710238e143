// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY host: owns one child process on a pseudo-terminal.
//!
//! Writes are serialized under the shared virtual-terminal mutex so a
//! slow child can never interleave torn updates with the renderer, and
//! are bounded by a deadline: a kernel buffer that stays full past the
//! timeout marks the child hung, kills its process group, and surfaces a
//! closed-pipe error (callers treat this as an exit).

pub mod nbio;
pub mod osc;

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::screen::Screen;

use nbio::{read_chunk, set_nonblocking, write_all, PtyFd};
use osc::{OscColors, OscScanner};

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Human-readable classification for the exit banner.
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) => "exited".to_owned(),
        }
    }
}

/// Callback invoked from the read pump with each output chunk, under the
/// shared virtual-terminal mutex.
pub type OnData = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// One child process on a PTY, plus the virtual terminal its output
/// renders into.
pub struct PtyHost {
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
    /// The shared VT mutex: guards the virtual terminal, all PTY writes,
    /// and the render callback.
    vt: Mutex<Screen>,
    colors: OscColors,
    write_timeout: Duration,
    child_exited: AtomicBool,
    child_hung: AtomicBool,
    exit_status: parking_lot::RwLock<Option<ExitStatus>>,
    exit_notify: Notify,
}

impl PtyHost {
    /// Spawn `command` on a new PTY with the supplied environment.
    ///
    /// The kernel terminal is sized `(child_rows, cols)`; the virtual
    /// terminal is sized `(rows, cols)`. `command` must be non-empty.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(
        command: &[String],
        env: &[(String, String)],
        rows: u16,
        cols: u16,
        child_rows: u16,
        write_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if command.is_empty() {
            bail!("empty command");
        }

        let winsize =
            Winsize { ws_col: cols, ws_row: child_rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                // Child process: set env and exec.
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("H2", "1");
                for (key, value) in env {
                    std::env::set_var(key, value);
                }

                let c_args: Vec<CString> = command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<_, _>>()
                    .context("invalid command argument")?;

                execvp(&c_args[0], &c_args).context("execvp failed")?;
                unreachable!();
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;
                Ok(Self {
                    master: afd,
                    child_pid: child,
                    vt: Mutex::new(Screen::new(cols, rows)),
                    colors: OscColors::from_env(),
                    write_timeout,
                    child_exited: AtomicBool::new(false),
                    child_hung: AtomicBool::new(false),
                    exit_status: parking_lot::RwLock::new(None),
                    exit_notify: Notify::new(),
                })
            }
        }
    }

    pub fn child_pid(&self) -> u32 {
        self.child_pid.as_raw() as u32
    }

    pub fn child_exited(&self) -> bool {
        self.child_exited.load(Ordering::Acquire)
    }

    pub fn child_hung(&self) -> bool {
        self.child_hung.load(Ordering::Acquire)
    }

    /// Captured exit status, once the child is gone.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit_status.read()
    }

    /// Write bytes to the child under the shared VT mutex.
    ///
    /// If the kernel buffer stays full past the write timeout the child
    /// is declared hung, its process group is killed, and a closed-pipe
    /// error is returned.
    pub async fn write(&self, data: &[u8]) -> anyhow::Result<usize> {
        if self.child_exited() || self.child_hung() {
            bail!(closed_pipe());
        }
        let _vt = self.vt.lock().await;
        match tokio::time::timeout(self.write_timeout, write_all(&self.master, data)).await {
            Ok(Ok(())) => Ok(data.len()),
            Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => {
                bail!(closed_pipe())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => {
                warn!(
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "pty write deadline exceeded, killing child group"
                );
                self.child_hung.store(true, Ordering::Release);
                self.kill();
                bail!(closed_pipe())
            }
        }
    }

    /// Run a closure against the virtual terminal under the shared mutex.
    pub async fn with_screen<R>(&self, f: impl FnOnce(&mut Screen) -> R) -> R {
        let mut vt = self.vt.lock().await;
        f(&mut vt)
    }

    /// Resize the virtual terminal to `(rows, cols)` and the kernel
    /// terminal to `(child_rows, cols)`.
    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub async fn resize(&self, rows: u16, cols: u16, child_rows: u16) -> anyhow::Result<()> {
        {
            let mut vt = self.vt.lock().await;
            vt.resize(cols, rows);
        }

        let ws = Winsize { ws_col: cols, ws_row: child_rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
        // size on the PTY master fd. The Winsize struct is properly
        // initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Kill the child's process group.
    pub fn kill(&self) {
        let _ = kill(Pid::from_raw(-self.child_pid.as_raw()), Signal::SIGKILL);
    }

    /// Wait until the child has exited and its status is captured.
    pub async fn wait_exited(&self) -> ExitStatus {
        loop {
            let notified = self.exit_notify.notified();
            if let Some(status) = self.exit_status() {
                return status;
            }
            notified.await;
        }
    }

    /// Spawn the read pump: drains child output into the virtual
    /// terminal, answers OSC color queries, and invokes `on_data` under
    /// the VT mutex. Reaps the child and records its exit status when
    /// output ends.
    pub fn spawn_read_pump(
        self: Arc<Self>,
        on_data: Option<OnData>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let host = self;
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            let mut scanner = OscScanner::new();
            loop {
                let n = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = read_chunk(&host.master, &mut buf) => match result {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => {
                            debug!("pty read error: {e}");
                            break;
                        }
                    },
                };

                let data = &buf[..n];
                let queries = scanner.scan(data);
                let mut vt = host.vt.lock().await;
                vt.feed(data);
                for query in queries {
                    let reply = host.colors.reply(query);
                    if let Err(e) = write_all(&host.master, &reply).await {
                        debug!("osc reply write failed: {e}");
                    }
                }
                if let Some(ref callback) = on_data {
                    callback(data);
                }
            }

            host.reap().await;
        })
    }

    /// Reap the child on a blocking thread and record the exit.
    async fn reap(&self) {
        if self.exit_status().is_some() {
            return;
        }
        let pid = self.child_pid;
        let status = tokio::task::spawn_blocking(move || wait_for_exit(pid)).await;
        let status = match status {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("waitpid failed: {e}");
                ExitStatus { code: Some(1), signal: None }
            }
            Err(e) => {
                warn!("reap task failed: {e}");
                ExitStatus { code: Some(1), signal: None }
            }
        };
        *self.exit_status.write() = Some(status);
        self.child_exited.store(true, Ordering::Release);
        self.exit_notify.notify_waiters();
    }
}

impl Drop for PtyHost {
    fn drop(&mut self) {
        if self.child_exited() {
            return;
        }
        // Best-effort graceful shutdown: SIGHUP then SIGKILL.
        let _ = kill(self.child_pid, Signal::SIGHUP);
        std::thread::sleep(Duration::from_millis(50));
        let _ = kill(self.child_pid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

fn closed_pipe() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pty closed")
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                // Already reaped (e.g. by Drop).
                return Ok(ExitStatus { code: None, signal: None });
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
