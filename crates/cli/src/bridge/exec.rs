// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whitelisted shell execution for chat channels.
//!
//! The allowlist check lives in the bridge; this module resolves the
//! command on PATH, splits arguments shell-style, and runs with a
//! deadline. All outcomes are formatted strings; chat transports have
//! no use for structured errors.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Split an argument string with shell-style quoting: single quotes are
/// literal, double quotes allow backslash escapes, and a backslash
/// outside quotes escapes the next character.
pub fn split_shell_args(input: &str) -> anyhow::Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        match quote {
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let Some(next) = chars.next() else {
                        anyhow::bail!("trailing backslash");
                    };
                    current.push(next);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
            Quote::Single => match c {
                '\'' => quote = Quote::None,
                c => current.push(c),
            },
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => {
                    let Some(next) = chars.next() else {
                        anyhow::bail!("trailing backslash in quotes");
                    };
                    if next == '"' || next == '\\' {
                        current.push(next);
                    } else {
                        current.push('\\');
                        current.push(next);
                    }
                }
                c => current.push(c),
            },
        }
    }
    if quote != Quote::None {
        anyhow::bail!("unterminated quote");
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// Look up `command` on PATH (or verify a path containing `/`).
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    let is_executable = |path: &PathBuf| {
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };

    if command.contains('/') {
        let path = PathBuf::from(command);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let candidate = PathBuf::from(dir).join(command);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Execute a command with a deadline and return formatted output.
///
/// - success with no output: `"(no output)"`
/// - non-zero exit: `"ERROR (exit N):\n<trimmed output>"`
/// - deadline exceeded: `"ERROR (timeout after Ns):\n<trimmed output>"`
pub async fn exec_command(command: &str, args: &str, timeout: Duration) -> String {
    let Some(program) = find_in_path(command) else {
        return format!("ERROR: command not found: {command}");
    };
    let args = match split_shell_args(args) {
        Ok(args) => args,
        Err(e) => return format!("ERROR: invalid arguments: {e}"),
    };

    let mut child = match Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return format!("ERROR: failed to spawn {command}: {e}"),
    };

    // Drain both pipes concurrently so a chatty child cannot deadlock on
    // a full pipe while we wait for exit.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    // None = deadline exceeded.
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => Some(result),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            None
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let mut combined = String::from_utf8_lossy(&stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&stderr));
    let trimmed = combined.trim();

    match status {
        None => format!("ERROR (timeout after {}s):\n{trimmed}", timeout.as_secs()),
        Some(Ok(status)) if status.success() => {
            if trimmed.is_empty() {
                "(no output)".to_owned()
            } else {
                trimmed.to_owned()
            }
        }
        Some(Ok(status)) => {
            format!("ERROR (exit {}):\n{trimmed}", status.code().unwrap_or(-1))
        }
        Some(Err(e)) => format!("ERROR: wait failed: {e}"),
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
