// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{exec_command, find_in_path, split_shell_args};

const DEADLINE: Duration = Duration::from_secs(5);

#[test]
fn splits_plain_words() -> anyhow::Result<()> {
    assert_eq!(split_shell_args("a b  c")?, ["a", "b", "c"]);
    assert_eq!(split_shell_args("")?, Vec::<String>::new());
    Ok(())
}

#[test]
fn honors_quotes_and_escapes() -> anyhow::Result<()> {
    assert_eq!(split_shell_args("'one two' three")?, ["one two", "three"]);
    assert_eq!(split_shell_args("\"a b\" c")?, ["a b", "c"]);
    assert_eq!(split_shell_args("a\\ b")?, ["a b"]);
    assert_eq!(split_shell_args("\"quoted \\\" inner\"")?, ["quoted \" inner"]);
    // Backslash before a non-special char inside double quotes is kept.
    assert_eq!(split_shell_args("\"a\\nb\"")?, ["a\\nb"]);
    Ok(())
}

#[test]
fn rejects_unterminated_quotes() {
    assert!(split_shell_args("'oops").is_err());
    assert!(split_shell_args("\"oops").is_err());
    assert!(split_shell_args("trailing\\").is_err());
}

#[test]
fn finds_common_binaries_on_path() {
    assert!(find_in_path("sh").is_some());
    assert!(find_in_path("definitely-not-a-command-xyz").is_none());
}

#[tokio::test]
async fn true_with_no_output_formats_placeholder() {
    assert_eq!(exec_command("true", "", DEADLINE).await, "(no output)");
}

#[tokio::test]
async fn echo_output_is_trimmed() {
    assert_eq!(exec_command("echo", "hello world", DEADLINE).await, "hello world");
}

#[tokio::test]
async fn nonzero_exit_formats_error() {
    let out = exec_command("false", "", DEADLINE).await;
    assert!(out.starts_with("ERROR (exit 1):"), "got: {out}");
}

#[tokio::test]
async fn stderr_is_captured() {
    let out = exec_command("sh", "-c 'echo oops >&2; exit 3'", DEADLINE).await;
    assert!(out.starts_with("ERROR (exit 3):"), "got: {out}");
    assert!(out.contains("oops"));
}

#[tokio::test]
async fn unknown_command_reports_not_found() {
    let out = exec_command("no-such-binary-here", "", DEADLINE).await;
    assert!(out.contains("command not found"));
}

#[tokio::test]
async fn deadline_kills_and_reports_timeout() {
    let out = exec_command("sleep", "30", Duration::from_millis(100)).await;
    assert!(out.starts_with("ERROR (timeout after 0s):"), "got: {out}");
}
