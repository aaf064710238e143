// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket clients backing the `send`, `status`, and `stop` verbs.

use clap::Parser;

use crate::config::Tunables;
use crate::socket::{agent_socket_path, request, Request};

/// Queue a message for a running session.
#[derive(Debug, Parser)]
pub struct SendArgs {
    /// Session name.
    pub name: String,
    /// Message body.
    pub body: String,
    /// Priority: low | normal | high | critical.
    #[arg(long, default_value = "normal")]
    pub priority: String,
    /// Sender identity recorded on the message.
    #[arg(long, default_value = "cli")]
    pub from: String,
}

/// Name-only argument for `status` and `stop`.
#[derive(Debug, Parser)]
pub struct NameArgs {
    /// Session name.
    pub name: String,
}

/// Run the `send` verb. Returns a process exit code.
pub async fn run_send(args: &SendArgs) -> i32 {
    let outcome = async {
        let path = agent_socket_path(&args.name)?;
        request(
            &path,
            &Request::send(&args.from, &args.priority, &args.body),
            Tunables::default().dial_timeout,
        )
        .await
    }
    .await;

    match outcome {
        Ok(response) if response.ok => {
            if let Some(id) = response.message_id {
                println!("{id}");
            }
            0
        }
        Ok(response) => {
            eprintln!("error: {}", response.error.unwrap_or_else(|| "send failed".to_owned()));
            1
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

/// Run the `status` verb. Prints the agent snapshot as JSON.
pub async fn run_status(args: &NameArgs) -> i32 {
    let outcome = async {
        let path = agent_socket_path(&args.name)?;
        request(&path, &Request::new("status"), Tunables::default().dial_timeout).await
    }
    .await;

    match outcome {
        Ok(response) => match response.agent {
            Some(agent) => {
                match serde_json::to_string_pretty(&agent) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("error: {e}");
                        return 1;
                    }
                }
                0
            }
            None => {
                eprintln!(
                    "error: {}",
                    response.error.unwrap_or_else(|| "no status returned".to_owned())
                );
                1
            }
        },
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

/// Run the `stop` verb.
pub async fn run_stop(args: &NameArgs) -> i32 {
    let outcome = async {
        let path = agent_socket_path(&args.name)?;
        request(&path, &Request::new("stop"), Tunables::default().dial_timeout).await
    }
    .await;

    match outcome {
        Ok(response) if response.ok => 0,
        Ok(response) => {
            eprintln!("error: {}", response.error.unwrap_or_else(|| "stop failed".to_owned()));
            1
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
