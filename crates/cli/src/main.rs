// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use h2::bridge::{self, BridgeService};
use h2::client::{self, NameArgs, SendArgs};
use h2::config::{init_tracing, RunConfig, Tunables};
use h2::session::{self, Session, SessionSpec};

#[derive(Parser)]
#[command(name = "h2", version, about = "Multi-agent workstation supervisor.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Launch and supervise one agent session.
    Run(RunConfig),
    /// Queue a message for a running session.
    Send(SendArgs),
    /// Print a session's status snapshot.
    Status(NameArgs),
    /// Stop a running session.
    Stop(NameArgs),
    /// Run the bridge routing service.
    Bridge(BridgeArgs),
}

/// Configuration for the `bridge` verb.
#[derive(Debug, clap::Args)]
struct BridgeArgs {
    /// Commands chat channels may execute (repeatable).
    #[arg(long = "allow-command")]
    allowed_commands: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "H2_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "H2_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => {
            init_tracing(&config.log_level, &config.log_format);

            let mut spec = match SessionSpec::from_run_config(&config) {
                Ok(spec) => spec,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            };
            if !config.daemon {
                session::run::size_to_terminal(&mut spec);
            }

            let session = Session::new(spec, Tunables::default());
            spawn_signal_handler(session.cancel_token());

            match session::run::run(session).await {
                Ok(status) => std::process::exit(status.code.unwrap_or(1)),
                Err(e) => {
                    error!("fatal: {e:#}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Send(args) => {
            std::process::exit(client::run_send(&args).await);
        }
        Commands::Status(args) => {
            std::process::exit(client::run_status(&args).await);
        }
        Commands::Stop(args) => {
            std::process::exit(client::run_stop(&args).await);
        }
        Commands::Bridge(args) => {
            init_tracing(&args.log_level, &args.log_format);
            if args.allowed_commands.is_empty() {
                tracing::warn!("no --allow-command entries; channel exec is disabled");
            }

            // Concrete channel adapters (Telegram, macOS, ...) are wired
            // by deployment-specific builds; the stock binary runs the
            // routing service alone.
            let service = BridgeService::new(vec![], args.allowed_commands, Tunables::default());
            spawn_signal_handler(service.cancel_token());

            if let Err(e) = bridge::service::serve(service).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
            std::process::exit(0);
        }
    }
}

/// Cancel the parent context on SIGINT/SIGTERM.
fn spawn_signal_handler(cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(signal) => signal,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        cancel.cancel();
    });
}
