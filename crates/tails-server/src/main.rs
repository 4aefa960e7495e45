//! `tails` binary
//!
//! Tails a file and streams each new line to connected browsers over
//! Server-Sent Events.

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tails_core::Broker;
use tails_core::source::{FileFollower, SourceKind, SourceSupervisor, TailProcess};
use tails_core::tracing_init::{default_filter, init_tracing};
use tails_server::cli::{
    ABOUT_TEXT, COMMANDS_TEXT, Cli, Command, HELP_TEXT, NO_ARGUMENTS, ServeOptions,
    UNKNOWN_COMMAND,
};
use tails_server::routes::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let text = match cli.command {
        None => NO_ARGUMENTS,
        Some(Command::Help) => HELP_TEXT,
        Some(Command::Commands) => COMMANDS_TEXT,
        Some(Command::About) => ABOUT_TEXT,
        Some(Command::Unknown(_)) => UNKNOWN_COMMAND,
        Some(Command::Serve(args)) => {
            let options = args.load_options()?;
            init_tracing(&default_filter(&options.log_level), options.log_json);
            return serve(options).await;
        }
    };
    print_text(text);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_text(text: &str) {
    println!("{text}");
}

async fn serve(options: ServeOptions) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let broker = Broker::spawn(options.broker.clone());

    let supervisor = SourceSupervisor::new(broker.clone(), options.restart.clone());
    let source_status = supervisor.status();
    let source_task = {
        let path = options.path.clone();
        let token = shutdown.clone();
        let kind = options.source;
        let tail = options.tail.clone();
        let follow = options.follow.clone();
        tokio::spawn(async move {
            let result = match kind {
                SourceKind::Tail => supervisor.run(TailProcess::new(path, tail), token).await,
                SourceKind::Follow => supervisor.run(FileFollower::new(path, follow), token).await,
            };
            if let Err(e) = result {
                error!(error = %e, "Line source stopped, open streams will receive no new lines");
            }
        })
    };

    let app = build_router(AppState {
        broker,
        source_status,
        stream: options.stream.clone(),
        assets_dir: options.assets_dir.clone(),
        path: options.path.clone(),
        shutdown: shutdown.clone(),
    });

    if !options.assets_dir.join("index.html").exists() {
        warn!(
            assets_dir = %options.assets_dir.display(),
            "index.html not found, the web page will return 404"
        );
    }

    let listener = tokio::net::TcpListener::bind(options.addr)
        .await
        .with_context(|| format!("Failed to bind {}", options.addr))?;
    info!(
        addr = %options.addr,
        path = %options.path.display(),
        source = %options.source,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    let _ = source_task.await;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels `token` so open streams end.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        () = sigterm => {
            info!("Received SIGTERM shutdown signal");
        }
    }
    token.cancel();
}
