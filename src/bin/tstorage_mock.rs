//! TStorage mock server CLI.
//!
//! Listens on `127.0.0.1:2090` and serves the TStorage wire protocol
//! against an in-memory store. Exits cleanly on SIGINT and SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tstorage_client::mock::{Server, DEFAULT_ADDR};

#[derive(Debug, Parser)]
#[command(
    name = "tstorage-mock",
    about = "A simple, non-persistent TStorage mock server for testing purposes, \
             mimicking the behaviour of a suboptimally configured single-node \
             TStorage system. Intended for users without direct access to a \
             TStorage instance who wish to experiment with the client code."
)]
struct Args {
    /// Output server's internal event info to standard output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log TCP traffic to a file located in PATH
    #[arg(short, long, value_name = "PATH")]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("tstorage_client={level}"))),
        )
        .init();

    let mut server = match Server::bind(DEFAULT_ADDR).await {
        Ok(server) => server,
        Err(error) => {
            eprintln!("cannot listen on {DEFAULT_ADDR}: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(path) = &args.log {
        server = match server.with_traffic_log(path) {
            Ok(server) => server,
            Err(error) => {
                eprintln!("cannot open traffic log {}: {error}", path.display());
                return ExitCode::FAILURE;
            }
        };
    }

    println!("Listening...");
    tokio::select! {
        result = server.serve() => {
            if let Err(error) = result {
                eprintln!("server failed: {error}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        _ = shutdown_signal() => {
            info!("server closed");
            println!("Server closed");
            ExitCode::SUCCESS
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
