// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database worker process (cadb-worker).
//!
//! Owns one SQLite file and serves the submit/poll/delete protocol on a
//! Unix socket. Started by the client-side worker manager; not meant to
//! be invoked by hand.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;
use std::sync::Arc;

use cadb_worker::{lifecycle, LifecycleError, WorkerConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("--version" | "-V" | "-v") => {
            println!("cadb-worker {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help" | "-h" | "help") => {
            print_help();
            return Ok(());
        }
        _ => {}
    }

    let config = match args.as_slice() {
        [db_path, socket_path] => WorkerConfig::new(db_path, socket_path),
        [db_path, socket_path, log_path] => {
            let mut config = WorkerConfig::new(db_path, socket_path);
            config.log_path = Some(PathBuf::from(log_path));
            config
        }
        _ => {
            eprintln!("error: expected <db_path> <socket_path> [log_path]");
            eprintln!("Usage: cadb-worker <db_path> <socket_path> [log_path]");
            std::process::exit(1);
        }
    };

    if let Some(log_path) = &config.log_path {
        rotate_log_if_needed(log_path);
        write_startup_marker(log_path)?;
    }

    let _log_guard = setup_logging(&config)?;

    info!(
        db = %config.db_path.display(),
        socket = %config.socket_path.display(),
        "starting database worker"
    );

    // Graceful shutdown on SIGTERM/SIGINT: flip the shutdown notify and
    // let the listener drain.
    let shutdown = Arc::new(Notify::new());
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
            }
            shutdown.notify_one();
        });
    }

    if let Err(e) = lifecycle::run(config.clone(), shutdown).await {
        if let Some(log_path) = &config.log_path {
            write_startup_error(log_path, &e);
        }
        return Err(e.into());
    }

    Ok(())
}

fn print_help() {
    println!("cadb-worker {}", env!("CARGO_PKG_VERSION"));
    println!("Database worker - owns one SQLite file and serves clients over a Unix socket");
    println!();
    println!("USAGE:");
    println!("    cadb-worker <db_path> <socket_path> [log_path]");
    println!();
    println!("The worker is started by the client library's worker manager and");
    println!("should not be invoked directly. Clients submit jobs over the");
    println!("socket and poll for results.");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version information");
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 5;

/// Rotate the worker log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `worker.log` into numbered backups, deleting the oldest.
/// Best-effort: rotation failures must not stop the worker.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to the log before anything else, so a
/// reader can find where the current startup attempt begins.
const STARTUP_MARKER_PREFIX: &str = "--- cadb-worker: starting (pid: ";

fn write_startup_marker(log_path: &std::path::Path) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

/// Write a startup error synchronously, so it is visible even if the
/// process exits before the non-blocking tracing writer flushes.
fn write_startup_error(log_path: &std::path::Path, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start worker: {}", error);
}

fn setup_logging(
    config: &WorkerConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_path) = &config.log_path else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let dir = log_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "worker.log".into());

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(Some(guard))
}
