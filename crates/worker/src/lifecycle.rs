// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker lifecycle: startup, serving, shutdown.
//!
//! The socket is bound before any accept happens, so the socket file's
//! existence is the startup signal the manager polls for. On shutdown
//! the socket file is removed again: the file exists if and only if the
//! worker is accepting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::executor::{self, ExecutorHandle};
use crate::jobs::{JobStore, DEFAULT_JOB_TTL, DEFAULT_SWEEP_INTERVAL};
use crate::listener::{ListenCtx, Listener};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// SQLite database file this worker owns.
    pub db_path: PathBuf,
    /// Unix socket to accept on.
    pub socket_path: PathBuf,
    /// Worker log file (stdout when absent).
    pub log_path: Option<PathBuf>,
    /// Age after which unclaimed job records are reclaimed.
    pub job_ttl: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl WorkerConfig {
    /// Build a config with default TTL/sweep values, honoring the env
    /// overrides tests use.
    pub fn new(db_path: impl Into<PathBuf>, socket_path: impl Into<PathBuf>) -> Self {
        WorkerConfig {
            db_path: db_path.into(),
            socket_path: socket_path.into(),
            log_path: None,
            job_ttl: crate::env::job_ttl_ms().unwrap_or(DEFAULT_JOB_TTL),
            sweep_interval: crate::env::sweep_interval_ms().unwrap_or(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything `run` needs after a successful startup.
struct StartupResult {
    listener: UnixListener,
    ctx: Arc<ListenCtx>,
    executor: ExecutorHandle,
}

fn startup(config: &WorkerConfig) -> Result<StartupResult, LifecycleError> {
    // Downstream code inside this process may open SQLite directly
    // instead of proxying to its own socket.
    cadb_core::env::mark_worker_process();

    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove stale socket and bind (bind happens before any accept, so
    // socket-file existence implies a listening worker).
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let jobs = Arc::new(Mutex::new(JobStore::new()));
    let (executor_tx, executor) = executor::spawn(&config.db_path, Arc::clone(&jobs))?;

    info!(
        db = %config.db_path.display(),
        socket = %config.socket_path.display(),
        "worker ready, accepting connections"
    );

    Ok(StartupResult {
        listener,
        ctx: Arc::new(ListenCtx {
            jobs,
            executor: executor_tx,
        }),
        executor,
    })
}

/// Run the worker until `shutdown` is notified.
///
/// The binary wires SIGTERM/SIGINT to the notify; tests trigger it
/// directly to host a worker in-process.
pub async fn run(config: WorkerConfig, shutdown: Arc<Notify>) -> Result<(), LifecycleError> {
    let StartupResult {
        listener,
        ctx,
        executor,
    } = startup(&config)?;

    spawn_sweeper(
        Arc::clone(&ctx.jobs),
        config.sweep_interval,
        config.job_ttl,
    );

    Listener::new(listener, Arc::clone(&ctx)).run(shutdown).await;

    // Socket first: no new clients while we drain.
    if config.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            warn!("failed to remove socket file: {}", e);
        }
    }

    // Dropping the context closes the task channel once in-flight
    // connection tasks finish; the executor drains and exits.
    drop(ctx);
    executor.join();

    info!("worker stopped");
    Ok(())
}

/// Periodically reclaim job records older than the TTL.
fn spawn_sweeper(jobs: Arc<Mutex<JobStore>>, interval: Duration, ttl: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately; harmless against an empty map
        loop {
            tick.tick().await;
            let removed = jobs.lock().sweep_expired(ttl);
            if removed > 0 {
                info!(removed, "cleaned up expired jobs");
            }
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
