// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process management.
//!
//! One manager per process, but the truth lives on disk: pid and socket
//! files in the registry directory decide which worker owns a database,
//! and pid liveness decides whether an entry is stale. The in-process
//! cache only avoids re-reading the registry on every call.
//!
//! At most one live worker exists per database path; a caller that
//! finds a dead entry adopts it (removes the files) and may start a
//! fresh worker. A process flagged as a daemon subprocess must not
//! spawn; it relies on a worker started earlier by its parent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use cadb_core::registry::{self, WorkerPaths};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::DriverError;

/// How long to wait for a spawned worker's socket to appear.
const SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for SIGTERM before escalating to SIGKILL.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling interval for spawn/stop waits.
const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// What a caller needs to talk to a worker.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub socket_path: PathBuf,
    pub pid: u32,
}

/// Cached handle for a worker this process knows about.
struct WorkerHandle {
    pid: u32,
    paths: WorkerPaths,
    /// Present only for workers this process spawned itself.
    child: Option<Child>,
}

impl WorkerHandle {
    /// Liveness check. Uses `try_wait` for our own children (which also
    /// reaps them), `kill -0` for adopted workers.
    fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(_) => process_exists(self.pid),
            },
            None => process_exists(self.pid),
        }
    }
}

/// Process-wide worker manager.
pub struct WorkerManager {
    workers: Mutex<HashMap<PathBuf, WorkerHandle>>,
}

/// Global manager instance (same lifetime as the process).
pub fn manager() -> &'static WorkerManager {
    static MANAGER: OnceLock<WorkerManager> = OnceLock::new();
    MANAGER.get_or_init(WorkerManager::new)
}

impl WorkerManager {
    fn new() -> Self {
        WorkerManager {
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Get the live worker for `db_path`, adopting a registered one or
    /// starting a new process as needed.
    pub fn get_or_start(
        &self,
        db_path: &Path,
        log_path: Option<&Path>,
    ) -> Result<WorkerInfo, DriverError> {
        let db_path = registry::canonicalize_db_path(db_path)?;
        let mut workers = self.workers.lock();

        if let Some(handle) = workers.get_mut(&db_path) {
            if handle.is_alive() {
                debug!(db = %db_path.display(), "using existing worker");
                return Ok(WorkerInfo {
                    socket_path: handle.paths.socket.clone(),
                    pid: handle.pid,
                });
            }
            warn!(db = %db_path.display(), "worker died, removing stale entry");
            if let Some(handle) = workers.remove(&db_path) {
                registry::remove_entry(&handle.paths);
            }
        }

        let paths = registry::worker_paths(&db_path);

        // Adopt a worker registered by another process, or its corpse.
        match registry::read_pid(&paths.pid) {
            Some(pid) if process_exists(pid) => {
                info!(db = %db_path.display(), pid, "adopting running worker");
                workers.insert(
                    db_path.clone(),
                    WorkerHandle {
                        pid,
                        paths: paths.clone(),
                        child: None,
                    },
                );
                return Ok(WorkerInfo {
                    socket_path: paths.socket,
                    pid,
                });
            }
            Some(pid) => {
                warn!(db = %db_path.display(), pid, "adopting dead registry entry");
                registry::remove_entry(&paths);
            }
            None if paths.socket.exists() => {
                // socket without a pid file is an orphan
                warn!(socket = %paths.socket.display(), "removing orphaned socket file");
                registry::remove_entry(&paths);
            }
            None => {}
        }

        if cadb_core::env::is_daemon_process() {
            return Err(DriverError::DaemonSpawnForbidden { db_path });
        }

        let SpawnedWorker { info, child } = spawn_worker(&db_path, &paths, log_path)?;
        workers.insert(
            db_path,
            WorkerHandle {
                pid: info.pid,
                paths,
                child: Some(child),
            },
        );
        Ok(info)
    }

    /// Stop the worker for `db_path`, if this process knows one.
    pub fn stop_worker(&self, db_path: &Path) {
        let Ok(db_path) = registry::canonicalize_db_path(db_path) else {
            return;
        };
        let handle = self.workers.lock().remove(&db_path);
        if let Some(handle) = handle {
            info!(db = %db_path.display(), pid = handle.pid, "stopping worker");
            stop_handle(handle);
        }
    }

    /// Stop every worker this process started or adopted.
    pub fn stop_all_workers(&self) {
        let handles: Vec<(PathBuf, WorkerHandle)> = self.workers.lock().drain().collect();
        for (db_path, handle) in handles {
            info!(db = %db_path.display(), pid = handle.pid, "stopping worker");
            stop_handle(handle);
        }
    }
}

struct SpawnedWorker {
    info: WorkerInfo,
    child: Child,
}

fn spawn_worker(
    db_path: &Path,
    paths: &WorkerPaths,
    log_path: Option<&Path>,
) -> Result<SpawnedWorker, DriverError> {
    registry::ensure_registry_dir()?;

    let binary = find_worker_binary();
    info!(
        db = %db_path.display(),
        socket = %paths.socket.display(),
        binary = %binary.display(),
        "starting new DB worker"
    );

    let mut command = Command::new(&binary);
    command
        .arg(db_path)
        .arg(&paths.socket)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Some(log_path) = log_path {
        command.arg(log_path);
    }

    let mut child = command
        .spawn()
        .map_err(|e| DriverError::Startup(format!("failed to spawn {}: {e}", binary.display())))?;

    wait_for_socket(&paths.socket, &mut child)?;

    let pid = child.id();
    registry::write_pid(&paths.pid, pid)?;
    info!(pid, socket = %paths.socket.display(), "DB worker started");

    Ok(SpawnedWorker {
        info: WorkerInfo {
            socket_path: paths.socket.clone(),
            pid,
        },
        child,
    })
}

/// Poll for the worker's socket file, watching for early child exit.
///
/// The worker binds before accepting, so existence of the socket file
/// means the worker is (about to be) serving. The driver's first request
/// re-validates and triggers one reconnect, giving a second safety net.
fn wait_for_socket(socket_path: &Path, child: &mut Child) -> Result<(), DriverError> {
    let start = Instant::now();
    while start.elapsed() < SPAWN_TIMEOUT {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(DriverError::Startup(format!(
                    "worker exited with {status} before binding its socket"
                )));
            }
            Ok(None) | Err(_) => {}
        }

        if socket_path.exists() {
            return Ok(());
        }
        std::thread::sleep(WAIT_INTERVAL);
    }

    Err(DriverError::Startup(format!(
        "worker socket not created after {SPAWN_TIMEOUT:?}: {}",
        socket_path.display()
    )))
}

/// SIGTERM, wait, then SIGKILL; remove the registry entry either way.
fn stop_handle(mut handle: WorkerHandle) {
    if handle.is_alive() {
        kill_signal("-15", handle.pid);

        let start = Instant::now();
        while start.elapsed() < STOP_TIMEOUT && handle.is_alive() {
            std::thread::sleep(Duration::from_millis(50));
        }

        if handle.is_alive() {
            warn!(pid = handle.pid, "worker ignored SIGTERM, sending SIGKILL");
            kill_signal("-9", handle.pid);
            let start = Instant::now();
            while start.elapsed() < STOP_TIMEOUT && handle.is_alive() {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    registry::remove_entry(&handle.paths);
}

/// Find the worker binary: env override, then a sibling of the current
/// executable, then `$PATH`.
fn find_worker_binary() -> PathBuf {
    if let Some(path) = crate::env::worker_binary() {
        return PathBuf::from(path);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("cadb-worker");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("cadb-worker")
}

/// Execute `kill` with the given signal and pid.
fn kill_signal(signal: &str, pid: u32) -> bool {
    Command::new("kill")
        .args([signal, &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check whether a process with the given pid exists (`kill -0`).
pub fn process_exists(pid: u32) -> bool {
    kill_signal("-0", pid)
}

/// Probe whether a Unix socket is accepting connections.
pub fn probe_socket(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
