// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed worker discovery.
//!
//! A shared temp directory holds one socket file and one pid file per
//! database. The on-disk state is authoritative across processes; any
//! in-process cache is only an optimization. Validity of an entry is
//! decided by pid liveness, not by file existence.

use std::io;
use std::path::{Path, PathBuf};

use crate::env;

/// Default registry directory on the host.
pub const DEFAULT_REGISTRY_DIR: &str = "/tmp/code_analysis_db_workers";

/// Per-database registry entry paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPaths {
    /// Unix-domain socket the worker accepts on.
    pub socket: PathBuf,
    /// ASCII pid of the worker process.
    pub pid: PathBuf,
}

/// Resolve the registry directory (env override wins).
pub fn registry_dir() -> PathBuf {
    env::workers_dir().unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_DIR))
}

/// Resolve the registry directory, creating it if missing.
pub fn ensure_registry_dir() -> io::Result<PathBuf> {
    let dir = registry_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Registry entry paths for a database, keyed by the file stem.
///
/// `/data/t1.db` maps to `<dir>/t1.sock` and `<dir>/t1.pid`. Distinct
/// databases sharing a stem collide; last writer wins for the socket path
/// and pid liveness decides which entry is valid.
pub fn worker_paths(db_path: &Path) -> WorkerPaths {
    let dir = registry_dir();
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    WorkerPaths {
        socket: dir.join(format!("{stem}.sock")),
        pid: dir.join(format!("{stem}.pid")),
    }
}

/// Canonicalize a database path for use as a registry key.
///
/// The file itself may not exist yet (SQLite creates it on first open), so
/// only the parent directory is resolved; it is created if missing.
pub fn canonicalize_db_path(db_path: &Path) -> io::Result<PathBuf> {
    let file_name = db_path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("database path has no file name: {}", db_path.display()),
        )
    })?;
    let parent = match db_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    Ok(parent.canonicalize()?.join(file_name))
}

/// Read a pid file. Returns `None` if missing or unparsable.
pub fn read_pid(pid_path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(pid_path).ok()?;
    content.trim().parse::<u32>().ok()
}

/// Write a pid file.
pub fn write_pid(pid_path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(pid_path, format!("{pid}\n"))
}

/// Remove a registry entry's socket and pid files. Best-effort.
pub fn remove_entry(paths: &WorkerPaths) {
    let _ = std::fs::remove_file(&paths.socket);
    let _ = std::fs::remove_file(&paths.pid);
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
