// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access shared by worker and driver.

use std::path::PathBuf;

/// Set by the worker process for itself, so code running inside the worker
/// can detect "I am the worker" and open SQLite directly instead of
/// proxying to its own socket.
pub const WORKER_FLAG: &str = "CODE_ANALYSIS_DB_WORKER";

/// Set when this process was forked off as a daemon subprocess. A flagged
/// process must not spawn workers; it may only connect to one started
/// earlier by an ancestor.
pub const DAEMON_FLAG: &str = "CODE_ANALYSIS_DAEMON";

/// Override for the worker registry directory (used by tests for isolation).
pub const WORKERS_DIR_VAR: &str = "CODE_ANALYSIS_DB_WORKERS_DIR";

fn flag_set(var: &str) -> bool {
    std::env::var(var).is_ok_and(|v| v == "1")
}

/// Whether the current process is a database worker.
pub fn is_worker_process() -> bool {
    flag_set(WORKER_FLAG)
}

/// Whether the current process is a daemon subprocess (may not spawn workers).
pub fn is_daemon_process() -> bool {
    flag_set(DAEMON_FLAG)
}

/// Mark the current process as a database worker.
pub fn mark_worker_process() {
    std::env::set_var(WORKER_FLAG, "1");
}

/// Registry directory override, if set.
pub fn workers_dir() -> Option<PathBuf> {
    std::env::var(WORKERS_DIR_VAR)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}
