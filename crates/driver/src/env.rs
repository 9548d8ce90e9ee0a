// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the driver crate.

use std::time::Duration;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Total per-call timeout override (default 30 s).
pub fn command_timeout() -> Option<Duration> {
    parse_duration_ms("CODE_ANALYSIS_DB_TIMEOUT_MS")
}

/// Poll interval override (default 10 ms).
pub fn poll_interval() -> Option<Duration> {
    parse_duration_ms("CODE_ANALYSIS_DB_POLL_MS")
}

/// Per-frame socket timeout override (default 5 s).
pub fn socket_timeout() -> Option<Duration> {
    parse_duration_ms("CODE_ANALYSIS_DB_SOCKET_TIMEOUT_MS")
}

/// Explicit worker binary location.
pub fn worker_binary() -> Option<String> {
    std::env::var("CODE_ANALYSIS_DB_WORKER_BIN").ok()
}
