// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the worker crate.

use std::time::Duration;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Job TTL override (used by tests; default 5 minutes).
pub fn job_ttl_ms() -> Option<Duration> {
    parse_duration_ms("CODE_ANALYSIS_DB_JOB_TTL_MS")
}

/// Sweep interval override (used by tests; default 60 seconds).
pub fn sweep_interval_ms() -> Option<Duration> {
    parse_duration_ms("CODE_ANALYSIS_DB_SWEEP_MS")
}
