// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory job records, owned by the worker.
//!
//! Clients are expected to delete jobs after reading their results; the
//! TTL sweep reclaims anything they forget (crashed clients, expired
//! poll loops). The map is shared between connection tasks and the
//! executor thread behind a mutex.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cadb_core::{JobId, JobStatus, Operation};
use serde_json::Value;

use crate::protocol::ErrorPayload;

/// Default job time-to-live (5 minutes).
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(300);

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One submitted job and whatever result it has accumulated.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub operation: Operation,
    pub status: JobStatus,
    /// Operation-level success flag, echoed by poll once terminal.
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<ErrorPayload>,
    pub created_at: Instant,
}

/// Terminal state written by the executor.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub success: bool,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<ErrorPayload>,
}

impl JobOutcome {
    pub fn completed(result: Value) -> Self {
        JobOutcome {
            success: true,
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: ErrorPayload) -> Self {
        JobOutcome {
            success: false,
            status: JobStatus::Failed,
            result: None,
            error: Some(error),
        }
    }
}

/// Job id collision on submit.
#[derive(Debug, PartialEq, Eq)]
pub struct DuplicateJob(pub JobId);

/// The per-worker job map.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobId, JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        JobStore::default()
    }

    /// Insert a pending record for a freshly submitted job.
    ///
    /// Ids are client-chosen and must be unique within the worker while
    /// the record lives; collisions are rejected.
    pub fn insert_pending(
        &mut self,
        job_id: JobId,
        operation: Operation,
    ) -> Result<(), DuplicateJob> {
        if self.jobs.contains_key(&job_id) {
            return Err(DuplicateJob(job_id));
        }
        self.jobs.insert(
            job_id,
            JobRecord {
                operation,
                status: JobStatus::Pending,
                success: false,
                result: None,
                error: None,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Record the executor's outcome for a job.
    ///
    /// A record deleted or swept while executing is left deleted; the
    /// result is simply dropped.
    pub fn finish(&mut self, job_id: &JobId, outcome: JobOutcome) {
        if let Some(record) = self.jobs.get_mut(job_id) {
            record.status = outcome.status;
            record.success = outcome.success;
            record.result = outcome.result;
            record.error = outcome.error;
        }
    }

    /// Snapshot a job for a poll reply.
    pub fn poll(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.get(job_id).cloned()
    }

    /// Remove a job record. Returns whether it existed.
    pub fn delete(&mut self, job_id: &JobId) -> bool {
        self.jobs.remove(job_id).is_some()
    }

    /// Remove jobs older than `ttl`, returning how many were reclaimed.
    pub fn sweep_expired(&mut self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.jobs.len();
        self.jobs
            .retain(|_, record| now.duration_since(record.created_at) <= ttl);
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
