// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identity and the operation/status vocabulary of the wire protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Client-chosen identifier for one submitted job.
    ///
    /// Unique within a worker for the lifetime of the job record; the
    /// worker rejects submissions that collide with a live record.
    #[derive(Default)]
    pub struct JobId;
}

crate::define_id! {
    /// Identifier for a long-lived transaction.
    ///
    /// Transactions outlive any single socket connection, so every
    /// transactional job carries this id instead of relying on
    /// connection identity. An id must not be reused after the
    /// transaction terminates.
    #[derive(Default)]
    pub struct TransactionId;
}

/// Lifecycle state of a job record on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued or executing; no result yet.
    Pending,
    /// Executed to completion.
    Completed,
    /// Execution raised an error.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database operation carried by a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Execute,
    Fetchone,
    Fetchall,
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    GetTableInfo,
    SyncSchema,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Execute => "execute",
            Operation::Fetchone => "fetchone",
            Operation::Fetchall => "fetchall",
            Operation::BeginTransaction => "begin_transaction",
            Operation::CommitTransaction => "commit_transaction",
            Operation::RollbackTransaction => "rollback_transaction",
            Operation::GetTableInfo => "get_table_info",
            Operation::SyncSchema => "sync_schema",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
