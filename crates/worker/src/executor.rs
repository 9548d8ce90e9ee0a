// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serial SQL executor.
//!
//! One dedicated OS thread drains the task channel in submit order and
//! runs every SQL operation on it. The thread owns the transaction
//! registry outright, so transactional jobs execute exactly in the
//! order their submits were acknowledged, and SQLite's single-writer
//! rule holds without further locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use cadb_core::{JobId, Operation, SqlValue, TransactionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::jobs::{JobOutcome, JobStore};
use crate::protocol::{ErrorPayload, SchemaDef};
use crate::sql::{self, TxRegistry};

/// One unit of work for the executor thread.
#[derive(Debug)]
pub struct JobTask {
    pub job_id: JobId,
    pub operation: Operation,
    pub sql: Option<String>,
    /// Normalized: an omitted `params` field and an empty array are the
    /// same thing.
    pub params: Vec<SqlValue>,
    pub table_name: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub schema_definition: Option<SchemaDef>,
    pub backup_dir: Option<PathBuf>,
}

/// Handle for joining the executor thread at shutdown.
pub struct ExecutorHandle {
    thread: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Wait for the executor to drain and exit. Called after the last
    /// task sender has been dropped.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("executor thread panicked");
        }
    }
}

/// Spawn the executor thread for `db_path`.
pub fn spawn(
    db_path: &Path,
    jobs: Arc<Mutex<JobStore>>,
) -> std::io::Result<(mpsc::UnboundedSender<JobTask>, ExecutorHandle)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let db_path = sql::prepare_db_path(db_path)?;
    let thread = std::thread::Builder::new()
        .name("sql-executor".to_string())
        .spawn(move || run_loop(db_path, jobs, rx))?;
    Ok((tx, ExecutorHandle { thread }))
}

fn run_loop(
    db_path: PathBuf,
    jobs: Arc<Mutex<JobStore>>,
    mut rx: mpsc::UnboundedReceiver<JobTask>,
) {
    let mut txns = TxRegistry::new();

    while let Some(task) = rx.blocking_recv() {
        let job_id = task.job_id.clone();
        debug!(job_id = %job_id, operation = %task.operation, "executing job");

        let outcome = match sql::run_task(&db_path, &mut txns, &task) {
            Ok(result) => JobOutcome::completed(result),
            Err(failure) => {
                warn!(
                    job_id = %job_id,
                    operation = %task.operation,
                    error = %failure.message,
                    sql = failure.sql.as_deref().unwrap_or(""),
                    "database operation failed"
                );
                JobOutcome::failed(ErrorPayload::Operation(failure.into_operation_error()))
            }
        };

        jobs.lock().finish(&job_id, outcome);
    }

    if !txns.is_empty() {
        warn!(open = txns.len(), "rolling back transactions left open at shutdown");
        txns.rollback_all();
    }
}
