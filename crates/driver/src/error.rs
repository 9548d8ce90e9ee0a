// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver error taxonomy.
//!
//! Every driver method either returns a normal result or raises one of
//! these kinds; operation-level failures and timeouts carry the full
//! structured context (operation, database, truncated SQL, parameters,
//! timeout) so callers can log without re-deriving it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use cadb_core::SqlValue;
use cadb_worker::protocol::ProtocolError;
use thiserror::Error;

/// Structured context attached to operation failures and timeouts.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: String,
    pub db_path: PathBuf,
    /// Truncated SQL preview.
    pub sql: Option<String>,
    pub params: Option<Vec<SqlValue>>,
    pub timeout: Duration,
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation={} db_path={}",
            self.operation,
            self.db_path.display()
        )?;
        if let Some(sql) = &self.sql {
            write!(f, " sql={sql:?}")?;
        }
        if let Some(params) = &self.params {
            write!(f, " params={params:?}")?;
        }
        write!(f, " timeout={:?}", self.timeout)
    }
}

/// Client-side errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Spawn attempted from a daemon subprocess; the worker must be
    /// started by an ancestor instead.
    #[error(
        "Cannot start DB worker from a daemon process. \
         DB worker must be started from the main process before daemon workers start. \
         Database path: {db_path}"
    )]
    DaemonSpawnForbidden { db_path: PathBuf },

    /// Worker did not come up (spawn failed, early exit, or the socket
    /// never appeared). Fatal to the driver instance.
    #[error("Failed to start DB worker: {0}")]
    Startup(String),

    /// Socket-level failure after the reconnect attempt.
    #[error("Error communicating with worker ({context}): {message}")]
    Transport {
        context: Box<OperationContext>,
        message: String,
    },

    /// Malformed or unexpected frames. Not retried.
    #[error("Protocol error ({context}): {source}")]
    Protocol {
        context: Box<OperationContext>,
        source: ProtocolError,
    },

    /// The SQL itself failed on the worker. Not retried.
    #[error("Database operation failed ({context}): {message}")]
    Operation {
        context: Box<OperationContext>,
        message: String,
    },

    /// The poll loop exceeded the command timeout. The orphaned job is
    /// reclaimed by the worker's TTL sweep.
    #[error("Database operation timed out ({context})")]
    Timeout { context: Box<OperationContext> },

    /// Transaction misuse on the client side (e.g. beginning a second
    /// transaction on a driver that already has one active).
    #[error("Transaction misuse: {0}")]
    TransactionMisuse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
