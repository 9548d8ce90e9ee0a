// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy driver: the client-side object implementing the driver
//! contract by speaking the worker's wire protocol.
//!
//! Every call is three phases over short-lived sockets: submit a job,
//! poll until terminal, delete. Nothing is pinned to a connection, so
//! the driver survives worker restarts between calls and transactions
//! are identified by id, never by socket.
//!
//! The driver is safe to share between threads; its only mutable state
//! is the active transaction id, the cached socket path, and the last
//! insert rowid, each behind a mutex.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cadb_core::{JobId, JobStatus, Operation, SqlValue, TransactionId};
use cadb_worker::protocol::{self, Request, Response, SchemaDef};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{DriverError, OperationContext};
use crate::manager::manager;

/// Default total timeout for one driver call.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default sleep between polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default per-frame socket timeout.
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// Total per-call timeout.
    pub command_timeout: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Per-frame socket timeout.
    pub socket_timeout: Duration,
    /// Log file handed to a spawned worker.
    pub worker_log_path: Option<PathBuf>,
}

impl DriverConfig {
    /// Defaults plus env overrides for the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DriverConfig {
            path: path.into(),
            command_timeout: crate::env::command_timeout().unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            poll_interval: crate::env::poll_interval().unwrap_or(DEFAULT_POLL_INTERVAL),
            socket_timeout: crate::env::socket_timeout().unwrap_or(DEFAULT_SOCKET_TIMEOUT),
            worker_log_path: None,
        }
    }
}

/// A row as it crosses the JSON boundary: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result of an `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteResult {
    pub lastrowid: Option<i64>,
    pub rowcount: i64,
}

/// One column described by `get_table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub notnull: i64,
    pub dflt_value: Option<String>,
    pub pk: i64,
}

/// Report returned by `sync_schema`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    #[serde(default)]
    pub backup_uuid: Option<String>,
    #[serde(default)]
    pub changes_applied: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The neutral driver contract consumed by the rest of the platform.
pub trait DatabaseDriver: Send + Sync {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteResult, DriverError>;
    fn fetchone(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DriverError>;
    fn fetchall(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DriverError>;
    fn commit(&self) -> Result<(), DriverError>;
    fn rollback(&self) -> Result<(), DriverError>;
    fn lastrowid(&self) -> Option<i64>;
    fn create_schema(&self, statements: &[String]) -> Result<(), DriverError>;
    fn get_table_info(&self, table_name: &str) -> Result<Vec<ColumnInfo>, DriverError>;
}

/// Proxy driver bound to one database path.
#[derive(Debug)]
pub struct ProxyDriver {
    db_path: PathBuf,
    config: DriverConfig,
    socket_path: Mutex<Option<PathBuf>>,
    last_rowid: Mutex<Option<i64>>,
    transaction_id: Mutex<Option<TransactionId>>,
}

impl ProxyDriver {
    /// Resolve the database path, locate or start its worker, and bind
    /// this driver to the worker's socket.
    pub fn connect(config: DriverConfig) -> Result<Self, DriverError> {
        let db_path = cadb_core::registry::canonicalize_db_path(&config.path)?;
        let info = manager().get_or_start(&db_path, config.worker_log_path.as_deref())?;
        debug!(db = %db_path.display(), socket = %info.socket_path.display(), "driver connected");

        Ok(ProxyDriver {
            db_path,
            config,
            socket_path: Mutex::new(Some(info.socket_path)),
            last_rowid: Mutex::new(None),
            transaction_id: Mutex::new(None),
        })
    }

    /// Drop client-side state. The worker stays up for other clients;
    /// the next call on this driver re-resolves it through the manager.
    pub fn disconnect(&self) {
        *self.socket_path.lock() = None;
        debug!(db = %self.db_path.display(), "driver disconnected (worker remains running)");
    }

    /// The database path this driver is bound to.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Begin a transaction under a generated id and store it on the
    /// driver; subsequent calls are tagged with it until commit or
    /// rollback.
    pub fn begin_transaction(&self) -> Result<TransactionId, DriverError> {
        let id = TransactionId::new(format!("tx_{}", job_suffix()));
        self.begin_transaction_with_id(id.clone())?;
        Ok(id)
    }

    /// Begin a transaction under a caller-chosen id.
    pub fn begin_transaction_with_id(
        &self,
        id: impl Into<TransactionId>,
    ) -> Result<(), DriverError> {
        let id = id.into();
        {
            let active = self.transaction_id.lock();
            if let Some(active) = active.as_ref() {
                return Err(DriverError::TransactionMisuse(format!(
                    "transaction {active} is already active on this driver"
                )));
            }
        }
        self.run_operation(
            Operation::BeginTransaction,
            None,
            &[],
            None,
            Some(&id),
            None,
            None,
        )?;
        *self.transaction_id.lock() = Some(id);
        Ok(())
    }

    /// Execute with an explicit transaction choice: a passed id wins
    /// over the driver's stored one.
    pub fn execute_in(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction_id: Option<&TransactionId>,
    ) -> Result<ExecuteResult, DriverError> {
        let effective = transaction_id
            .cloned()
            .or_else(|| self.transaction_id.lock().clone());
        let result = self.run_operation(
            Operation::Execute,
            Some(sql),
            params,
            None,
            effective.as_ref(),
            None,
            None,
        )?;

        let execute_result = parse_execute_result(result);
        *self.last_rowid.lock() = execute_result.lastrowid;
        Ok(execute_result)
    }

    /// Synchronize the database schema through the worker, backing the
    /// file up into `backup_dir` first.
    pub fn sync_schema(
        &self,
        schema: &SchemaDef,
        backup_dir: &Path,
    ) -> Result<SyncReport, DriverError> {
        let result = self.run_operation(
            Operation::SyncSchema,
            None,
            &[],
            None,
            None,
            Some(schema),
            Some(backup_dir),
        )?;

        let context = self.context(Operation::SyncSchema, None, &[]);
        serde_json::from_value(result.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            DriverError::Protocol {
                context: Box::new(context),
                source: e.into(),
            }
        })
    }

    fn context(
        &self,
        operation: Operation,
        sql: Option<&str>,
        params: &[SqlValue],
    ) -> OperationContext {
        OperationContext {
            operation: operation.as_str().to_string(),
            db_path: self.db_path.clone(),
            sql: sql.map(protocol::sql_preview),
            params: if params.is_empty() {
                None
            } else {
                Some(params.to_vec())
            },
            timeout: self.config.command_timeout,
        }
    }

    /// Run one operation through the submit/poll/delete lifecycle.
    #[allow(clippy::too_many_arguments)]
    fn run_operation(
        &self,
        operation: Operation,
        sql: Option<&str>,
        params: &[SqlValue],
        table_name: Option<&str>,
        transaction_id: Option<&TransactionId>,
        schema: Option<&SchemaDef>,
        backup_dir: Option<&Path>,
    ) -> Result<Option<serde_json::Value>, DriverError> {
        let context = self.context(operation, sql, params);
        let job_id = JobId::new(format!("{}_{}", operation.as_str(), job_suffix()));
        debug!(job_id = %job_id, operation = %operation, "executing operation");

        // Phase 1: submit
        let submit = Request::Submit {
            job_id: Some(job_id.clone()),
            operation,
            sql: sql.map(String::from),
            params: if params.is_empty() {
                None
            } else {
                Some(params.to_vec())
            },
            table_name: table_name.map(String::from),
            transaction_id: transaction_id.cloned(),
            schema_definition: schema.cloned(),
            backup_dir: backup_dir.map(Path::to_path_buf),
        };

        let response = self.send_request(&submit, &context)?;
        if !response.success {
            return Err(DriverError::Operation {
                context: Box::new(context),
                message: format!(
                    "Failed to submit job: {}",
                    response
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "Unknown error".to_string())
                ),
            });
        }

        // Phase 2: poll until terminal or timeout
        let deadline = Instant::now() + self.config.command_timeout;
        while Instant::now() < deadline {
            let poll = Request::Poll {
                job_id: Some(job_id.clone()),
            };
            let response = self.send_request(&poll, &context)?;

            match response.status {
                Some(JobStatus::Pending) => {
                    std::thread::sleep(self.config.poll_interval);
                }
                Some(status) if status.is_terminal() => {
                    // Phase 3: best-effort delete
                    self.delete_job(&job_id, &context);

                    if status == JobStatus::Failed || !response.success {
                        let message = response
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "Unknown error".to_string());
                        return Err(DriverError::Operation {
                            context: Box::new(context),
                            message: format!("Database operation failed: {message}"),
                        });
                    }
                    return Ok(response.result);
                }
                _ => {
                    let message = response
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(DriverError::Operation {
                        context: Box::new(context),
                        message: format!("Poll failed: {message}"),
                    });
                }
            }
        }

        // The orphaned job is reclaimed by the worker's TTL sweep.
        Err(DriverError::Timeout {
            context: Box::new(context),
        })
    }

    fn delete_job(&self, job_id: &JobId, context: &OperationContext) {
        let delete = Request::Delete {
            job_id: Some(job_id.clone()),
        };
        if let Err(e) = self.send_request(&delete, context) {
            warn!(job_id = %job_id, error = %e, "failed to delete job");
        }
    }

    /// Resolve the socket path, reconnecting through the manager when
    /// the cached one is gone.
    fn ensure_socket(&self) -> Result<PathBuf, DriverError> {
        let mut socket = self.socket_path.lock();
        if let Some(path) = socket.as_ref() {
            if path.exists() {
                return Ok(path.clone());
            }
            warn!(socket = %path.display(), "worker socket missing, reconnecting");
        }

        let info = manager().get_or_start(&self.db_path, self.config.worker_log_path.as_deref())?;
        *socket = Some(info.socket_path.clone());
        Ok(info.socket_path)
    }

    /// One request/response exchange on a fresh socket, with a single
    /// reconnect through the manager on transport failure.
    fn send_request(
        &self,
        request: &Request,
        context: &OperationContext,
    ) -> Result<Response, DriverError> {
        let socket_path = self.ensure_socket()?;

        match self.exchange(&socket_path, request) {
            Ok(response) => Ok(response),
            Err(e @ protocol::ProtocolError::Json(_)) => {
                // malformed frames are protocol errors; never retried
                Err(DriverError::Protocol {
                    context: Box::new(context.clone()),
                    source: e,
                })
            }
            Err(first) => {
                debug!(error = %first, "transport failure, reconnecting once");
                *self.socket_path.lock() = None;
                let socket_path = self.ensure_socket()?;
                self.exchange(&socket_path, request)
                    .map_err(|e| match e {
                        protocol::ProtocolError::Json(_) => DriverError::Protocol {
                            context: Box::new(context.clone()),
                            source: e,
                        },
                        other => DriverError::Transport {
                            context: Box::new(context.clone()),
                            message: other.to_string(),
                        },
                    })
            }
        }
    }

    fn exchange(
        &self,
        socket_path: &Path,
        request: &Request,
    ) -> Result<Response, protocol::ProtocolError> {
        let mut stream = UnixStream::connect(socket_path)?;
        stream.set_read_timeout(Some(self.config.socket_timeout))?;
        stream.set_write_timeout(Some(self.config.socket_timeout))?;

        let data = protocol::encode(request)?;
        protocol::write_frame(&mut stream, &data)?;

        let bytes = protocol::read_frame(&mut stream)?;
        protocol::decode(&bytes)
    }
}

impl DatabaseDriver for ProxyDriver {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteResult, DriverError> {
        self.execute_in(sql, params, None)
    }

    fn fetchone(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DriverError> {
        let transaction_id = self.transaction_id.lock().clone();
        let result = self.run_operation(
            Operation::Fetchone,
            Some(sql),
            params,
            None,
            transaction_id.as_ref(),
            None,
            None,
        )?;
        Ok(match result {
            Some(serde_json::Value::Object(row)) => Some(row),
            _ => None,
        })
    }

    fn fetchall(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DriverError> {
        let transaction_id = self.transaction_id.lock().clone();
        let result = self.run_operation(
            Operation::Fetchall,
            Some(sql),
            params,
            None,
            transaction_id.as_ref(),
            None,
            None,
        )?;
        let Some(serde_json::Value::Array(rows)) = result else {
            return Ok(Vec::new());
        };
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                serde_json::Value::Object(row) => Some(row),
                _ => None,
            })
            .collect())
    }

    /// Commit the active transaction; a no-op when none was begun
    /// (backward-compatible with callers that never opt in).
    fn commit(&self) -> Result<(), DriverError> {
        let transaction_id = self.transaction_id.lock().clone();
        if let Some(id) = transaction_id {
            self.run_operation(
                Operation::CommitTransaction,
                None,
                &[],
                None,
                Some(&id),
                None,
                None,
            )?;
            *self.transaction_id.lock() = None;
        }
        Ok(())
    }

    /// Roll back the active transaction; a no-op when none was begun.
    fn rollback(&self) -> Result<(), DriverError> {
        let transaction_id = self.transaction_id.lock().clone();
        if let Some(id) = transaction_id {
            self.run_operation(
                Operation::RollbackTransaction,
                None,
                &[],
                None,
                Some(&id),
                None,
                None,
            )?;
            *self.transaction_id.lock() = None;
        }
        Ok(())
    }

    fn lastrowid(&self) -> Option<i64> {
        *self.last_rowid.lock()
    }

    /// Each DDL statement is an independent non-transactional job; the
    /// worker commits each as it goes.
    fn create_schema(&self, statements: &[String]) -> Result<(), DriverError> {
        for sql in statements {
            self.run_operation(Operation::Execute, Some(sql), &[], None, None, None, None)?;
        }
        Ok(())
    }

    fn get_table_info(&self, table_name: &str) -> Result<Vec<ColumnInfo>, DriverError> {
        let result = self.run_operation(
            Operation::GetTableInfo,
            None,
            &[],
            Some(table_name),
            None,
            None,
            None,
        )?;
        let context = self.context(Operation::GetTableInfo, None, &[]);
        serde_json::from_value(result.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            DriverError::Protocol {
                context: Box::new(context),
                source: e.into(),
            }
        })
    }
}

/// Job-id suffix: 8 hex chars, unique enough within a worker's TTL
/// window.
fn job_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

fn parse_execute_result(result: Option<serde_json::Value>) -> ExecuteResult {
    let value = result.unwrap_or(serde_json::Value::Null);
    ExecuteResult {
        lastrowid: value.get("lastrowid").and_then(serde_json::Value::as_i64),
        rowcount: value
            .get("rowcount")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0),
    }
}

#[cfg(test)]
impl ProxyDriver {
    /// Test-only constructor bound directly to a socket, bypassing the
    /// worker manager.
    pub(crate) fn for_socket(db_path: PathBuf, socket_path: PathBuf, config: DriverConfig) -> Self {
        ProxyDriver {
            db_path,
            config,
            socket_path: Mutex::new(Some(socket_path)),
            last_rowid: Mutex::new(None),
            transaction_id: Mutex::new(None),
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
