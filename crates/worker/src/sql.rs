// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQL operation dispatch.
//!
//! Runs on the executor thread only. Non-transactional operations open,
//! use, and close their own connection; transactional operations run on
//! the connection registered under their `transaction_id`, which stays
//! open across jobs until commit or rollback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cadb_core::{Operation, SqlValue, TransactionId};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::executor::JobTask;
use crate::protocol::{sql_preview, OperationError, SchemaDef};

/// A failed operation, as it will appear in the job's error payload.
#[derive(Debug, Clone)]
pub struct OpFailure {
    pub kind: String,
    pub message: String,
    pub sql: Option<String>,
}

impl OpFailure {
    fn invalid(message: impl Into<String>) -> Self {
        OpFailure {
            kind: "invalid_request".to_string(),
            message: message.into(),
            sql: None,
        }
    }

    fn transaction(message: impl Into<String>) -> Self {
        OpFailure {
            kind: "transaction".to_string(),
            message: message.into(),
            sql: None,
        }
    }

    fn sqlite(err: rusqlite::Error, sql: Option<&str>) -> Self {
        OpFailure {
            kind: "sqlite_error".to_string(),
            message: err.to_string(),
            sql: sql.map(sql_preview),
        }
    }

    fn io(err: std::io::Error) -> Self {
        OpFailure {
            kind: "io_error".to_string(),
            message: err.to_string(),
            sql: None,
        }
    }

    pub fn into_operation_error(self) -> OperationError {
        OperationError {
            kind: self.kind,
            message: self.message,
            sql: self.sql,
        }
    }
}

/// Open SQLite connections held across calls, keyed by transaction id.
///
/// Only the executor thread ever touches this registry, so ordering of
/// transactional jobs is exactly their dequeue order.
#[derive(Default)]
pub struct TxRegistry {
    conns: HashMap<TransactionId, Connection>,
}

impl TxRegistry {
    pub fn new() -> Self {
        TxRegistry::default()
    }

    fn contains(&self, id: &TransactionId) -> bool {
        self.conns.contains_key(id)
    }

    fn get(&self, id: &TransactionId) -> Option<&Connection> {
        self.conns.get(id)
    }

    fn insert(&mut self, id: TransactionId, conn: Connection) {
        self.conns.insert(id, conn);
    }

    fn take(&mut self, id: &TransactionId) -> Option<Connection> {
        self.conns.remove(id)
    }

    /// Roll back and close every open transaction (worker shutdown).
    pub fn rollback_all(&mut self) {
        for (id, conn) in self.conns.drain() {
            if let Err(e) = conn.execute_batch("ROLLBACK;") {
                warn!(transaction_id = %id, error = %e, "rollback on shutdown failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

/// Establish a SQLite connection with the worker's standard pragmas:
/// WAL journaling, enforced foreign keys, NORMAL synchronous, and a
/// 5-second busy timeout for lock contention.
pub fn open_connection(db_path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    conn.execute("PRAGMA synchronous=NORMAL;", [])?;
    Ok(conn)
}

/// Execute one job task. Returns the operation's result payload.
pub fn run_task(
    db_path: &Path,
    txns: &mut TxRegistry,
    task: &JobTask,
) -> Result<Value, OpFailure> {
    match task.operation {
        Operation::BeginTransaction => begin_transaction(db_path, txns, task),
        Operation::CommitTransaction => end_transaction(txns, task, "COMMIT;"),
        Operation::RollbackTransaction => end_transaction(txns, task, "ROLLBACK;"),
        Operation::Execute => {
            let sql = require_sql(task, "execute")?;
            with_connection(db_path, txns, task.transaction_id.as_ref(), |conn| {
                execute_sql(conn, sql, &task.params)
            })
        }
        Operation::Fetchone => {
            let sql = require_sql(task, "fetchone")?;
            with_connection(db_path, txns, task.transaction_id.as_ref(), |conn| {
                let rows = fetch_rows(conn, sql, &task.params)?;
                Ok(rows.into_iter().next().unwrap_or(Value::Null))
            })
        }
        Operation::Fetchall => {
            let sql = require_sql(task, "fetchall")?;
            with_connection(db_path, txns, task.transaction_id.as_ref(), |conn| {
                Ok(Value::Array(fetch_rows(conn, sql, &task.params)?))
            })
        }
        Operation::GetTableInfo => {
            let table = task.table_name.as_deref().ok_or_else(|| {
                OpFailure::invalid("table_name parameter is required for get_table_info operation")
            })?;
            with_connection(db_path, txns, task.transaction_id.as_ref(), |conn| {
                table_info(conn, table)
            })
        }
        Operation::SyncSchema => {
            let schema = task.schema_definition.as_ref().ok_or_else(|| {
                OpFailure::invalid("schema_definition is required for sync_schema operation")
            })?;
            let backup_dir = task.backup_dir.as_deref().ok_or_else(|| {
                OpFailure::invalid("backup_dir is required for sync_schema operation")
            })?;
            sync_schema(db_path, schema, backup_dir)
        }
    }
}

fn require_sql<'a>(task: &'a JobTask, op: &str) -> Result<&'a str, OpFailure> {
    task.sql
        .as_deref()
        .ok_or_else(|| OpFailure::invalid(format!("sql parameter is required for {op} operation")))
}

/// Run `f` on the transaction's connection when a `transaction_id` is
/// present, otherwise on a fresh connection that is closed afterwards.
fn with_connection<R>(
    db_path: &Path,
    txns: &TxRegistry,
    transaction_id: Option<&TransactionId>,
    f: impl FnOnce(&Connection) -> Result<R, OpFailure>,
) -> Result<R, OpFailure> {
    match transaction_id {
        Some(id) => {
            let conn = txns.get(id).ok_or_else(|| {
                OpFailure::transaction(format!(
                    "Transaction {id} not found. Call begin_transaction first."
                ))
            })?;
            f(conn)
        }
        None => {
            let conn = open_connection(db_path).map_err(|e| OpFailure::sqlite(e, None))?;
            let result = f(&conn);
            // fresh connections are autocommit; dropping closes them
            drop(conn);
            result
        }
    }
}

fn begin_transaction(
    db_path: &Path,
    txns: &mut TxRegistry,
    task: &JobTask,
) -> Result<Value, OpFailure> {
    let id = require_transaction_id(task)?;
    if txns.contains(id) {
        return Err(OpFailure::transaction(format!(
            "Transaction {id} already exists"
        )));
    }
    let conn = open_connection(db_path).map_err(|e| OpFailure::sqlite(e, None))?;
    conn.execute_batch("BEGIN TRANSACTION;")
        .map_err(|e| OpFailure::sqlite(e, None))?;
    txns.insert(id.clone(), conn);
    debug!(transaction_id = %id, "transaction opened");
    Ok(json!({"success": true}))
}

fn end_transaction(
    txns: &mut TxRegistry,
    task: &JobTask,
    terminator: &str,
) -> Result<Value, OpFailure> {
    let id = require_transaction_id(task)?;
    let conn = txns
        .take(id)
        .ok_or_else(|| OpFailure::transaction(format!("Transaction {id} not found")))?;
    let result = conn
        .execute_batch(terminator)
        .map_err(|e| OpFailure::sqlite(e, None));
    // closed either way; the entry is already gone
    drop(conn);
    result?;
    debug!(transaction_id = %id, "transaction closed");
    Ok(json!({"success": true}))
}

fn require_transaction_id(task: &JobTask) -> Result<&TransactionId, OpFailure> {
    task.transaction_id.as_ref().ok_or_else(|| {
        OpFailure::invalid(format!(
            "transaction_id is required for {}",
            task.operation
        ))
    })
}

fn execute_sql(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Value, OpFailure> {
    let bound = bind_params(params, sql)?;
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| OpFailure::sqlite(e, Some(sql)))?;
    let rowcount = stmt
        .execute(rusqlite::params_from_iter(bound))
        .map_err(|e| OpFailure::sqlite(e, Some(sql)))?;
    Ok(json!({
        "lastrowid": conn.last_insert_rowid(),
        "rowcount": rowcount,
    }))
}

fn fetch_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Value>, OpFailure> {
    let bound = bind_params(params, sql)?;
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| OpFailure::sqlite(e, Some(sql)))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt
        .query(rusqlite::params_from_iter(bound))
        .map_err(|e| OpFailure::sqlite(e, Some(sql)))?;

    let mut out = Vec::new();
    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) => return Err(OpFailure::sqlite(e, Some(sql))),
        };
        let mut obj = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value = row
                .get_ref(i)
                .map_err(|e| OpFailure::sqlite(e, Some(sql)))?;
            obj.insert(name.clone(), json_value(value));
        }
        out.push(Value::Object(obj));
    }
    Ok(out)
}

fn table_info(conn: &Connection, table_name: &str) -> Result<Value, OpFailure> {
    let mut out = Vec::new();
    conn.pragma(None, "table_info", table_name, |row| {
        out.push(json!({
            "cid": row.get::<_, i64>(0)?,
            "name": row.get::<_, String>(1)?,
            "type": row.get::<_, String>(2)?,
            "notnull": row.get::<_, i64>(3)?,
            "dflt_value": row.get::<_, Option<String>>(4)?,
            "pk": row.get::<_, i64>(5)?,
        }));
        Ok(())
    })
    .map_err(|e| OpFailure::sqlite(e, None))?;
    Ok(Value::Array(out))
}

/// Back up the database file (when present), create missing tables, and
/// ensure indexes. Reports every change applied.
fn sync_schema(db_path: &Path, schema: &SchemaDef, backup_dir: &Path) -> Result<Value, OpFailure> {
    let backup_uuid = if db_path.exists() {
        Some(backup_database(db_path, backup_dir)?)
    } else {
        None
    };

    let conn = open_connection(db_path).map_err(|e| OpFailure::sqlite(e, None))?;
    let existing = existing_tables(&conn)?;

    let mut changes = Vec::new();
    for (name, table) in &schema.tables {
        if !existing.contains(name) {
            conn.execute_batch(&table.create_sql)
                .map_err(|e| OpFailure::sqlite(e, Some(&table.create_sql)))?;
            changes.push(format!("created table {name}"));
        }
        for index_sql in &table.indexes {
            conn.execute_batch(index_sql)
                .map_err(|e| OpFailure::sqlite(e, Some(index_sql)))?;
        }
    }

    Ok(json!({
        "success": true,
        "backup_uuid": backup_uuid,
        "changes_applied": changes,
    }))
}

fn backup_database(db_path: &Path, backup_dir: &Path) -> Result<String, OpFailure> {
    std::fs::create_dir_all(backup_dir).map_err(OpFailure::io)?;
    let backup_uuid = uuid::Uuid::new_v4().to_string();
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    let target = backup_dir.join(format!("{stem}.{backup_uuid}.db"));
    std::fs::copy(db_path, &target).map_err(OpFailure::io)?;
    debug!(backup = %target.display(), "database backed up before schema sync");
    Ok(backup_uuid)
}

fn existing_tables(conn: &Connection) -> Result<std::collections::HashSet<String>, OpFailure> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
        .map_err(|e| OpFailure::sqlite(e, None))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| OpFailure::sqlite(e, None))?;
    let mut out = std::collections::HashSet::new();
    for name in names {
        out.insert(name.map_err(|e| OpFailure::sqlite(e, None))?);
    }
    Ok(out)
}

/// Convert wire parameters to SQLite values.
fn bind_params(
    params: &[SqlValue],
    sql: &str,
) -> Result<Vec<rusqlite::types::Value>, OpFailure> {
    params
        .iter()
        .map(|p| match p {
            SqlValue::Null => Ok(rusqlite::types::Value::Null),
            SqlValue::Integer(i) => Ok(rusqlite::types::Value::Integer(*i)),
            SqlValue::Real(r) => Ok(rusqlite::types::Value::Real(*r)),
            SqlValue::Text(s) => Ok(rusqlite::types::Value::Text(s.clone())),
            SqlValue::Blob(_) => p
                .as_blob_bytes()
                .map(rusqlite::types::Value::Blob)
                .ok_or_else(|| OpFailure {
                    kind: "invalid_request".to_string(),
                    message: "blob parameter is not valid hex".to_string(),
                    sql: Some(sql_preview(sql)),
                }),
        })
        .collect()
}

/// Convert a column value to its JSON representation.
fn json_value(value: ValueRef<'_>) -> Value {
    let sql_value = match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::blob(b),
    };
    serde_json::to_value(sql_value).unwrap_or(Value::Null)
}

/// Resolve the database path once at executor startup, creating the
/// parent directory so SQLite can create the file on first open.
pub fn prepare_db_path(db_path: &Path) -> std::io::Result<PathBuf> {
    cadb_core::registry::canonicalize_db_path(db_path)
}

#[cfg(test)]
#[path = "sql_tests.rs"]
mod tests;
