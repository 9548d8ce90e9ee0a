// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for worker communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! Each connection carries exactly one request frame and one response
//! frame; both sides then close.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use cadb_core::{JobId, JobStatus, Operation, SqlValue, TransactionId};
use serde::{Deserialize, Serialize};

#[path = "protocol_wire.rs"]
pub mod wire;

pub use wire::{
    decode, encode, read_frame, write_frame, ProtocolError, DEFAULT_TIMEOUT,
};

/// Number of characters of SQL kept in logs and error payloads.
pub const SQL_PREVIEW_LEN: usize = 200;

/// Truncate SQL for logs and error payloads.
pub fn sql_preview(sql: &str) -> String {
    if sql.chars().count() <= SQL_PREVIEW_LEN {
        sql.to_string()
    } else {
        let head: String = sql.chars().take(SQL_PREVIEW_LEN).collect();
        format!("{head}...")
    }
}

/// Request from a client to the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Submit a job for execution. Replies immediately with the job id;
    /// the result is retrieved by polling.
    Submit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        operation: Operation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<SqlValue>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<TransactionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_definition: Option<SchemaDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backup_dir: Option<PathBuf>,
    },

    /// Ask for the current state of a submitted job.
    Poll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
    },

    /// Remove a job record after its result has been read.
    Delete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
    },
}

/// Response envelope.
///
/// Flat on purpose: `{"success": bool}` plus whichever of the optional
/// fields apply, matching the shapes clients in any language expect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    /// Successful submit acknowledgement.
    pub fn submitted(job_id: JobId) -> Self {
        Response {
            success: true,
            job_id: Some(job_id),
            ..Response::default()
        }
    }

    /// Poll reply for a job that has not finished.
    pub fn pending() -> Self {
        Response {
            success: true,
            status: Some(JobStatus::Pending),
            ..Response::default()
        }
    }

    /// Poll reply for a terminal job. `success` echoes the operation's
    /// own success flag, not the transport's.
    pub fn terminal(
        success: bool,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<ErrorPayload>,
    ) -> Self {
        Response {
            success,
            status: Some(status),
            result,
            error,
            ..Response::default()
        }
    }

    /// Bare success (delete acknowledgement).
    pub fn ok() -> Self {
        Response {
            success: true,
            ..Response::default()
        }
    }

    /// Failure with a message ("Missing job_id", "Job not found", ...).
    pub fn error(message: impl Into<String>) -> Self {
        Response {
            success: false,
            error: Some(ErrorPayload::Message(message.into())),
            ..Response::default()
        }
    }
}

/// Error payload: a bare message for protocol-level failures, or a
/// structured record for failed SQL operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ErrorPayload {
    Operation(OperationError),
    Message(String),
}

impl ErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            ErrorPayload::Operation(e) => &e.message,
            ErrorPayload::Message(m) => m,
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPayload::Operation(e) => write!(f, "{}: {}", e.kind, e.message),
            ErrorPayload::Message(m) => f.write_str(m),
        }
    }
}

/// Structured record of a failed operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// Truncated SQL preview, when the operation carried SQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// Schema definition for `sync_schema`: table name to DDL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDef {
    pub tables: BTreeMap<String, TableDef>,
}

/// DDL for one table plus its index statements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDef {
    pub create_sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<String>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
