// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DB-API compatibility layer for legacy call sites.
//!
//! Lightweight connection/cursor objects that mimic the subset of a
//! classic cursor API the platform's older modules use, routing each
//! call through the configured driver. SELECT-like statements go to
//! `fetchall` and the rows are cached for cursor reads; everything else
//! goes to `execute` and refreshes `lastrowid`. The shim adds no
//! concurrency of its own.

use std::sync::Arc;

use cadb_core::SqlValue;

use crate::error::DriverError;
use crate::proxy::{DatabaseDriver, Row};

/// SQL statements that produce rows: SELECT/PRAGMA/WITH-like.
fn is_select_like(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_lowercase();
    head.starts_with("select") || head.starts_with("pragma") || head.starts_with("with")
}

/// A minimal DB-API connection backed by a driver.
pub struct DriverConnection<D: DatabaseDriver> {
    driver: Arc<D>,
}

impl<D: DatabaseDriver> DriverConnection<D> {
    pub fn new(driver: Arc<D>) -> Self {
        DriverConnection { driver }
    }

    pub fn cursor(&self) -> DriverCursor<D> {
        DriverCursor {
            driver: Arc::clone(&self.driver),
            rows: Vec::new(),
            row_index: 0,
            lastrowid: None,
        }
    }

    pub fn commit(&self) -> Result<(), DriverError> {
        self.driver.commit()
    }

    pub fn rollback(&self) -> Result<(), DriverError> {
        self.driver.rollback()
    }

    /// Close is a no-op; the driver's lifecycle is owned by the caller.
    pub fn close(&self) {}
}

/// A minimal DB-API cursor backed by driver operations.
pub struct DriverCursor<D: DatabaseDriver> {
    driver: Arc<D>,
    rows: Vec<Row>,
    row_index: usize,
    pub lastrowid: Option<i64>,
}

impl<D: DatabaseDriver> DriverCursor<D> {
    /// Execute SQL, caching rows for cursor reads when the statement
    /// produces any.
    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<&mut Self, DriverError> {
        self.rows = Vec::new();
        self.row_index = 0;

        if is_select_like(sql) {
            self.rows = self.driver.fetchall(sql, params)?;
        } else {
            self.driver.execute(sql, params)?;
            self.lastrowid = self.driver.lastrowid();
        }

        Ok(self)
    }

    /// Fetch the next cached row.
    pub fn fetchone(&mut self) -> Option<Row> {
        if self.row_index >= self.rows.len() {
            return None;
        }
        let row = self.rows[self.row_index].clone();
        self.row_index += 1;
        Some(row)
    }

    /// Fetch the remaining cached rows.
    pub fn fetchall(&mut self) -> Vec<Row> {
        let remaining = self.rows[self.row_index..].to_vec();
        self.row_index = self.rows.len();
        remaining
    }

    /// Drop cached rows.
    pub fn close(&mut self) {
        self.rows = Vec::new();
        self.row_index = 0;
    }
}

#[cfg(test)]
#[path = "compat_tests.rs"]
mod tests;
