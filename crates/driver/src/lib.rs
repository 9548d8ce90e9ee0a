// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cadb-driver: client side of the database access subsystem.
//!
//! The proxy driver implements a neutral row-oriented SQL contract by
//! submitting jobs to the worker that owns the database file, polling
//! for results, and deleting them. Worker discovery and spawning go
//! through a process-wide manager whose truth lives on disk (pid and
//! socket files), so any number of processes converge on one worker per
//! database.

pub mod compat;
mod env;
pub mod error;
pub mod manager;
pub mod proxy;

pub use compat::{DriverConnection, DriverCursor};
pub use error::{DriverError, OperationContext};
pub use manager::{manager, WorkerInfo, WorkerManager};
pub use proxy::{
    ColumnInfo, DatabaseDriver, DriverConfig, ExecuteResult, ProxyDriver, Row, SyncReport,
};
