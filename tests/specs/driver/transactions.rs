// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transaction specs: identity by id, visibility at commit boundaries.

use cadb_core::SqlValue;
use cadb_driver::{DatabaseDriver, DriverError};
use serde_json::json;
use serial_test::serial;

use crate::prelude::SpecWorld;

fn count(driver: &impl DatabaseDriver) -> i64 {
    driver
        .fetchone("SELECT COUNT(*) AS c FROM t", &[])
        .expect("count failed")
        .expect("row expected")
        .get("c")
        .and_then(serde_json::Value::as_i64)
        .expect("count not an integer")
}

#[test]
#[serial]
fn committed_transaction_becomes_visible_to_other_connections() {
    let world = SpecWorld::new("txcommit");
    let writer = world.driver();
    let reader = world.driver();

    writer
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");

    writer
        .begin_transaction_with_id("tx1")
        .expect("begin failed");
    for v in ["a", "b"] {
        writer
            .execute("INSERT INTO t(v) VALUES(?)", &[SqlValue::Text(v.into())])
            .expect("insert failed");
    }

    // inside the transaction both rows are visible
    let rows = writer
        .fetchall("SELECT COUNT(*) AS c FROM t", &[])
        .expect("fetchall failed");
    assert_eq!(rows[0].get("c"), Some(&json!(2)));

    // a driver with no transaction still sees the pre-transaction state
    assert_eq!(count(&reader), 0);

    writer.commit().expect("commit failed");
    assert_eq!(count(&reader), 2);

    world.finish();
}

#[test]
#[serial]
fn rolled_back_transaction_leaves_the_row_count_unchanged() {
    let world = SpecWorld::new("txrollback");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");
    driver
        .execute("INSERT INTO t(v) VALUES('before')", &[])
        .expect("insert failed");

    driver
        .begin_transaction_with_id("tx2")
        .expect("begin failed");
    driver
        .execute("INSERT INTO t(v) VALUES('inside')", &[])
        .expect("insert failed");
    driver.rollback().expect("rollback failed");

    assert_eq!(count(&driver), 1);

    world.finish();
}

#[test]
#[serial]
fn commit_and_rollback_without_a_transaction_are_noops() {
    let world = SpecWorld::new("txnoop");
    let driver = world.driver();

    driver.commit().expect("commit should be a no-op");
    driver.rollback().expect("rollback should be a no-op");

    world.finish();
}

#[test]
#[serial]
fn reusing_a_live_transaction_id_fails_without_disturbing_it() {
    let world = SpecWorld::new("txreuse");
    let first = world.driver();
    let second = world.driver();

    first
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");

    first
        .begin_transaction_with_id("shared")
        .expect("begin failed");
    first
        .execute("INSERT INTO t(v) VALUES('kept')", &[])
        .expect("insert failed");

    let err = second
        .begin_transaction_with_id("shared")
        .expect_err("reuse must fail");
    assert!(matches!(err, DriverError::Operation { .. }));

    // the original transaction is untouched and still commits
    first.commit().expect("commit failed");
    assert_eq!(count(&second), 1);

    world.finish();
}

#[test]
#[serial]
fn generated_transaction_ids_work_end_to_end() {
    let world = SpecWorld::new("txgen");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");

    let tx_id = driver.begin_transaction().expect("begin failed");
    assert!(tx_id.as_str().starts_with("tx_"));

    driver
        .execute("INSERT INTO t(v) VALUES('x')", &[])
        .expect("insert failed");
    driver.commit().expect("commit failed");
    assert_eq!(count(&driver), 1);

    world.finish();
}

#[test]
#[serial]
fn lastrowid_reflects_the_id_observed_at_commit_time() {
    let world = SpecWorld::new("txrowid");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");

    driver.begin_transaction_with_id("txid").expect("begin failed");
    let result = driver
        .execute("INSERT INTO t(v) VALUES('a')", &[])
        .expect("insert failed");
    assert_eq!(result.lastrowid, Some(1));
    driver.commit().expect("commit failed");

    assert_eq!(driver.lastrowid(), Some(1));

    let row = driver
        .fetchone("SELECT id FROM t WHERE v = 'a'", &[])
        .expect("fetchone failed")
        .expect("row expected");
    assert_eq!(row.get("id"), Some(&json!(1)));

    world.finish();
}
