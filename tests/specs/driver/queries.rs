// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Query specs: the neutral row-oriented contract end to end.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadb_core::SqlValue;
use cadb_driver::{DatabaseDriver, DriverConnection};
use cadb_worker::protocol::{SchemaDef, TableDef};
use serde_json::json;
use serial_test::serial;

use crate::prelude::SpecWorld;

#[test]
#[serial]
fn fresh_insert_and_read() {
    let world = SpecWorld::new("t1");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");

    let result = driver
        .execute("INSERT INTO t(v) VALUES(?)", &[SqlValue::Text("a".into())])
        .expect("insert failed");
    assert_eq!(result.lastrowid, Some(1));
    assert_eq!(result.rowcount, 1);
    assert_eq!(driver.lastrowid(), Some(1));

    let row = driver
        .fetchone("SELECT v FROM t WHERE id = ?", &[SqlValue::Integer(1)])
        .expect("fetchone failed")
        .expect("row expected");
    assert_eq!(row.get("v"), Some(&json!("a")));

    world.finish();
}

#[test]
#[serial]
fn insert_select_delete_round_trip() {
    let world = SpecWorld::new("roundtrip");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");
    driver
        .execute("INSERT INTO t(v) VALUES(?)", &[SqlValue::Text("a".into())])
        .expect("insert failed");

    let rows = driver
        .fetchall("SELECT * FROM t WHERE v = ?", &[SqlValue::Text("a".into())])
        .expect("fetchall failed");
    assert_eq!(rows.len(), 1);

    driver
        .execute("DELETE FROM t WHERE v = ?", &[SqlValue::Text("a".into())])
        .expect("delete failed");
    let rows = driver.fetchall("SELECT * FROM t", &[]).expect("fetchall failed");
    assert!(rows.is_empty());

    world.finish();
}

#[test]
#[serial]
fn zero_length_params_match_omitted_params() {
    let world = SpecWorld::new("params");
    let driver = world.driver();

    // an empty slice is indistinguishable from no params at all
    driver
        .execute("CREATE TABLE t (v TEXT)", &[])
        .expect("create failed");
    driver
        .execute("INSERT INTO t(v) VALUES('fixed')", &[])
        .expect("insert failed");

    let row = driver
        .fetchone("SELECT COUNT(*) AS c FROM t", &[])
        .expect("fetchone failed")
        .expect("row expected");
    assert_eq!(row.get("c"), Some(&json!(1)));

    world.finish();
}

#[test]
#[serial]
fn sql_longer_than_the_log_preview_executes_in_full() {
    let world = SpecWorld::new("longsql");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (v TEXT)", &[])
        .expect("create failed");

    let long_value = "x".repeat(600);
    let sql = format!("INSERT INTO t(v) VALUES('{long_value}')");
    driver.execute(&sql, &[]).expect("long insert failed");

    let row = driver
        .fetchone("SELECT LENGTH(v) AS n FROM t", &[])
        .expect("fetchone failed")
        .expect("row expected");
    assert_eq!(row.get("n"), Some(&json!(600)));

    world.finish();
}

#[test]
#[serial]
fn binary_values_survive_the_json_boundary_both_ways() {
    let world = SpecWorld::new("blobs");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE b (id INTEGER PRIMARY KEY, data BLOB)", &[])
        .expect("create failed");

    let bytes = vec![0u8, 7, 128, 255];
    driver
        .execute("INSERT INTO b(data) VALUES(?)", &[SqlValue::blob(&bytes)])
        .expect("insert failed");

    let row = driver
        .fetchone("SELECT data FROM b WHERE id = 1", &[])
        .expect("fetchone failed")
        .expect("row expected");
    let value: SqlValue =
        serde_json::from_value(row.get("data").expect("column missing").clone())
            .expect("decode failed");
    assert_eq!(value.as_blob_bytes().expect("blob bytes"), bytes);

    world.finish();
}

#[test]
#[serial]
fn create_schema_applies_each_statement() {
    let world = SpecWorld::new("schema");
    let driver = world.driver();

    driver
        .create_schema(&[
            "CREATE TABLE projects (id TEXT PRIMARY KEY)".to_string(),
            "CREATE TABLE files (id INTEGER PRIMARY KEY, project_id TEXT \
             REFERENCES projects(id))"
                .to_string(),
        ])
        .expect("create_schema failed");

    let info = driver.get_table_info("projects").expect("table info failed");
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].name, "id");
    assert_eq!(info[0].pk, 1);

    let info = driver.get_table_info("files").expect("table info failed");
    assert_eq!(info.len(), 2);

    world.finish();
}

#[test]
#[serial]
fn sync_schema_reports_changes_and_backs_up_existing_files() {
    let world = SpecWorld::new("sync");
    let driver = world.driver();

    let mut tables = BTreeMap::new();
    tables.insert(
        "chunks".to_string(),
        TableDef {
            create_sql: "CREATE TABLE IF NOT EXISTS chunks (id INTEGER PRIMARY KEY, body TEXT)"
                .to_string(),
            indexes: vec![
                "CREATE INDEX IF NOT EXISTS idx_chunks_body ON chunks(body)".to_string(),
            ],
        },
    );
    let schema = SchemaDef { tables };
    let backup_dir = world.db_path.parent().expect("parent").join("backups");

    // first sync: database file does not exist yet, so no backup
    let report = driver
        .sync_schema(&schema, &backup_dir)
        .expect("sync failed");
    assert!(report.success);
    assert!(report.backup_uuid.is_none());
    assert_eq!(report.changes_applied, vec!["created table chunks".to_string()]);

    // second sync: file exists now, gets backed up, nothing to change
    let report = driver
        .sync_schema(&schema, &backup_dir)
        .expect("second sync failed");
    assert!(report.success);
    assert!(report.backup_uuid.is_some());
    assert!(report.changes_applied.is_empty());
    assert_eq!(
        std::fs::read_dir(&backup_dir).expect("read dir").count(),
        1
    );

    world.finish();
}

#[test]
#[serial]
fn compat_shim_routes_through_the_real_driver() {
    let world = SpecWorld::new("compat");
    let driver = Arc::new(world.driver());
    let conn = DriverConnection::new(Arc::clone(&driver));

    let mut cursor = conn.cursor();
    cursor
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");
    cursor
        .execute("INSERT INTO t(v) VALUES(?)", &[SqlValue::Text("a".into())])
        .expect("insert failed");
    assert_eq!(cursor.lastrowid, Some(1));

    let mut cursor = conn.cursor();
    cursor
        .execute("SELECT id, v FROM t ORDER BY id", &[])
        .expect("select failed");
    let row = cursor.fetchone().expect("row expected");
    assert_eq!(row.get("v"), Some(&json!("a")));
    assert!(cursor.fetchone().is_none());

    conn.commit().expect("commit failed");

    world.finish();
}

#[test]
#[serial]
fn operation_errors_carry_structured_context() {
    let world = SpecWorld::new("errors");
    let driver = world.driver();

    let err = driver
        .fetchall("SELECT * FROM missing_table", &[])
        .expect_err("should fail");
    match err {
        cadb_driver::DriverError::Operation { context, message } => {
            assert_eq!(context.operation, "fetchall");
            assert!(context.db_path.ends_with("errors.db"));
            assert_eq!(context.sql.as_deref(), Some("SELECT * FROM missing_table"));
            assert!(message.contains("missing_table"));
        }
        other => panic!("expected operation error, got {other}"),
    }

    world.finish();
}
