// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle specs: discovery, the daemon guard, reconnection.

use cadb_core::env::DAEMON_FLAG;
use cadb_driver::{manager, DatabaseDriver, DriverConfig, DriverError, ProxyDriver};
use serial_test::serial;

use crate::prelude::{clear_registry_env, empty_registry, SpecWorld};

#[test]
#[serial]
fn daemon_process_cannot_spawn_a_worker() {
    let dir = empty_registry();
    std::env::set_var(DAEMON_FLAG, "1");

    let db_path = dir.path().join("t2.db");
    let err = ProxyDriver::connect(DriverConfig::new(&db_path)).expect_err("must fail");
    assert!(matches!(err, DriverError::DaemonSpawnForbidden { .. }));

    // no socket was created anywhere in the registry
    let sockets = std::fs::read_dir(dir.path())
        .expect("read dir")
        .filter(|e| {
            e.as_ref()
                .is_ok_and(|e| e.path().extension().is_some_and(|x| x == "sock"))
        })
        .count();
    assert_eq!(sockets, 0);

    std::env::remove_var(DAEMON_FLAG);
    clear_registry_env();
}

#[test]
#[serial]
fn repeated_calls_observe_the_same_worker_pid() {
    let world = SpecWorld::new("samepid");

    let first = manager()
        .get_or_start(&world.db_path, None)
        .expect("first lookup failed");
    let second = manager()
        .get_or_start(&world.db_path, None)
        .expect("second lookup failed");

    assert_eq!(first.pid, second.pid);
    assert_eq!(first.socket_path, second.socket_path);

    world.finish();
}

#[test]
#[serial]
fn driver_reconnects_after_disconnect() {
    let world = SpecWorld::new("reconnect");
    let driver = world.driver();

    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
        .expect("create failed");

    driver.disconnect();

    // next call re-resolves the worker through the manager
    driver
        .execute("INSERT INTO t DEFAULT VALUES", &[])
        .expect("insert after disconnect failed");
    assert_eq!(driver.lastrowid(), Some(1));

    world.finish();
}

#[test]
#[serial]
fn two_drivers_share_one_worker() {
    let world = SpecWorld::new("shared");
    let a = world.driver();
    let b = world.driver();

    a.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
        .expect("create failed");
    a.execute("INSERT INTO t(v) VALUES('from-a')", &[])
        .expect("insert failed");

    let row = b
        .fetchone("SELECT v FROM t WHERE id = 1", &[])
        .expect("fetchone failed")
        .expect("row expected");
    assert_eq!(row.get("v"), Some(&serde_json::json!("from-a")));

    world.finish();
}

#[test]
#[serial]
fn registry_files_describe_the_live_worker() {
    let world = SpecWorld::new("registry");
    let paths = world.registry_paths();

    assert!(paths.socket.exists(), "socket file must exist while accepting");
    assert_eq!(
        cadb_core::registry::read_pid(&paths.pid),
        Some(std::process::id())
    );

    world.finish();
}
