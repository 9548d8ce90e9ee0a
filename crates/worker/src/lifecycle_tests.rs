// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use cadb_core::JobId;
use serde_json::json;

use crate::protocol::{self, Request, Response};

/// Worker hosted on its own thread/runtime for the duration of a test.
struct TestWorker {
    shutdown: Arc<Notify>,
    thread: Option<std::thread::JoinHandle<()>>,
    socket_path: PathBuf,
}

impl TestWorker {
    fn start(config: WorkerConfig) -> Self {
        let shutdown = Arc::new(Notify::new());
        let socket_path = config.socket_path.clone();
        let thread_shutdown = Arc::clone(&shutdown);

        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime build failed");
            rt.block_on(run(config, thread_shutdown))
                .expect("worker run failed");
        });

        // bind happens before accept; socket file is the ready signal
        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket_path.exists() {
            assert!(Instant::now() < deadline, "worker socket never appeared");
            std::thread::sleep(Duration::from_millis(10));
        }

        TestWorker {
            shutdown,
            thread: Some(thread),
            socket_path,
        }
    }

    fn request(&self, request: &Request) -> Response {
        let mut stream = UnixStream::connect(&self.socket_path).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        let data = protocol::encode(request).expect("encode failed");
        protocol::write_frame(&mut stream, &data).expect("write failed");
        let bytes = protocol::read_frame(&mut stream).expect("read failed");
        protocol::decode(&bytes).expect("decode failed")
    }

    fn submit(&self, job_id: &str, operation: cadb_core::Operation, sql: &str) -> Response {
        self.request(&Request::Submit {
            job_id: Some(JobId::new(job_id)),
            operation,
            sql: Some(sql.to_string()),
            params: None,
            table_name: None,
            transaction_id: None,
            schema_definition: None,
            backup_dir: None,
        })
    }

    fn poll_until_terminal(&self, job_id: &str) -> Response {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.request(&Request::Poll {
                job_id: Some(JobId::new(job_id)),
            });
            if response.status.is_some_and(|s| s.is_terminal()) {
                return response;
            }
            assert!(Instant::now() < deadline, "job never became terminal");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("worker thread panicked");
        }
    }
}

fn test_config(dir: &Path) -> WorkerConfig {
    WorkerConfig::new(dir.join("test.db"), dir.join("test.sock"))
}

#[test]
fn serves_submit_poll_delete_over_the_socket() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let worker = TestWorker::start(test_config(dir.path()));

    let response = worker.submit(
        "execute_00000001",
        cadb_core::Operation::Execute,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)",
    );
    assert!(response.success);
    assert_eq!(response.job_id, Some(JobId::new("execute_00000001")));

    let terminal = worker.poll_until_terminal("execute_00000001");
    assert!(terminal.success);
    assert_eq!(terminal.status, Some(cadb_core::JobStatus::Completed));

    let deleted = worker.request(&Request::Delete {
        job_id: Some(JobId::new("execute_00000001")),
    });
    assert!(deleted.success);

    // repeated delete reports not-found
    let again = worker.request(&Request::Delete {
        job_id: Some(JobId::new("execute_00000001")),
    });
    assert!(!again.success);
    assert_eq!(
        again.error.as_ref().map(|e| e.message().to_string()),
        Some("Job not found".to_string())
    );

    worker.stop();
}

#[test]
fn missing_job_id_is_rejected_at_the_protocol_level() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let worker = TestWorker::start(test_config(dir.path()));

    let response = worker.request(&Request::Submit {
        job_id: None,
        operation: cadb_core::Operation::Fetchall,
        sql: Some("SELECT 1".to_string()),
        params: None,
        table_name: None,
        transaction_id: None,
        schema_definition: None,
        backup_dir: None,
    });
    assert!(!response.success);
    assert_eq!(
        response.error.as_ref().map(|e| e.message().to_string()),
        Some("Missing job_id".to_string())
    );

    worker.stop();
}

#[test]
fn duplicate_submit_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let worker = TestWorker::start(test_config(dir.path()));

    let first = worker.submit("j1", cadb_core::Operation::Execute, "CREATE TABLE a (x)");
    assert!(first.success);
    let second = worker.submit("j1", cadb_core::Operation::Execute, "CREATE TABLE b (x)");
    assert!(!second.success);

    worker.stop();
}

#[test]
fn malformed_json_gets_an_error_response() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let worker = TestWorker::start(test_config(dir.path()));

    let mut stream = UnixStream::connect(&worker.socket_path).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set timeout");
    protocol::write_frame(&mut stream, b"{not json").expect("write failed");
    let bytes = protocol::read_frame(&mut stream).expect("read failed");
    let response: Response = protocol::decode(&bytes).expect("decode failed");
    assert!(!response.success);

    worker.stop();
}

#[test]
fn failed_sql_polls_as_failed_and_keeps_the_record_until_delete() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let worker = TestWorker::start(test_config(dir.path()));

    worker.submit("bad", cadb_core::Operation::Fetchall, "SELECT * FROM nope");
    let terminal = worker.poll_until_terminal("bad");
    assert!(!terminal.success);
    assert_eq!(terminal.status, Some(cadb_core::JobStatus::Failed));
    let error = terminal.error.expect("error payload expected");
    assert!(error.message().contains("nope"));

    // still queryable until deleted
    let again = worker.request(&Request::Poll {
        job_id: Some(JobId::new("bad")),
    });
    assert_eq!(again.status, Some(cadb_core::JobStatus::Failed));

    worker.stop();
}

#[test]
fn socket_file_exists_iff_accepting() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let config = test_config(dir.path());
    let socket_path = config.socket_path.clone();

    let worker = TestWorker::start(config);
    assert!(socket_path.exists());

    worker.stop();
    assert!(!socket_path.exists(), "socket file must be removed on shutdown");
}

#[test]
fn expired_jobs_are_swept() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let mut config = test_config(dir.path());
    config.job_ttl = Duration::from_millis(50);
    config.sweep_interval = Duration::from_millis(25);

    let worker = TestWorker::start(config);
    worker.submit("ephemeral", cadb_core::Operation::Execute, "CREATE TABLE t (x)");

    // never polled, never deleted; the sweeper reclaims it
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let response = worker.request(&Request::Poll {
            job_id: Some(JobId::new("ephemeral")),
        });
        if !response.success {
            assert_eq!(
                response.error.as_ref().map(|e| e.message().to_string()),
                Some("Job not found".to_string())
            );
            break;
        }
        assert!(Instant::now() < deadline, "job was never swept");
        std::thread::sleep(Duration::from_millis(20));
    }

    worker.stop();
}

#[test]
fn submit_result_payload_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let worker = TestWorker::start(test_config(dir.path()));

    worker.submit(
        "create",
        cadb_core::Operation::Execute,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)",
    );
    worker.poll_until_terminal("create");

    let response = worker.request(&Request::Submit {
        job_id: Some(JobId::new("insert")),
        operation: cadb_core::Operation::Execute,
        sql: Some("INSERT INTO t(v) VALUES(?)".to_string()),
        params: Some(vec![cadb_core::SqlValue::Text("a".into())]),
        table_name: None,
        transaction_id: None,
        schema_definition: None,
        backup_dir: None,
    });
    assert!(response.success);

    let terminal = worker.poll_until_terminal("insert");
    assert_eq!(terminal.result, Some(json!({"lastrowid": 1, "rowcount": 1})));

    worker.stop();
}
