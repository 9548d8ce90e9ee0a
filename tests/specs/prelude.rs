// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for behavioral specs.
//!
//! Each spec gets an isolated world: a scratch registry directory (via
//! the env override), a worker hosted on its own thread/runtime, and a
//! pid-file registration pointing at the test process so the driver's
//! manager adopts the worker instead of spawning a binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadb_core::env::WORKERS_DIR_VAR;
use cadb_core::registry;
use cadb_driver::{DriverConfig, ProxyDriver};
use cadb_worker::WorkerConfig;
use tokio::sync::Notify;

/// Worker hosted on its own thread for the duration of a spec.
pub struct WorkerGuard {
    shutdown: Arc<Notify>,
    thread: Option<std::thread::JoinHandle<()>>,
    pub socket_path: PathBuf,
}

impl WorkerGuard {
    pub fn start(config: WorkerConfig) -> Self {
        let shutdown = Arc::new(Notify::new());
        let socket_path = config.socket_path.clone();
        let thread_shutdown = Arc::clone(&shutdown);

        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime build failed");
            rt.block_on(cadb_worker::run(config, thread_shutdown))
                .expect("worker run failed");
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket_path.exists() {
            assert!(Instant::now() < deadline, "worker socket never appeared");
            std::thread::sleep(Duration::from_millis(10));
        }

        WorkerGuard {
            shutdown,
            thread: Some(thread),
            socket_path,
        }
    }

    pub fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("worker thread panicked");
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        // best-effort if a spec bailed before stop()
        self.shutdown.notify_one();
    }
}

/// One isolated spec environment.
pub struct SpecWorld {
    pub db_path: PathBuf,
    worker: Option<WorkerGuard>,
    _dir: tempfile::TempDir,
}

impl SpecWorld {
    /// Scratch registry + in-process worker for `name.db`, registered
    /// under this test process's pid so the manager adopts it.
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let registry_dir = dir.path().join("registry");
        std::fs::create_dir_all(&registry_dir).expect("mkdir failed");
        std::env::set_var(WORKERS_DIR_VAR, &registry_dir);

        let db_path = dir.path().join("data").join(format!("{name}.db"));
        let paths = registry::worker_paths(&db_path);
        registry::write_pid(&paths.pid, std::process::id()).expect("write pid failed");

        let worker = WorkerGuard::start(WorkerConfig::new(&db_path, &paths.socket));

        SpecWorld {
            db_path,
            worker: Some(worker),
            _dir: dir,
        }
    }

    pub fn driver(&self) -> ProxyDriver {
        ProxyDriver::connect(DriverConfig::new(&self.db_path)).expect("driver connect failed")
    }

    pub fn registry_paths(&self) -> registry::WorkerPaths {
        registry::worker_paths(&self.db_path)
    }

    pub fn finish(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        std::env::remove_var(WORKERS_DIR_VAR);
    }
}

/// Scratch registry without any worker, for startup-failure specs.
pub fn empty_registry() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir failed");
    std::env::set_var(WORKERS_DIR_VAR, dir.path());
    dir
}

pub fn clear_registry_env() {
    std::env::remove_var(WORKERS_DIR_VAR);
}
