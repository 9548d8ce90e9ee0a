// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts connections until shutdown and serves each on a spawned
//! task: read one request frame, dispatch, write one response frame,
//! close. Submits are acknowledged as soon as the job record exists;
//! execution happens on the executor thread.

use std::sync::Arc;

use cadb_core::JobId;
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::executor::JobTask;
use crate::jobs::JobStore;
use crate::protocol::{self, Request, Response, DEFAULT_TIMEOUT};

/// Shared worker context for all connection tasks.
pub struct ListenCtx {
    pub jobs: Arc<Mutex<JobStore>>,
    pub executor: mpsc::UnboundedSender<JobTask>,
}

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Accept until shutdown is signalled, spawning a task per connection.
    pub async fn run(self, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                result = self.socket.accept() => match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                match e {
                                    protocol::ProtocolError::ConnectionClosed => {
                                        debug!("client disconnected")
                                    }
                                    protocol::ProtocolError::Timeout => {
                                        warn!("connection timeout")
                                    }
                                    _ => error!("connection error: {}", e),
                                }
                            }
                        });
                    }
                    Err(e) => error!("accept error: {}", e),
                },
                _ = shutdown.notified() => {
                    info!("listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    stream: UnixStream,
    ctx: &ListenCtx,
) -> Result<(), protocol::ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();

    let bytes = protocol::wire::read_request_bytes(&mut reader, DEFAULT_TIMEOUT).await?;

    // Answer malformed frames with a protocol error instead of dropping
    // the connection: the client gets something actionable to raise.
    let response = match protocol::decode::<Request>(&bytes) {
        Ok(request) => {
            debug!(request = ?request, "received request");
            handle_request(request, ctx)
        }
        Err(e) => Response::error(format!("Invalid request: {e}")),
    };

    protocol::wire::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await
}

/// Dispatch one request and build its response.
fn handle_request(request: Request, ctx: &ListenCtx) -> Response {
    match request {
        Request::Submit {
            job_id,
            operation,
            sql,
            params,
            table_name,
            transaction_id,
            schema_definition,
            backup_dir,
        } => {
            let Some(job_id) = job_id else {
                return Response::error("Missing job_id");
            };

            if let Err(e) = ctx.jobs.lock().insert_pending(job_id.clone(), operation) {
                return Response::error(format!("Job {} already exists", e.0));
            }

            let task = JobTask {
                job_id: job_id.clone(),
                operation,
                sql,
                params: params.unwrap_or_default(),
                table_name,
                transaction_id,
                schema_definition,
                backup_dir,
            };

            if ctx.executor.send(task).is_err() {
                // Executor already stopped (shutdown race). The job must
                // not appear to silently succeed: leave it failed so a
                // later poll reports it.
                ctx.jobs.lock().finish(
                    &job_id,
                    crate::jobs::JobOutcome::failed(protocol::ErrorPayload::Message(
                        "worker is shutting down".to_string(),
                    )),
                );
            }

            Response::submitted(job_id)
        }

        Request::Poll { job_id } => {
            let Some(job_id) = job_id else {
                return Response::error("Missing job_id");
            };
            poll_response(ctx, &job_id)
        }

        Request::Delete { job_id } => {
            let Some(job_id) = job_id else {
                return Response::error("Missing job_id");
            };
            if ctx.jobs.lock().delete(&job_id) {
                Response::ok()
            } else {
                Response::error("Job not found")
            }
        }
    }
}

fn poll_response(ctx: &ListenCtx, job_id: &JobId) -> Response {
    let Some(record) = ctx.jobs.lock().poll(job_id) else {
        return Response::error("Job not found");
    };

    if record.status.is_terminal() {
        Response::terminal(record.success, record.status, record.result, record.error)
    } else {
        Response::pending()
    }
}
