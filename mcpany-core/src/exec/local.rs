//! Local process executor.
//!
//! Spawns through `async-process` with three concurrent readers: stdout,
//! stderr, and a combined multiplexer fed by both. The combined buffer sits
//! behind a mutex since the two stream readers append concurrently. A select
//! loop drives the readers together with the exit wait, the timeout and the
//! cancellation token; timeout and cancellation kill the child and keep
//! whatever output was captured.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_process::{Child, Command, ExitStatus, Stdio};
use async_trait::async_trait;
use chrono::Utc;
use futures_lite::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::WaitForCancellationFutureOwned;
use tracing::debug;

use crate::error::{Error, Result};

use super::{ExecOutcome, ExecSpec, Executor, DEFAULT_MAX_STREAM_BYTES};

#[derive(Debug, Default)]
pub struct LocalExecutor;

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, spec: ExecSpec) -> Result<ExecOutcome> {
        if spec.program.is_empty() {
            return Err(Error::ExecutorSpawnFailed {
                command: String::new(),
                reason: "program cannot be empty".into(),
            });
        }

        let start_time = Utc::now();
        let limit = if spec.max_stream_bytes > 0 {
            spec.max_stream_bytes
        } else {
            DEFAULT_MAX_STREAM_BYTES
        };

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        // The child environment is exactly what the spec carries.
        command.env_clear();
        command.envs(&spec.env);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|err| Error::ExecutorSpawnFailed {
            command: spec.program.clone(),
            reason: err.to_string(),
        })?;

        if let Some(payload) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(payload)
                    .await
                    .map_err(|err| Error::ExecutorSpawnFailed {
                        command: spec.program.clone(),
                        reason: format!("failed to write stdin: {err}"),
                    })?;
                // Dropping closes the pipe so the child sees EOF.
                drop(stdin);
            }
        }

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let shared_child = Arc::new(Mutex::new(child));
        let combined = Arc::new(Mutex::new(Vec::new()));

        let mut stdout_future =
            Box::pin(read_stream(stdout_handle, limit, Arc::clone(&combined)));
        let mut stderr_future =
            Box::pin(read_stream(stderr_handle, limit, Arc::clone(&combined)));
        let mut wait_future = Box::pin(wait_for_status(Arc::clone(&shared_child)));
        let mut timeout_future = spec
            .timeout
            .map(|duration| Box::pin(sleep(duration)) as Pin<Box<Sleep>>);
        let mut cancellation_future = spec.cancellation.as_ref().map(|token| {
            Box::pin(token.clone().cancelled_owned()) as Pin<Box<WaitForCancellationFutureOwned>>
        });

        enum Completion {
            Finished,
            TimedOut,
            Cancelled,
        }

        let mut exit_status: Option<ExitStatus> = None;
        let mut stdout_result: Option<Result<Vec<u8>>> = None;
        let mut stderr_result: Option<Result<Vec<u8>>> = None;

        let completion = loop {
            tokio::select! {
                res = &mut wait_future, if exit_status.is_none() => {
                    exit_status = Some(res?);
                }
                res = &mut stdout_future, if stdout_result.is_none() => {
                    stdout_result = Some(res);
                }
                res = &mut stderr_future, if stderr_result.is_none() => {
                    stderr_result = Some(res);
                }
                _ = async {
                    match timeout_future.as_mut() {
                        Some(fut) => fut.as_mut().await,
                        None => futures::future::pending::<()>().await,
                    }
                }, if timeout_future.is_some() => {
                    break Completion::TimedOut;
                }
                _ = async {
                    match cancellation_future.as_mut() {
                        Some(fut) => fut.as_mut().await,
                        None => futures::future::pending::<()>().await,
                    }
                }, if cancellation_future.is_some() => {
                    break Completion::Cancelled;
                }
            }

            if exit_status.is_some() && stdout_result.is_some() && stderr_result.is_some() {
                break Completion::Finished;
            }
        };

        let (timed_out, cancelled, status) = match completion {
            Completion::Finished => (
                false,
                false,
                Some(exit_status.expect("status captured before completion")),
            ),
            Completion::TimedOut => {
                debug!(program = %spec.program, "process timed out, killing");
                kill_child(Arc::clone(&shared_child)).await;
                let status = match exit_status {
                    Some(status) => Some(status),
                    None => wait_future.await.ok(),
                };
                (true, false, status)
            }
            Completion::Cancelled => {
                debug!(program = %spec.program, "call cancelled, killing process");
                kill_child(Arc::clone(&shared_child)).await;
                let status = match exit_status {
                    Some(status) => Some(status),
                    None => wait_future.await.ok(),
                };
                (false, true, status)
            }
        };

        // Drain whatever the readers still hold; partial output is kept on
        // timeout and cancellation.
        let stdout = match stdout_result {
            Some(result) => result?,
            None => stdout_future.await.unwrap_or_default(),
        };
        let stderr = match stderr_result {
            Some(result) => result?,
            None => stderr_future.await.unwrap_or_default(),
        };

        let exit_code = if timed_out || cancelled {
            -1
        } else {
            status.and_then(|s| s.code()).unwrap_or(-1)
        };

        // The reader futures may still hold clones of the Arc; copy out of
        // the lock instead of trying to unwrap it.
        let combined = combined.lock().await.clone();

        Ok(ExecOutcome {
            stdout,
            stderr,
            combined,
            exit_code,
            timed_out,
            cancelled,
            start_time,
            end_time: Utc::now(),
        })
    }
}

async fn read_stream<R>(
    reader: Option<R>,
    limit: usize,
    combined: Arc<Mutex<Vec<u8>>>,
) -> Result<Vec<u8>>
where
    R: futures_lite::AsyncRead + Unpin,
{
    let mut reader = match reader {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut output = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|err| Error::ExecutorSpawnFailed {
                command: String::new(),
                reason: format!("stream read failed: {err}"),
            })?;
        if read == 0 {
            break;
        }

        let remaining = limit.saturating_sub(output.len());
        if remaining > 0 {
            output.extend_from_slice(&buffer[..remaining.min(read)]);
        }

        let mut shared = combined.lock().await;
        let combined_remaining = (limit * 2).saturating_sub(shared.len());
        if combined_remaining > 0 {
            shared.extend_from_slice(&buffer[..combined_remaining.min(read)]);
        }
    }

    Ok(output)
}

async fn wait_for_status(child: Arc<Mutex<Child>>) -> Result<ExitStatus> {
    let mut guard = child.lock().await;
    guard.status().await.map_err(|err| Error::ExecutorSpawnFailed {
        command: String::new(),
        reason: format!("wait failed: {err}"),
    })
}

async fn kill_child(child: Arc<Mutex<Child>>) {
    let mut guard = child.lock().await;
    if let Err(err) = guard.kill() {
        debug!(error = %err, "kill failed, process likely exited already");
    }
}
