//! Process execution capability.
//!
//! The command adapters never spawn processes themselves; they hand an
//! [`ExecSpec`] to an injected [`Executor`]. Two implementations ship here:
//! a local process runner and a container runner that rewrites the spec onto
//! a container runtime CLI and delegates. Environment is always explicit,
//! the child sees exactly `spec.env` and nothing from the gateway process.

pub mod container;
pub mod local;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::definition::ContainerSpec;
use crate::error::Result;

pub use container::ContainerExecutor;
pub use local::LocalExecutor;

/// Default per-stream capture ceiling, overridable via
/// `MCPANY_MAX_COMMAND_OUTPUT_SIZE`.
pub const DEFAULT_MAX_STREAM_BYTES: usize = 256 * 1024;

/// Everything needed to run one process.
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub program: String,
    pub args: Vec<String>,
    /// The complete child environment. Nothing else is inherited.
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    /// Per-stream capture limit in bytes; overflow is dropped, not fatal.
    pub max_stream_bytes: usize,
    /// Written to the child's stdin and closed; `None` leaves stdin closed.
    pub stdin: Option<Vec<u8>>,
    /// Present for container execution; ignored by the local executor.
    pub container: Option<ContainerSpec>,
}

/// Captured result of one process run.
#[derive(Debug)]
pub struct ExecOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Interleaved stdout+stderr in arrival order.
    pub combined: Vec<u8>,
    pub exit_code: i32,
    pub timed_out: bool,
    pub cancelled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, spec: ExecSpec) -> Result<ExecOutcome>;
}

/// Per-stream ceiling from the environment, falling back to the default.
pub fn max_stream_bytes_from_env() -> usize {
    std::env::var("MCPANY_MAX_COMMAND_OUTPUT_SIZE")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_MAX_STREAM_BYTES)
}
