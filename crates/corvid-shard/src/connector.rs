//! The worker-spawn seam.
//!
//! The supervisor connects to workers through [`WorkerConnector`], so the
//! production path (spawn a child process, pipe its stdio) and the test
//! path (in-process duplex pipes) share every line of supervision logic.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::info;

use corvid_core::{ShardIdentity, ShardingConfig, SHARD_COUNT_ENV, SHARD_ID_ENV};

use crate::error::{ShardError, ShardResult};

/// Boxed read half of a worker link.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a worker link.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live message channel to one worker.
pub struct WorkerLink {
    /// Frames written by the worker arrive here.
    pub reader: BoxedReader,
    /// Frames for the worker go here.
    pub writer: BoxedWriter,
    /// Process handle, when the worker is a real child process. Held for
    /// the worker's lifetime; the supervisor never kills or restarts it.
    pub child: Option<Child>,
}

/// Establishes the message channel to one worker.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self, identity: ShardIdentity) -> ShardResult<WorkerLink>;
}

/// Spawns workers as child processes with piped stdio.
///
/// The shard identity travels as two environment variables; the worker
/// reads them back with `ShardIdentity::from_env` and computes its
/// workload partition from them.
pub struct ProcessConnector {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessConnector {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &ShardingConfig) -> Self {
        Self::new(config.worker_program.clone(), config.worker_args.clone())
    }
}

#[async_trait]
impl WorkerConnector for ProcessConnector {
    async fn connect(&self, identity: ShardIdentity) -> ShardResult<WorkerLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(SHARD_ID_ENV, identity.id.to_string())
            .env(SHARD_COUNT_ENV, identity.count.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShardError::Spawn(pipe_error("stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShardError::Spawn(pipe_error("stdout")))?;

        info!(
            shard = %identity.id,
            count = identity.count,
            program = %self.program.display(),
            pid = child.id().unwrap_or(0),
            "Worker spawned"
        );

        Ok(WorkerLink {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

fn pipe_error(which: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("worker {which} not piped"))
}
