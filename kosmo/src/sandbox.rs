//! The sandbox seam: isolated execution consumed by tools.
//!
//! Tools that run commands or touch files do so through a [`Sandbox`]
//! handle carried in their context; the core never shells out directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Sandbox failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// The command could not be started or crashed the sandbox.
    #[error("exec failed: {0}")]
    Exec(String),

    /// A filesystem operation failed.
    #[error("sandbox io error: {0}")]
    Io(String),

    /// The sandbox has already been disposed.
    #[error("sandbox disposed")]
    Disposed,
}

/// Options for one command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory override.
    pub work_dir: Option<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Deadline for the command.
    pub timeout: Option<Duration>,
    /// Cancellation signal; implementations must terminate promptly.
    pub cancel: Option<CancellationToken>,
}

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Process exit code.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecResult {
    /// Whether the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }
}

/// Filesystem operations inside the sandbox.
#[async_trait]
pub trait SandboxFs: Send + Sync {
    /// Read a file.
    async fn read(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    /// Write a file, creating parents as needed.
    async fn write(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError>;

    /// List a directory's entries.
    async fn list(&self, path: &str) -> Result<Vec<String>, SandboxError>;
}

/// An isolated execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a command.
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, SandboxError>;

    /// The sandbox's filesystem handle.
    fn fs(&self) -> Arc<dyn SandboxFs>;

    /// The sandbox's working directory.
    fn work_dir(&self) -> String;

    /// Tear the sandbox down. Idempotent.
    async fn dispose(&self) -> Result<(), SandboxError>;
}

impl std::fmt::Debug for dyn Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("work_dir", &self.work_dir())
            .finish()
    }
}
