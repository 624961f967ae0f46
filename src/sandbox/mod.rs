//! Execution environment boundary.
//!
//! All build commands run inside one user-scoped sandbox. The orchestrator
//! only needs to hand it a script and get the captured output back.
//!
//! Calls block for the full duration of the command (seconds to hours), so
//! every call carries [`ExecLimits`]: an optional timeout and a
//! [`CancelToken`]. When either fires the child is killed and the call
//! fails with [`SandboxError`].
//!
//! The exit status is captured but carries no verdict. Stage success is
//! decided from artifacts on disk, see [`crate::verify`].

pub mod docker;

pub use docker::DockerSandbox;

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport-level failures. These abort the invocation.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("command exceeded its {}s timeout and was killed", .0.as_secs())]
    TimedOut(Duration),

    #[error("command was cancelled")]
    Cancelled,

    #[error("I/O error while supervising command: {0}")]
    Io(#[from] io::Error),
}

/// Captured output of one sandboxed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// Informational only.
    pub exit_code: Option<i32>,
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecLimits {
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl ExecLimits {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: CancelToken::new(),
        }
    }
}

/// An isolated environment that can run shell scripts as the invoking user.
pub trait ExecutionEnvironment {
    /// Identifier of the sandbox, for log messages.
    fn name(&self) -> &str;

    /// Run `command` (possibly a multi-line script) and capture its output.
    fn execute(&self, command: &str, limits: &ExecLimits) -> Result<RunOutput, SandboxError>;
}

/// Run `cmd` to completion under `limits`, capturing stdout and stderr.
pub fn supervise(mut cmd: Command, limits: &ExecLimits) -> Result<RunOutput, SandboxError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|source| SandboxError::Launch { program, source })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    loop {
        if limits.cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SandboxError::Cancelled);
        }

        if let Some(timeout) = limits.timeout {
            if start.elapsed() > timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SandboxError::TimedOut(timeout));
            }
        }

        if let Some(status) = child.try_wait()? {
            return Ok(RunOutput {
                stdout: collect(stdout),
                stderr: collect(stderr),
                exit_code: status.code(),
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
