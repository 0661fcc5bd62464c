//! Small process-related helpers shared across the workspace.
//!
//! External downloaders are optional runtime dependencies, so callers need to
//! check for them before use and run them with bounded output capture.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Upper bound on the bytes of stderr kept from a child process.
pub const STDERR_TAIL_LIMIT: usize = 8 * 1024;

/// Create a `tokio::process::Command` that is killed when its handle is dropped.
///
/// On Windows the `CREATE_NO_WINDOW` flag is applied as well.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.kill_on_drop(true);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Result of looking for an external binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPresence {
    /// The binary ran and reported a version line.
    Available { version: String },
    /// The binary could not be spawned or exited with an error.
    Missing,
}

/// Check whether `program` can be executed by running it with `version_arg`.
///
/// Spawn failures (e.g. binary not on `PATH`) and non-zero exits both map to
/// [`ToolPresence::Missing`]; this never returns an error.
pub async fn detect_tool(program: impl AsRef<OsStr>, version_arg: &str) -> ToolPresence {
    let mut cmd = tokio_command(program);
    cmd.arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    match cmd.output().await {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            ToolPresence::Available { version }
        }
        _ => ToolPresence::Missing,
    }
}

/// Outcome of a child process run to completion.
#[derive(Debug)]
pub struct CapturedRun {
    pub status: ExitStatus,
    /// Last [`STDERR_TAIL_LIMIT`] bytes of stderr, lossily decoded.
    pub stderr_tail: String,
}

impl CapturedRun {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Errors from [`run_captured`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The process could not be started.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    /// The process did not exit within the deadline and was killed.
    #[error("process timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    /// Waiting on the process failed.
    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Run `cmd` to completion, discarding stdout and capturing the stderr tail.
///
/// The child is killed if it outlives `timeout`.
pub async fn run_captured(
    mut cmd: tokio::process::Command,
    timeout: Duration,
) -> Result<CapturedRun, RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(RunError::Spawn)?;
    let stderr = child.stderr.take();

    let stderr_task = tokio::spawn(async move {
        match stderr {
            Some(stream) => read_tail(stream, STDERR_TAIL_LIMIT).await,
            None => String::new(),
        }
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(RunError::Wait(e)),
        Err(_) => {
            let _ = child.kill().await;
            stderr_task.abort();
            return Err(RunError::TimedOut(timeout));
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();
    Ok(CapturedRun {
        status,
        stderr_tail,
    })
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail: Vec<u8> = Vec::with_capacity(limit.min(1024));
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}
