//! Shell command execution for the host control plane
//!
//! Every privileged operation in the daemon ends up here: a single shell
//! string handed to `/bin/sh -c`, a time budget, and a structured result.
//! Handlers rely on shell features (pipelines, redirection, heredocs,
//! pfexec), so the command surface stays a string; the safety boundary is
//! identifier validation at the handler edge, not quoting here.
//!
//! The executor never returns `Err`. Timeouts, non-zero exits and spawn
//! failures are all encoded in the result value so the scheduler can treat
//! every handler outcome uniformly.
//!
//! Children stay in the daemon's process group, so a SIGTERM delivered to
//! the group during host shutdown reaches them too.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// How long after a timeout kill the executor waits for the pipe readers
/// before taking whatever output they have collected. A grandchild that
/// inherited the pipes (the shell's own children survive the kill) would
/// otherwise hold the read open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(100);

/// Outcome of a single command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// True iff the command ran to completion with exit status 0.
    pub ok: bool,
    /// Captured stdout, trimmed. Partial output is preserved on timeout.
    pub stdout: String,
    /// Captured stderr, untrimmed.
    pub stderr: String,
    /// Failure description when `ok` is false: stderr, a synthesized
    /// `exit N`, or the timeout message.
    pub error: Option<String>,
    /// End-to-end duration in milliseconds.
    pub duration_ms: f64,
}

impl CommandResult {
    fn failure(error: String, stdout: String, stderr: String, duration_ms: f64) -> Self {
        Self {
            ok: false,
            stdout,
            stderr,
            error: Some(error),
            duration_ms,
        }
    }
}

/// Spawn a reader that drains one pipe into a shared buffer. The buffer is
/// shared so a timed-out command still yields whatever arrived before the
/// kill, even if the pipe itself never closes.
fn spawn_pipe_reader<R>(mut pipe: R) -> (Arc<Mutex<Vec<u8>>>, tokio::task::JoinHandle<()>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let writer = buffer.clone();
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buffer = writer.lock().expect("pipe buffer lock poisoned");
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
        }
    });
    (buffer, handle)
}

fn snapshot(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = buffer.lock().expect("pipe buffer lock poisoned");
    String::from_utf8_lossy(&bytes).to_string()
}

/// Runs shell commands with a bounded time budget.
///
/// Cheap to clone; handlers receive a clone inside their
/// [`super::tasks::TaskContext`].
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Applied when the caller does not pass an explicit timeout.
    default_timeout: Duration,
    /// Commands slower than this are logged as slow.
    slow_threshold: Duration,
    /// Prefix privileged commands with pfexec.
    use_pfexec: bool,
}

impl CommandExecutor {
    pub fn new(default_timeout_ms: u64, slow_threshold_ms: u64, use_pfexec: bool) -> Self {
        Self {
            default_timeout: Duration::from_millis(default_timeout_ms),
            slow_threshold: Duration::from_millis(slow_threshold_ms),
            use_pfexec,
        }
    }

    /// Prefix a command with pfexec when privilege escalation is enabled.
    ///
    /// Test environments run without pfexec; production hosts grant the
    /// daemon's user the needed profiles.
    pub fn privileged(&self, command: &str) -> String {
        if self.use_pfexec {
            format!("pfexec {}", command)
        } else {
            command.to_string()
        }
    }

    /// Run a command with the executor's default timeout.
    pub async fn execute(&self, command: &str) -> CommandResult {
        self.execute_with_timeout(command, self.default_timeout).await
    }

    /// Run a command with an explicit timeout. The child is killed on
    /// timeout; stdout captured up to that point is preserved.
    pub async fn execute_with_timeout(&self, command: &str, timeout: Duration) -> CommandResult {
        let start = Instant::now();
        debug!(command = %command, timeout_ms = timeout.as_millis() as u64, "Executing command");

        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                warn!(command = %command, error = %e, "Failed to spawn command");
                return CommandResult::failure(
                    format!("Failed to spawn command: {}", e),
                    String::new(),
                    String::new(),
                    duration_ms,
                );
            }
        };

        let (stdout_buf, stdout_reader) =
            spawn_pipe_reader(child.stdout.take().expect("stdout was piped"));
        let (stderr_buf, stderr_reader) =
            spawn_pipe_reader(child.stderr.take().expect("stderr was piped"));

        let wait_result = tokio::time::timeout(timeout, child.wait()).await;

        if wait_result.is_err() {
            // Timed out. Kill the shell, give the readers a moment, then
            // take whatever output exists.
            if let Err(e) = child.kill().await {
                debug!(command = %command, error = %e, "Failed to kill timed-out command");
            }
            let _ = tokio::time::timeout(
                READER_GRACE,
                futures_util::future::join(stdout_reader, stderr_reader),
            )
            .await;

            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            warn!(
                command = %command,
                timeout_ms = timeout.as_millis() as u64,
                "Command timed out"
            );
            return CommandResult::failure(
                format!("Command timed out after {}ms", timeout.as_millis()),
                snapshot(&stdout_buf).trim().to_string(),
                snapshot(&stderr_buf),
                duration_ms,
            );
        }

        // The child exited; the pipes close with it, so the readers finish.
        let _ = stdout_reader.await;
        let _ = stderr_reader.await;
        let stdout = snapshot(&stdout_buf);
        let stderr = snapshot(&stderr_buf);
        let duration = start.elapsed();
        let duration_ms = duration.as_secs_f64() * 1000.0;

        if duration > self.slow_threshold {
            warn!(
                command = %command,
                duration_ms = duration_ms as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "Slow command execution"
            );
        }

        let status = match wait_result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return CommandResult::failure(
                    format!("Failed to wait for command: {}", e),
                    stdout.trim().to_string(),
                    stderr,
                    duration_ms,
                );
            }
            Err(_) => unreachable!("timeout handled above"),
        };

        if status.success() {
            debug!(
                command = %command,
                duration_ms = duration_ms as u64,
                "Command completed"
            );
            CommandResult {
                ok: true,
                stdout: stdout.trim().to_string(),
                stderr,
                error: None,
                duration_ms,
            }
        } else {
            let error = if stderr.trim().is_empty() {
                match status.code() {
                    Some(code) => format!("exit {}", code),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.trim().to_string()
            };
            debug!(
                command = %command,
                error = %error,
                duration_ms = duration_ms as u64,
                "Command failed"
            );
            CommandResult::failure(error, stdout.trim().to_string(), stderr, duration_ms)
        }
    }
}
