//! Shell command execution with a time bound.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use suiterun_core::TaskOutcome;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default bound on a single task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// How long to wait for output readers once the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Errors from running external programs.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with {status}: {output}")]
    Exited {
        program: String,
        status: ExitStatus,
        output: String,
    },

    /// Waiting on the program failed.
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The argument could not be encoded.
    #[error("failed to encode argument: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of one task command.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Verdict.
    pub result: TaskOutcome,
    /// Wall-clock time until exit or kill.
    pub elapsed: Duration,
    /// Interleaved stdout and stderr.
    pub output: Vec<u8>,
}

impl ExecutionOutcome {
    /// Duration in whole seconds, as stored in results.
    pub fn duration_secs(&self) -> u64 {
        self.elapsed.as_secs()
    }
}

/// Runs task commands through a shell.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: PathBuf,
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}

impl CommandRunner {
    /// Create a runner using `/bin/bash`, or `/bin/sh` when bash is missing.
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: detect_shell(),
            timeout,
        }
    }

    /// Builder method to override the shell.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` and classify the outcome. Never fails: a command that
    /// cannot be started is reported as `Failed` with the error as output.
    pub async fn run(&self, command: &str) -> ExecutionOutcome {
        let started = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        // Own group, so a timeout also reaches whatever the shell started.
        #[cfg(unix)]
        cmd.process_group(0);

        let (mut child, readers, mut rx) = match spawn_captured(cmd) {
            Ok(spawned) => spawned,
            Err(e) => {
                let error = ExecutorError::Spawn {
                    program: self.shell.display().to_string(),
                    source: e,
                };
                warn!(error = %error, "Task command could not be started");
                return ExecutionOutcome {
                    result: TaskOutcome::Failed,
                    elapsed: started.elapsed(),
                    output: error.to_string().into_bytes(),
                };
            }
        };

        let mut trailer = None;
        let result = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => TaskOutcome::Passed,
            Ok(Ok(status)) => {
                debug!(status = %status, "Task command failed");
                TaskOutcome::Failed
            }
            Ok(Err(e)) => {
                trailer = Some(format!("\nfailed to wait for the command: {}\n", e));
                TaskOutcome::Failed
            }
            Err(_) => {
                info!(timeout_secs = self.timeout.as_secs(), "Task timed out, killing it");
                if let Err(e) = kill_group(&child) {
                    warn!(error = %e, "Failed to kill the task's process group");
                }
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out task");
                }
                TaskOutcome::Timeout
            }
        };
        let elapsed = started.elapsed();

        let mut output = collect_output(readers, &mut rx).await;
        if let Some(trailer) = trailer {
            output.extend_from_slice(trailer.as_bytes());
        }

        ExecutionOutcome {
            result,
            elapsed,
            output,
        }
    }
}

/// Run a program to completion with arguments and return its output.
/// Used for the preparation and after-task scripts.
pub async fn run_program(program: &Path, args: &[&str]) -> Result<Vec<u8>, ExecutorError> {
    let name = program.display().to_string();
    let mut cmd = Command::new(program);
    cmd.args(args);

    let (mut child, readers, mut rx) = spawn_captured(cmd).map_err(|e| ExecutorError::Spawn {
        program: name.clone(),
        source: e,
    })?;

    let status = child.wait().await.map_err(|e| ExecutorError::Wait {
        program: name.clone(),
        source: e,
    })?;
    let output = collect_output(readers, &mut rx).await;

    if status.success() {
        Ok(output)
    } else {
        Err(ExecutorError::Exited {
            program: name,
            status,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: kill(2) only sends a signal; the group was created at spawn.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> std::io::Result<()> {
    Ok(())
}

fn detect_shell() -> PathBuf {
    let bash = Path::new("/bin/bash");
    if bash.exists() {
        bash.to_path_buf()
    } else {
        PathBuf::from("/bin/sh")
    }
}

type Readers = [JoinHandle<()>; 2];

fn spawn_captured(
    mut cmd: Command,
) -> std::io::Result<(Child, Readers, mpsc::UnboundedReceiver<Vec<u8>>)> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let (tx, rx) = mpsc::unbounded_channel();

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let readers = [
        tokio::spawn(pump(stdout, tx.clone())),
        tokio::spawn(pump(stderr, tx)),
    ];

    Ok((child, readers, rx))
}

async fn pump<R>(reader: Option<R>, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(line.clone()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading task output");
                break;
            }
        }
    }
}

/// Wait briefly for readers to hit EOF. Orphaned grandchildren may keep a
/// pipe open after the shell is gone; their output is cut off.
async fn collect_output(readers: Readers, rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    let mut output = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        output.extend_from_slice(&chunk);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_is_passed() {
        let runner = CommandRunner::default();
        let outcome = runner.run("echo hello").await;

        assert_eq!(outcome.result, TaskOutcome::Passed);
        assert_eq!(String::from_utf8_lossy(&outcome.output), "hello\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let runner = CommandRunner::default();
        let outcome = runner.run("echo oops >&2; exit 1").await;

        assert_eq!(outcome.result, TaskOutcome::Failed);
        assert!(String::from_utf8_lossy(&outcome.output).contains("oops"));
    }

    #[tokio::test]
    async fn test_combined_output() {
        let runner = CommandRunner::default();
        let outcome = runner.run("echo out; echo err >&2").await;

        let text = String::from_utf8_lossy(&outcome.output);
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let bound = Duration::from_millis(300);
        let runner = CommandRunner::new(bound);
        let outcome = runner.run("sleep 5").await;

        assert_eq!(outcome.result, TaskOutcome::Timeout);
        assert!(outcome.elapsed >= bound);
        assert!(outcome.elapsed < Duration::from_secs(3));
        assert_eq!(outcome.duration_secs(), 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = format!("(sleep 1; touch {}) & sleep 5", marker.display());

        let runner = CommandRunner::new(Duration::from_millis(300));
        let outcome = runner.run(&command).await;
        assert_eq!(outcome.result, TaskOutcome::Timeout);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_shell_is_failed() {
        let runner = CommandRunner::default().with_shell("/nonexistent/shell");
        let outcome = runner.run("true").await;

        assert_eq!(outcome.result, TaskOutcome::Failed);
        assert!(String::from_utf8_lossy(&outcome.output).contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_run_program() {
        let output = run_program(Path::new("/bin/sh"), &["-c", "echo $0", "arg0"])
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output), "arg0\n");

        let err = run_program(Path::new("/bin/sh"), &["-c", "exit 3"])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Exited { .. }));
    }
}
