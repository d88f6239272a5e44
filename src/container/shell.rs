// Stateful shell - one long-lived interactive shell per container

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::{ContainerError, ShellError};
use super::runtime::{ContainerHandle, ContainerRuntime};

/// How long after an interrupt we wait for the pending sentinel to flush
/// before declaring the shell unusable.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// Result of one command run against the shell.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A long-lived interactive shell with piped stdio.
///
/// Commands are framed with a per-call random sentinel carrying the exit
/// code, so end-of-output detection is line-oriented and collision-proof in
/// practice. The shell's own state (cwd, exported variables, aliases,
/// functions) survives between calls because the process survives.
pub struct ShellSession {
    runtime: Arc<dyn ContainerRuntime>,
    handle: ContainerHandle,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_buf: Arc<Mutex<String>>,
    /// Pid of the shell process as the shell itself sees it (inside the
    /// container for sandboxed runtimes).
    shell_pid: u32,
    command_count: u64,
    broken: bool,
}

impl ShellSession {
    /// Spawn the shell via the runtime, drain its banner, and learn its pid.
    pub async fn open(
        runtime: Arc<dyn ContainerRuntime>,
        handle: ContainerHandle,
        work_dir: &std::path::Path,
    ) -> Result<Self, ContainerError> {
        let mut child = runtime.open_shell(&handle, work_dir).await?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::NotReady("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::NotReady("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShellError::NotReady("no stderr pipe".to_string()))?;

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let buf_clone = stderr_buf.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        buf_clone.lock().unwrap().push_str(&line);
                    }
                }
            }
        });

        let mut session = Self {
            runtime,
            handle,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr_buf,
            shell_pid: 0,
            command_count: 0,
            broken: false,
        };

        session.handshake().await?;
        Ok(session)
    }

    /// Drain any banner output and capture the shell's pid.
    async fn handshake(&mut self) -> Result<(), ShellError> {
        let marker = format!("__ready_{}", uuid::Uuid::new_v4().simple());
        let line = format!("echo {} $$\n", marker);
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let stdout = &mut self.stdout;
        let probed = timeout(Duration::from_secs(10), async move {
            let mut line = String::new();
            loop {
                line.clear();
                let n = stdout.read_line(&mut line).await?;
                if n == 0 {
                    return Err(ShellError::ProcessExited);
                }
                if let Some(rest) = line.trim_end().strip_prefix(&marker) {
                    let pid = rest.trim().parse::<u32>().unwrap_or(0);
                    return Ok(pid);
                }
            }
        })
        .await;

        match probed {
            Ok(Ok(pid)) => {
                self.shell_pid = pid;
                debug!(pid = pid, "shell ready");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ShellError::NotReady(
                "no response to readiness probe within 10s".to_string(),
            )),
        }
    }

    /// Execute one command, waiting at most `limit` for it to finish.
    ///
    /// On timeout the foreground job receives SIGINT and the call returns
    /// exit code 124; the shell itself stays alive for the next call unless
    /// the interrupted command refuses to die within the grace period.
    pub async fn run(
        &mut self,
        command: &str,
        limit: Duration,
    ) -> Result<CommandOutput, ShellError> {
        if self.broken {
            return Err(ShellError::ProcessExited);
        }

        let sentinel = format!("__eoc_{}", uuid::Uuid::new_v4().simple());
        // The brace group isolates the command; the trailing printf frames
        // the sentinel on a fresh line and carries the exit code.
        let script = format!(
            "{{ {}\n}}; __rc=$?; printf '\\n{} %d\\n' \"$__rc\"\n",
            command, sentinel
        );

        self.stderr_buf.lock().unwrap().clear();
        let mut stdout_buf = String::new();

        self.stdin.write_all(script.as_bytes()).await?;
        self.stdin.flush().await?;

        let waited = timeout(
            limit,
            read_until_sentinel(&mut self.stdout, &sentinel, &mut stdout_buf),
        )
        .await;

        let exit_code = match waited {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                self.broken = true;
                return Err(e);
            }
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, interrupting foreground job");
                let _ = self
                    .runtime
                    .signal_foreground(&self.handle, self.shell_pid)
                    .await;

                // Give the interrupted command a moment to unwind so the
                // pending sentinel does not pollute the next call.
                let mut discard = String::new();
                let drained = timeout(
                    INTERRUPT_GRACE,
                    read_until_sentinel(&mut self.stdout, &sentinel, &mut discard),
                )
                .await;
                if !matches!(drained, Ok(Ok(_))) {
                    warn!("shell did not recover after interrupt, marking for restart");
                    self.broken = true;
                }

                self.command_count += 1;
                return Ok(CommandOutput {
                    exit_code: 124,
                    stdout: strip_injected_newline(stdout_buf),
                    stderr: format!(
                        "command timed out after {} seconds",
                        limit.as_secs()
                    ),
                });
            }
        };

        // Let the stderr reader catch up with anything buffered.
        tokio::time::sleep(Duration::from_millis(25)).await;
        let stderr = std::mem::take(&mut *self.stderr_buf.lock().unwrap());

        self.command_count += 1;
        Ok(CommandOutput {
            exit_code,
            stdout: strip_injected_newline(stdout_buf),
            stderr,
        })
    }

    pub fn command_count(&self) -> u64 {
        self.command_count
    }

    /// True when the shell process has died or been marked unusable.
    pub fn is_broken(&mut self) -> bool {
        if self.broken {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(_)) | Err(_) => {
                self.broken = true;
                true
            }
            Ok(None) => false,
        }
    }

    /// Ask the shell to exit, then force-terminate if it lingers.
    pub async fn close(&mut self) {
        let _ = self.stdin.write_all(b"exit\n").await;
        let _ = self.stdin.flush().await;
        match timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = self.child.kill().await;
            }
        }
        self.broken = true;
    }
}

async fn read_until_sentinel(
    stdout: &mut BufReader<ChildStdout>,
    sentinel: &str,
    collected: &mut String,
) -> Result<i32, ShellError> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = stdout.read_line(&mut line).await?;
        if n == 0 {
            return Err(ShellError::ProcessExited);
        }
        let trimmed = line.trim_end_matches('\n');
        if let Some(rest) = trimmed.strip_prefix(sentinel) {
            return Ok(rest.trim().parse::<i32>().unwrap_or(-1));
        }
        collected.push_str(&line);
    }
}

/// The sentinel printf injects one leading newline so the marker always
/// starts a fresh line; remove that newline from the captured output.
fn strip_injected_newline(mut stdout: String) -> String {
    if stdout.ends_with('\n') {
        stdout.pop();
    }
    stdout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_injected_newline() {
        assert_eq!(strip_injected_newline("hi\n\n".to_string()), "hi\n");
        assert_eq!(strip_injected_newline("hi\n".to_string()), "hi");
        assert_eq!(strip_injected_newline("\n".to_string()), "");
        assert_eq!(strip_injected_newline(String::new()), "");
    }
}
