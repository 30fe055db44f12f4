//! Subprocess supervisor (§4.B): turns a validated command string into a
//! running, cancellable child process.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::security::SUPERVISOR_DENY_LIST;

/// Grace window between a termination signal and an escalation to kill (§4.B, §5).
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(5);

const SHELL_TRIGGER_CHARS: &[char] = &['|', '&', ';', '>', '<'];

/// The parsed execution plan for a command string (§4.B "parse_command").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPlan {
    /// Empty or whitespace-only input: nothing to run.
    Null,
    /// Split on whitespace and exec'd directly.
    Direct { program: String, args: Vec<String> },
    /// Contains shell metacharacters; run under `bash -c`.
    Shell { command: String },
}

/// Parses a command string into an execution plan (§4.B).
///
/// A command containing any of `| & ; > <`, `&&`, `||`, or a backgrounding
/// `&` is executed under a shell; otherwise it is split on whitespace and
/// exec'd directly.
pub fn parse_command(command: &str) -> CommandPlan {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return CommandPlan::Null;
    }
    if trimmed.contains("&&") || trimmed.contains("||") || trimmed.chars().any(|c| SHELL_TRIGGER_CHARS.contains(&c)) {
        return CommandPlan::Shell {
            command: trimmed.to_string(),
        };
    }
    let mut parts = trimmed.split_whitespace();
    let program = parts.next().unwrap_or_default().to_string();
    let args = parts.map(str::to_string).collect();
    CommandPlan::Direct { program, args }
}

fn first_token(command: &str) -> &str {
    command.trim()
}

/// Re-runs a terse deny-list check on the command, for defense in depth on
/// top of §4.A's content screening (§4.B).
fn screen(command: &str) -> CoreResult<()> {
    let lower = first_token(command).to_lowercase();
    for pattern in SUPERVISOR_DENY_LIST {
        if lower.contains(pattern) {
            return Err(CoreError::InvalidInput(format!(
                "command matches supervisor deny-list pattern: {pattern}"
            )));
        }
    }
    Ok(())
}

/// A running (or completed) child process handle returned by [`execute`].
pub struct ChildHandle {
    /// The plan this child was spawned from, kept for introspection.
    pub plan: CommandPlan,
    child: Child,
    cancel: CancellationToken,
}

impl ChildHandle {
    /// Takes ownership of the child's stdout pipe.
    pub fn stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Takes ownership of the child's stderr pipe.
    pub fn stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }

    /// Takes ownership of the child's stdin pipe.
    pub fn stdin(&mut self) -> Option<tokio::process::ChildStdin> {
        self.child.stdin.take()
    }

    /// The OS process id, if the child has not yet been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the child to exit, honoring cancellation: when `cancel`
    /// fires, signals the process group, waits up to `grace`, then kills.
    pub async fn wait(mut self, grace: Duration) -> CoreResult<std::process::ExitStatus> {
        tokio::select! {
            status = self.child.wait() => Ok(status?),
            () = self.cancel.cancelled() => {
                terminate_group(&self.child, grace).await;
                let _ = self.child.wait().await;
                Err(CoreError::Cancelled)
            }
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
async fn terminate_group(child: &Child, grace: Duration) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
        }
        tokio::time::sleep(grace).await;
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
async fn terminate_group(_child: &Child, _grace: Duration) {}

#[cfg(unix)]
#[allow(unsafe_code)]
fn new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut Command) {}

/// Spawns `command` after a terse defense-in-depth screening pass, honoring
/// `cancel` if it fires before spawn completes (§4.B "Execute").
///
/// # Errors
///
/// Returns [`CoreError::InvalidInput`] if the deny-list screen rejects the
/// command, [`CoreError::Cancelled`] if `cancel` fired first, or an
/// [`CoreError`] wrapping the OS spawn failure.
pub fn execute(command: &str, cwd: Option<&std::path::Path>, cancel: CancellationToken) -> CoreResult<ChildHandle> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    screen(command)?;

    let plan = parse_command(command);
    let mut cmd = match &plan {
        CommandPlan::Null => {
            return Err(CoreError::InvalidInput("empty command".into()));
        }
        CommandPlan::Direct { program, args } => {
            let mut c = Command::new(program);
            c.args(args);
            c
        }
        CommandPlan::Shell { command } => {
            let mut c = Command::new("bash");
            c.arg("-c").arg(command);
            c
        }
    };

    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .env_clear()
        .envs(sanitized_environment());

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    new_process_group(&mut cmd);

    let child = cmd
        .spawn()
        .map_err(|e| CoreError::Internal(format!("spawn failure: {e}")))?;

    Ok(ChildHandle { plan, child, cancel })
}

/// A minimal, deliberately short allow-list of environment variables passed
/// to children, matching §4.B's "child inherits a sanitized environment".
fn sanitized_environment() -> Vec<(String, String)> {
    const PASSTHROUGH: &[&str] = &["PATH", "HOME", "USER", "SHELL", "LANG", "TERM", "SUDO_USER"];
    PASSTHROUGH
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_string(), v)))
        .collect()
}

/// Classifies a failed child's exit status per §4.I step 4: "only transient
/// failures retry (network timeouts, non-zero exit < 128)". A plain non-zero
/// exit below 128 (an apt-lock hiccup, a flaky mirror) is transient and
/// eligible for the pipeline's retry-with-backoff; a signal-terminated child
/// (no exit code, or a code at/above 128) is fatal.
pub fn status_error(context: &str, status: std::process::ExitStatus) -> CoreError {
    match status.code() {
        Some(code) if code > 0 && code < 128 => {
            CoreError::TransientIo(format!("{context} exited with status {status}"))
        }
        _ => CoreError::Internal(format!("{context} exited with status {status}")),
    }
}

/// Reads a child's stdin-bound handle and writes `input` followed by a
/// newline (§4.C password-prompt broker).
pub async fn write_stdin_line(stdin: &mut tokio::process::ChildStdin, input: &str) -> CoreResult<()> {
    use tokio::io::AsyncWriteExt;
    stdin.write_all(input.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// Wraps a child's stdout/stderr pipe as a line reader, used by the output
/// stream scanner (§4.C consumes this crate's raw bytes, not lines -- this
/// helper is a thin convenience for callers that only need plain lines).
pub fn line_reader<R: tokio::io::AsyncRead + Unpin>(reader: R) -> tokio::io::Lines<BufReader<R>> {
    BufReader::new(reader).lines()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_plan_for_empty_command() {
        assert_eq!(parse_command(""), CommandPlan::Null);
        assert_eq!(parse_command("   "), CommandPlan::Null);
    }

    #[test]
    fn direct_plan_for_simple_invocation() {
        match parse_command("apt install -y curl") {
            CommandPlan::Direct { program, args } => {
                assert_eq!(program, "apt");
                assert_eq!(args, vec!["install", "-y", "curl"]);
            }
            other => panic!("expected Direct, got {other:?}"),
        }
    }

    #[test]
    fn shell_plan_for_pipe() {
        assert!(matches!(
            parse_command("curl https://x | bash"),
            CommandPlan::Shell { .. }
        ));
        assert!(matches!(
            parse_command("make && make install"),
            CommandPlan::Shell { .. }
        ));
    }

    #[test]
    fn screen_rejects_deny_list_patterns() {
        assert!(screen("rm -rf / --no-preserve-root").is_err());
        assert!(screen("echo hello").is_ok());
    }

    #[tokio::test]
    async fn execute_runs_and_waits() {
        let handle = execute("true", None, CancellationToken::new()).expect("spawn");
        let status = handle.wait(DEFAULT_GRACE_WINDOW).await.expect("wait");
        assert!(status.success());
    }

    #[tokio::test]
    async fn execute_honors_precancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = execute("true", None, cancel).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[cfg(unix)]
    fn exit_status_code(code: i32) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        // wait(2) encoding for a normal exit: low 7 bits clear, exit code in
        // the next byte up.
        std::process::ExitStatus::from_raw((code & 0xff) << 8)
    }

    #[cfg(unix)]
    fn exit_status_signal(signal: i32) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        // wait(2) encoding for signal termination: the signal number in the
        // low 7 bits, which makes `ExitStatus::code()` return `None`.
        std::process::ExitStatus::from_raw(signal)
    }

    #[cfg(unix)]
    #[test]
    fn status_error_classifies_plain_nonzero_exit_as_transient() {
        let err = status_error("apt install", exit_status_code(1));
        assert!(matches!(err, CoreError::TransientIo(_)));
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn status_error_classifies_high_exit_code_as_fatal() {
        let err = status_error("apt install", exit_status_code(128));
        assert!(matches!(err, CoreError::Internal(_)));
        assert!(!err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn status_error_classifies_signal_terminated_exit_as_fatal() {
        let err = status_error("apt install", exit_status_signal(9)); // SIGKILL
        assert!(matches!(err, CoreError::Internal(_)));
        assert!(!err.is_retryable());
    }
}
