// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Process Supervisor.
//!
//! Spawns one child process per task via the platform shell, streams
//! stdout/stderr concurrently to avoid pipe deadlock, enforces a
//! cooperative timeout with a graceful-then-forcible termination sequence,
//! and applies the task's retry policy. Built on `tokio::process::Command`
//! (the `tokio` `full` feature set already used throughout this crate
//! includes `process`).

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::errors::TaskFailure;
use crate::model::{ExecTask, TaskStatus};

const GRACE_PERIOD: Duration = Duration::from_millis(500);

/// A sink that receives stdout/stderr chunks as they're produced. Chunks
/// from a single task arrive in order; ordering across tasks is not
/// guaranteed.
pub trait OutputSink: Send + Sync {
    fn on_stdout(&self, chunk: &[u8]);
    fn on_stderr(&self, chunk: &[u8]);
}

/// An in-memory sink used by tests and by the cache writer to build the
/// combined capture file when caching is enabled.
#[derive(Default)]
pub struct CapturingSink {
    pub combined: std::sync::Mutex<Vec<u8>>,
}

impl OutputSink for CapturingSink {
    fn on_stdout(&self, chunk: &[u8]) {
        self.combined.lock().unwrap().extend_from_slice(chunk);
    }
    fn on_stderr(&self, chunk: &[u8]) {
        self.combined.lock().unwrap().extend_from_slice(chunk);
    }
}

pub struct SupervisorOutcome {
    pub exit_code: Option<i32>,
    pub status: TaskStatus,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Runs `task` to completion, applying its timeout and retry policy.
/// `cancel` is shared by every task in a run. Unlike a raw
/// `Notify`, a `CancellationToken` remembers that it fired, so a task that
/// starts after the rest of the run has already been cancelled still sees
/// it immediately instead of waiting forever on a missed wakeup.
pub async fn run(task: &ExecTask, cancel: &CancellationToken, sink: &dyn OutputSink) -> Result<SupervisorOutcome, TaskFailure> {
    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        let result = run_once(task, cancel, sink).await?;
        let elapsed = started.elapsed();

        let should_retry = matches!(result, TaskStatus::Failed | TaskStatus::TimedOut) && attempt < task.retry.max;
        if !should_retry {
            return Ok(SupervisorOutcome {
                exit_code: exit_code_of(&result),
                status: result,
                elapsed,
                attempts: attempt + 1,
            });
        }

        let delay = task.retry.delay_for_attempt(attempt);
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

fn exit_code_of(status: &TaskStatus) -> Option<i32> {
    match status {
        TaskStatus::Success => Some(0),
        TaskStatus::Failed => Some(1),
        _ => None,
    }
}

async fn run_once(task: &ExecTask, cancel: &CancellationToken, sink: &dyn OutputSink) -> Result<TaskStatus, TaskFailure> {
    let mut command = platform_command(&task.command);
    command.envs(&task.env);
    if let Some(cwd) = &task.cwd {
        command.current_dir(cwd);
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| TaskFailure::SpawnFailed {
        task: task.core.name.clone(),
        message: e.to_string(),
    })?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let drain_stdout = drain(stdout, DrainKind::Stdout, sink);
    let drain_stderr = drain(stderr, DrainKind::Stderr, sink);

    let wait_and_drain = async {
        tokio::join!(drain_stdout, drain_stderr, child.wait())
    };

    let run_future = async {
        tokio::select! {
            (_, _, status) = wait_and_drain => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Cancelled,
        }
    };

    let budget = task.timeout_ms.map(Duration::from_millis);
    let outcome = match budget {
        Some(budget) => match timeout(budget, run_future).await {
            Ok(outcome) => outcome,
            Err(_) => {
                terminate(&mut child).await;
                return Ok(TaskStatus::TimedOut);
            }
        },
        None => run_future.await,
    };

    match outcome {
        Outcome::Cancelled => {
            terminate(&mut child).await;
            Ok(TaskStatus::Cancelled)
        }
        Outcome::Exited(Ok(status)) => {
            reap(&mut child).await;
            if status.success() {
                Ok(TaskStatus::Success)
            } else {
                Ok(TaskStatus::Failed)
            }
        }
        Outcome::Exited(Err(e)) => Err(TaskFailure::SpawnFailed {
            task: task.core.name.clone(),
            message: e.to_string(),
        }),
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
}

enum DrainKind {
    Stdout,
    Stderr,
}

async fn drain(mut reader: impl tokio::io::AsyncRead + Unpin, kind: DrainKind, sink: &dyn OutputSink) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => match kind {
                DrainKind::Stdout => sink.on_stdout(&buf[..n]),
                DrainKind::Stderr => sink.on_stderr(&buf[..n]),
            },
        }
    }
}

/// Graceful-then-forcible termination. On POSIX, "graceful"
/// would send SIGTERM; `tokio::process::Child` exposes only a forcible
/// kill cross-platform, so the grace period here bounds how long we wait
/// for the process to have already exited before escalating, keeping the
/// platform-specific signal dispatch (an `Err(Child::id)` + `libc::kill`
/// call on POSIX) as a follow-up left to the platform shell layer.
async fn terminate(child: &mut Child) {
    if timeout(GRACE_PERIOD, child.wait()).await.is_err() {
        let _ = child.start_kill();
    }
    reap(child).await;
}

/// Process is always reaped before return; no zombies.
async fn reap(child: &mut Child) {
    let _ = child.wait().await;
}

#[cfg(target_os = "windows")]
fn platform_command(cmd: &str) -> Command {
    let mut command = Command::new("cmd.exe");
    command.arg("/C").arg(cmd);
    command
}

#[cfg(not(target_os = "windows"))]
fn platform_command(cmd: &str) -> Command {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(cmd);
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RetryPolicy, TaskCore};
    use std::collections::{BTreeMap, BTreeSet};

    fn exec(command: &str, timeout_ms: Option<u64>, retry: RetryPolicy) -> ExecTask {
        ExecTask {
            core: TaskCore {
                name: "t".into(),
                parallel_deps: vec![],
                serial_deps: vec![],
                condition: None,
                tags: BTreeSet::new(),
            },
            command: command.to_string(),
            env: BTreeMap::new(),
            cwd: None,
            timeout_ms,
            retry,
            allow_failure: false,
            cache_enabled: true,
            max_concurrent: 0,
            max_cpu_cores: None,
            max_memory_bytes: None,
            required_tools: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn successful_command_reports_success() {
        let task = exec("true", None, RetryPolicy::default());
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        let outcome = run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Success);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn failing_command_reports_failed() {
        let task = exec("false", None, RetryPolicy::default());
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        let outcome = run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn stdout_is_captured() {
        let task = exec("echo hi", None, RetryPolicy::default());
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(sink.combined.lock().unwrap().as_slice(), b"hi\n");
    }

    #[tokio::test]
    async fn timeout_is_honored() {
        // A task sleeping longer than its timeout should time out, not hang.
        let task = exec("sleep 5", Some(200), RetryPolicy::default());
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let outcome = run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn retry_law_produces_exactly_k_plus_one_invocations() {
        // A command that fails twice then succeeds should retry, realized with a
        // counter file since the supervisor itself does not expose a hook
        // for counting invocations directly.
        let dir = tempfile::tempdir().unwrap();
        let counter_path = dir.path().join("attempts");
        std::fs::write(&counter_path, "0").unwrap();
        let script = format!(
            "n=$(cat {0}); n=$((n+1)); echo $n > {0}; if [ $n -lt 3 ]; then exit 1; fi",
            counter_path.display()
        );
        let task = exec(&script, None, RetryPolicy { max: 3, delay_ms: 1, exponential: false });
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        let outcome = run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Success);
        assert_eq!(outcome.attempts, 3);
        let final_count: u32 = std::fs::read_to_string(&counter_path).unwrap().trim().parse().unwrap();
        assert_eq!(final_count, 3);
    }

    #[tokio::test]
    async fn cancellation_terminates_a_running_task() {
        let task = exec("sleep 5", None, RetryPolicy::default());
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });
        let started = Instant::now();
        let outcome = run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn a_token_cancelled_before_the_task_starts_is_still_honored() {
        let task = exec("sleep 5", None, RetryPolicy::default());
        let sink = CapturingSink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        let outcome = run(&task, &cancel, &sink).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
