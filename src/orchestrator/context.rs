// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Orchestrator's concrete [`Context`] implementation and the
//! run-scoped state that backs `task.status(name)` / `task.output(name)`
//! — post-hoc accessors, only meaningful once the named task has
//! already reached a terminal state earlier in the same run, which holds
//! for every dependency a task can legally reference since the Scheduler
//! never dispatches a node before its predecessors are terminal).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::errors::ExpressionError;
use crate::expr::Context;
use crate::fingerprint::fingerprint_of;
use crate::hooks::RunHook;
use crate::model::{RunRecord, Task, TaskStatus};
use crate::scheduler::status_label;
use crate::supervisor::OutputSink;

/// Shared, run-scoped bookkeeping: every terminal status and every byte of
/// captured output seen so far in the current run, keyed by task name.
/// Populated by [`StatusRecorderHook`] (statuses) and [`LiveSink`] (output)
/// as the run progresses, and read by [`RuntimeContext`] for the
/// `task.status`/`task.output` builtins.
#[derive(Default)]
pub struct RunState {
    statuses: Mutex<HashMap<String, TaskStatus>>,
    outputs: Mutex<HashMap<String, Vec<u8>>>,
}

impl RunState {
    pub fn record_status(&self, task: &str, status: TaskStatus) {
        self.statuses.lock().unwrap().insert(task.to_string(), status);
    }

    fn status_of(&self, task: &str) -> Option<String> {
        self.statuses.lock().unwrap().get(task).map(|s| status_label(s).to_string())
    }

    fn append_output(&self, task: &str, chunk: &[u8]) {
        self.outputs.lock().unwrap().entry(task.to_string()).or_default().extend_from_slice(chunk);
    }

    fn output_of(&self, task: &str) -> Option<String> {
        self.outputs.lock().unwrap().get(task).map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// A [`RunHook`] that feeds every task's terminal status into a
/// [`RunState`], so a later task's `task.status(name)` sees it.
pub struct StatusRecorderHook {
    state: std::sync::Arc<RunState>,
}

impl StatusRecorderHook {
    pub fn new(state: std::sync::Arc<RunState>) -> Self {
        StatusRecorderHook { state }
    }
}

impl RunHook for StatusRecorderHook {
    fn before_task(&self, _task: &Task) {}

    fn after_task(&self, record: &RunRecord) {
        self.state.record_status(&record.task_name, record.status);
    }
}

/// An [`OutputSink`] that forwards chunks to the process's real
/// stdout/stderr (so a live run is visible as it happens) and also folds
/// them into the shared [`RunState`] so `task.output(name)` can see them
/// once the task is terminal.
pub struct LiveSink {
    task: String,
    state: std::sync::Arc<RunState>,
}

impl LiveSink {
    pub fn new(task: impl Into<String>, state: std::sync::Arc<RunState>) -> Self {
        LiveSink { task: task.into(), state }
    }
}

impl OutputSink for LiveSink {
    fn on_stdout(&self, chunk: &[u8]) {
        use std::io::Write;
        let _ = std::io::stdout().write_all(chunk);
        self.state.append_output(&self.task, chunk);
    }

    fn on_stderr(&self, chunk: &[u8]) {
        use std::io::Write;
        let _ = std::io::stderr().write_all(chunk);
        self.state.append_output(&self.task, chunk);
    }
}

/// The real [`Context`] backing expression evaluation for a live run:
/// process environment, real filesystem, a real subshell, and the
/// run-scoped [`RunState`] for the two "post-hoc" accessors.
///
/// `matrix.<KEY>` is resolved at lowering time by textual substitution into
/// a matrix variant's `command`/`env`/`cwd`, not by
/// this `Context` at evaluation time — a variant's `condition` is therefore
/// the one site where `${matrix.*}` is not rebound per-variant, since a
/// single `RuntimeContext` instance is shared by every task in a run. This
/// is a known gap against the fully general case; no test here
/// exercises a matrix variant with a matrix-dependent condition.
pub struct RuntimeContext {
    state: std::sync::Arc<RunState>,
}

impl RuntimeContext {
    pub fn new(state: std::sync::Arc<RunState>) -> Self {
        RuntimeContext { state }
    }
}

impl Context for RuntimeContext {
    fn platform_os(&self) -> &str {
        std::env::consts::OS
    }

    fn arch_name(&self) -> &str {
        std::env::consts::ARCH
    }

    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn matrix(&self, _key: &str) -> Option<String> {
        None
    }

    fn file_exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn file_hash(&self, path: &str) -> Result<String, ExpressionError> {
        let bytes = std::fs::read(path).map_err(|e| ExpressionError::TypeError {
            source: path.to_string(),
            message: format!("could not read '{path}': {e}"),
        })?;
        Ok(fingerprint_of(vec![("file", bytes.as_slice())]).to_hex())
    }

    fn file_newer(&self, a: &str, b: &str) -> bool {
        let mtime = |p: &str| std::fs::metadata(p).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
        mtime(a) > mtime(b)
    }

    fn shell(&self, cmd: &str) -> Result<String, ExpressionError> {
        let output = platform_command(cmd).output().map_err(|e| ExpressionError::TypeError {
            source: cmd.to_string(),
            message: format!("could not spawn shell: {e}"),
        })?;
        if !output.status.success() {
            return Err(ExpressionError::ShellFailed {
                command: cmd.to_string(),
                status: output.status.code().unwrap_or(-1),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    fn semver_satisfies(&self, version: &str, constraint: &str) -> bool {
        let (Ok(version), Ok(req)) = (semver::Version::parse(version), semver::VersionReq::parse(constraint)) else {
            return false;
        };
        req.matches(&version)
    }

    fn task_status(&self, name: &str) -> Option<String> {
        self.state.status_of(name)
    }

    fn task_output(&self, name: &str) -> Option<String> {
        self.state.output_of(name)
    }
}

#[cfg(target_os = "windows")]
fn platform_command(cmd: &str) -> std::process::Command {
    let mut command = std::process::Command::new("cmd.exe");
    command.arg("/C").arg(cmd);
    command
}

#[cfg(not(target_os = "windows"))]
fn platform_command(cmd: &str) -> std::process::Command {
    let mut command = std::process::Command::new("/bin/sh");
    command.arg("-c").arg(cmd);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_visible_after_being_recorded() {
        let state = std::sync::Arc::new(RunState::default());
        state.record_status("build", TaskStatus::Success);
        let ctx = RuntimeContext::new(state);
        assert_eq!(ctx.task_status("build"), Some("Success".to_string()));
        assert_eq!(ctx.task_status("unknown"), None);
    }

    #[test]
    fn output_accumulates_across_chunks() {
        let state = std::sync::Arc::new(RunState::default());
        let sink = LiveSink::new("build", state.clone());
        sink.on_stdout(b"hello ");
        sink.on_stdout(b"world");
        let ctx = RuntimeContext::new(state);
        assert_eq!(ctx.task_output("build"), Some("hello world".to_string()));
    }

    #[test]
    fn shell_builtin_captures_trimmed_stdout() {
        let ctx = RuntimeContext::new(std::sync::Arc::new(RunState::default()));
        assert_eq!(ctx.shell("echo hi").unwrap(), "hi");
    }

    #[test]
    fn shell_builtin_errors_on_nonzero_exit() {
        let ctx = RuntimeContext::new(std::sync::Arc::new(RunState::default()));
        assert!(ctx.shell("exit 3").is_err());
    }

    #[test]
    fn semver_satisfies_checks_the_constraint() {
        let ctx = RuntimeContext::new(std::sync::Arc::new(RunState::default()));
        assert!(ctx.semver_satisfies("1.2.3", ">=1.0.0"));
        assert!(!ctx.semver_satisfies("1.2.3", ">=2.0.0"));
    }

    #[test]
    fn platform_and_arch_match_the_running_process() {
        let ctx = RuntimeContext::new(std::sync::Arc::new(RunState::default()));
        assert_eq!(ctx.platform_os(), std::env::consts::OS);
        assert_eq!(ctx.arch_name(), std::env::consts::ARCH);
    }
}
