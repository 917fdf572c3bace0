// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The task data model: the typed records the graph builder
//! lowers configuration into, and the records a run produces.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Retry policy. `max = 0` means no retry. `delay_ms = 0` with
/// `exponential = true` is legal (delays remain zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max: 0,
            delay_ms: 0,
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given zero-indexed retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.exponential {
            Duration::from_millis(self.delay_ms.saturating_mul(1u64 << attempt.min(32)))
        } else {
            Duration::from_millis(self.delay_ms)
        }
    }
}

/// A required tool and the version constraint a task expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredTool {
    pub kind: String,
    pub version: String,
}

/// Fields shared by every task, regardless of whether it carries a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCore {
    pub name: String,
    #[serde(default)]
    pub parallel_deps: Vec<String>,
    #[serde(default)]
    pub serial_deps: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// A task with a command: the only kind the Cache and Process Supervisor
/// operate on (meta tasks vs command tasks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecTask {
    pub core: TaskCore,
    pub command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub max_concurrent: u32,
    #[serde(default)]
    pub max_cpu_cores: Option<u32>,
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    #[serde(default)]
    pub required_tools: BTreeSet<RequiredToolKey>,
}

fn default_true() -> bool {
    true
}

/// `RequiredTool` is not `Ord`, but a `BTreeSet` needs one; this newtype
/// orders by `(kind, version)` for deterministic iteration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequiredToolKey(pub String, pub String);

/// An aggregate task with no command: it exists purely to group
/// dependencies. Never cached, never dispatched to the Process Supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaTask {
    pub core: TaskCore,
}

/// A named declarative unit. The Exec/Meta split makes "a task
/// with `cache_enabled=true` must have a `command`" a structural invariant
/// rather than a runtime check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Task {
    Exec(ExecTask),
    Meta(MetaTask),
}

impl Task {
    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn core(&self) -> &TaskCore {
        match self {
            Task::Exec(t) => &t.core,
            Task::Meta(t) => &t.core,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, Task::Exec(t) if t.cache_enabled)
    }

    pub fn as_exec(&self) -> Option<&ExecTask> {
        match self {
            Task::Exec(t) => Some(t),
            Task::Meta(_) => None,
        }
    }
}

/// Terminal (and in-flight) status of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Failed,
    /// The task's own `condition` evaluated to `false`. A success terminal:
    /// the task was deliberately excluded from this run.
    Skipped,
    /// A transitive dependency terminated in `Failed` with
    /// `allow_failure = false`, so this task was never dispatched.
    /// Distinct from `Skipped` because it is a
    /// non-success terminal unless this task's own `allow_failure` says
    /// otherwise when the aggregate run status is computed.
    SkippedUpstreamFailure,
    CacheHit,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    /// A terminal is a "success terminal" if it does not count against the
    /// aggregate run status on its own — independent
    /// of any task-level `allow_failure` override, which the scheduler
    /// applies separately for `Failed` and `SkippedUpstreamFailure`.
    pub fn is_success_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Skipped | TaskStatus::CacheHit)
    }
}

/// Persisted once a task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub task_name: String,
    pub start_wallclock_ms: u128,
    pub duration_ms: u128,
    pub exit_code: Option<i32>,
    pub status: TaskStatus,
    pub fingerprint: Option<Fingerprint>,
    pub captured_output_ref: Option<String>,
    pub retry_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_retry_doubles_per_attempt() {
        let retry = RetryPolicy {
            max: 3,
            delay_ms: 100,
            exponential: true,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn zero_delay_exponential_stays_zero() {
        let retry = RetryPolicy {
            max: 2,
            delay_ms: 0,
            exponential: true,
        };
        assert_eq!(retry.delay_for_attempt(5), Duration::from_millis(0));
    }

    #[test]
    fn meta_task_is_never_cacheable() {
        let task = Task::Meta(MetaTask {
            core: TaskCore {
                name: "all".into(),
                parallel_deps: vec![],
                serial_deps: vec![],
                condition: None,
                tags: BTreeSet::new(),
            },
        });
        assert!(!task.is_cacheable());
    }
}
