// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Orchestrator's public request/response types:
//! `RunRequest` in, `RunReport`/`Plan` out. Both outputs derive `Serialize`
//! so tooling can consume run results as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::TaskStatus;

/// Names a set of task roots plus the flags a run can be configured with.
/// `dry_run` is read by the out-of-scope CLI collaborator to
/// decide whether to call [`super::Orchestrator::run`] or
/// [`super::Orchestrator::plan`]; `run` itself always executes.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub roots: Vec<String>,
    pub profile: Option<String>,
    pub jobs: Option<usize>,
    pub dry_run: bool,
    pub fail_fast: Option<bool>,
}

impl RunRequest {
    pub fn new(roots: impl IntoIterator<Item = impl Into<String>>) -> Self {
        RunRequest {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Per-task outcome within a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub duration_ms: u128,
    pub exit_code: Option<i32>,
    pub cache_hit: bool,
    pub retry_attempts: u32,
}

/// The machine-readable record of one run. `exit_code` is 0
/// iff `aggregate_success`, matching the process exit code conventions.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    pub aggregate_success: bool,
    pub cancelled: bool,
    pub exit_code: i32,
}

impl RunReport {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// One node in a [`Plan`]: the resolved command/env/cwd/fingerprint a real
/// run would use, computed without dispatching the Supervisor, for dry-run
/// use.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTask {
    pub name: String,
    pub command: Option<String>,
    pub resolved_env: BTreeMap<String, String>,
    pub resolved_cwd: Option<PathBuf>,
    pub fingerprint: Option<String>,
    pub would_skip: bool,
}

/// Topologically layered nodes restricted to the resolved run set.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub layers: Vec<Vec<PlannedTask>>,
}
