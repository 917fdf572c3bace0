// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Crate-wide error taxonomy.
//!
//! Every kind here maps to one row of the error taxonomy: how it is raised,
//! how it propagates, and what exit code it implies for a caller composing
//! them at the top level (the demo binary, or any future CLI collaborator).

use std::fmt;

mod suggest;

pub use suggest::nearest_match;

/// Malformed input, schema violation, unknown reference, cycle, or a
/// duplicate name surviving matrix expansion. Surfaced before scheduling
/// starts; callers should treat this as exit code 2.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown dependency: task '{task}' depends on undeclared task '{dependency}'\n  hint: {hint}")]
    UnknownDependency {
        task: String,
        dependency: String,
        hint: String,
    },

    #[error("duplicate task name after expansion: '{name}'\n  hint: matrix or template expansion produced a name collision, rename one of the sources")]
    DuplicateTaskName { name: String },

    #[error("missing template: task '{task}' references undeclared template '{template}'\n  hint: {hint}")]
    MissingTemplate {
        task: String,
        template: String,
        hint: String,
    },

    #[error("missing matrix key: task '{task}' references undeclared matrix key '{key}'\n  hint: declare `[matrix.{key}]` or an inline `matrix` table on the task")]
    MissingMatrixKey { task: String, key: String },

    #[error("cyclic dependency detected: {}\n  hint: break the cycle by removing one of these edges", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("{0}")]
    Expression(#[from] ExpressionError),

    #[error("invalid task: '{task}' has cache_enabled=true but no command\n  hint: meta tasks cannot be cached, only exec tasks with a command")]
    CacheOnMetaTask { task: String },

    #[error("unknown task: '{name}' is not declared and no alias resolves to it\n  hint: {hint}")]
    UnknownTask { name: String, hint: String },

    #[error("unknown workflow: '{name}' is not declared\n  hint: {hint}")]
    UnknownWorkflow { name: String, hint: String },

    #[error("malformed configuration document: {message}")]
    Malformed { message: String },
}

/// Unresolved identifier or a shell subcommand invoked from an expression
/// exiting non-zero. Always folds into [`ConfigError::Expression`] at
/// lowering time; kept as its own type so the expression evaluator does not
/// need to depend on the config module.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("parse error in expression '{source}' at byte {pos}: {message}")]
    Parse {
        source: String,
        pos: usize,
        message: String,
    },

    #[error("unresolved identifier '{identifier}' in expression '{source}'")]
    UnresolvedIdentifier { source: String, identifier: String },

    #[error("shell('{command}') exited with status {status}")]
    ShellFailed { command: String, status: i32 },

    #[error("type error evaluating '{source}': {message}")]
    TypeError { source: String, message: String },
}

/// A condition that kept the Process Supervisor from producing a terminal
/// status for a task at all. Non-zero exit and timeout are *not* here: both
/// are ordinary outcomes the supervisor reports as
/// [`crate::model::TaskStatus::Failed`] / `TimedOut` on its `Ok` path, and
/// whether they propagate is governed by the scheduler's fail-fast /
/// allow-failure policy, not by this type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskFailure {
    #[error("task '{task}' could not be spawned: {message}")]
    SpawnFailed { task: String, message: String },
}

/// External interrupt or a fail-fast trigger. Running tasks terminate; the
/// run's aggregate status becomes Failed regardless of individual
/// `allow_failure` settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CancellationError {
    #[error("run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("task '{task}' cancelled")]
    TaskCancelled { task: String },
}

/// Digest mismatch or an unreadable capture file. Treated as a cache miss;
/// the offending entry is removed and scheduling continues unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheCorruption {
    #[error("cache entry for fingerprint {fingerprint} is unreadable: {message}")]
    UnreadableEntry { fingerprint: String, message: String },

    #[error("cache entry for fingerprint {fingerprint} failed metadata validation: {message}")]
    InvalidMetadata { fingerprint: String, message: String },
}

/// An invariant the scheduler or graph is supposed to guarantee was
/// violated (e.g. a node reached `Ready` with an unresolved predecessor).
/// Treated as a panic-equivalent: exit code 1 with a diagnostic, since no
/// caller-correctable input produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InternalInvariant {
    #[error("internal invariant violated: {message}")]
    Violated { message: String },
}

/// The top-level error type returned by the orchestrator's public API,
/// unifying every error taxonomy kind so callers can match on
/// `kind()` to pick an exit code without downcasting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZrError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Task(#[from] TaskFailure),
    #[error(transparent)]
    Cancellation(#[from] CancellationError),
    #[error(transparent)]
    Cache(#[from] CacheCorruption),
    #[error(transparent)]
    Internal(#[from] InternalInvariant),
}

/// Process exit codes the orchestrator's entry points return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GenericFailure = 1,
    ConfigError = 2,
    Interrupted = 130,
}

impl ZrError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ZrError::Config(_) => ExitCode::ConfigError,
            ZrError::Cancellation(_) => ExitCode::Interrupted,
            ZrError::Internal(_) => ExitCode::GenericFailure,
            ZrError::Task(_) | ZrError::Cache(_) => ExitCode::GenericFailure,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}
