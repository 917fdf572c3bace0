// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Scheduler lifecycle and task state transition messages.

use std::fmt::{Display, Formatter};
use tracing::Span;

use super::StructuredLog;

/// A run began dispatching its run set.
pub struct RunStarted {
    pub task_count: usize,
    pub max_concurrency: usize,
}

impl Display for RunStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "starting run: {} tasks, max_concurrency={}",
            self.task_count, self.max_concurrency
        )
    }
}

impl StructuredLog for RunStarted {
    fn log(&self) {
        tracing::info!(task_count = self.task_count, max_concurrency = self.max_concurrency, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("scheduler.run", name, task_count = self.task_count)
    }
}

/// A task transitioned from `Pending` to `Ready`.
pub struct TaskReady<'a> {
    pub task: &'a str,
}

impl Display for TaskReady<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "task '{}' is ready", self.task)
    }
}

impl StructuredLog for TaskReady<'_> {
    fn log(&self) {
        tracing::debug!(task = self.task, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("scheduler.task_ready", name, task = self.task)
    }
}

/// A task reached a terminal state.
pub struct TaskTerminal<'a> {
    pub task: &'a str,
    pub status: &'a str,
}

impl Display for TaskTerminal<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "task '{}' terminal: {}", self.task, self.status)
    }
}

impl StructuredLog for TaskTerminal<'_> {
    fn log(&self) {
        tracing::info!(task = self.task, status = self.status, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("scheduler.task_terminal", name, task = self.task, status = self.status)
    }
}

/// Fail-fast triggered the shared cancellation token.
pub struct FailFastTriggered<'a> {
    pub failed_task: &'a str,
}

impl Display for FailFastTriggered<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "fail-fast triggered by task '{}'", self.failed_task)
    }
}

impl StructuredLog for FailFastTriggered<'_> {
    fn log(&self) {
        tracing::warn!(failed_task = self.failed_task, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("scheduler.fail_fast", name, failed_task = self.failed_task)
    }
}
