// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process spawn, exit, kill, and retry messages.

use std::fmt::{Display, Formatter};
use tracing::Span;

use super::StructuredLog;

pub struct ProcessSpawned<'a> {
    pub task: &'a str,
    pub command: &'a str,
}

impl Display for ProcessSpawned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "spawned '{}': {}", self.task, self.command)
    }
}

impl StructuredLog for ProcessSpawned<'_> {
    fn log(&self) {
        tracing::debug!(task = self.task, command = self.command, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("supervisor.spawn", name, task = self.task)
    }
}

pub struct ProcessExited<'a> {
    pub task: &'a str,
    pub exit_code: Option<i32>,
}

impl Display for ProcessExited<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "'{}' exited with code {code}", self.task),
            None => write!(f, "'{}' exited without a code (signalled)", self.task),
        }
    }
}

impl StructuredLog for ProcessExited<'_> {
    fn log(&self) {
        tracing::info!(task = self.task, exit_code = self.exit_code, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("supervisor.exit", name, task = self.task)
    }
}

pub struct ProcessKilled<'a> {
    pub task: &'a str,
    pub reason: &'a str,
}

impl Display for ProcessKilled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "killed '{}': {}", self.task, self.reason)
    }
}

impl StructuredLog for ProcessKilled<'_> {
    fn log(&self) {
        tracing::warn!(task = self.task, reason = self.reason, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("supervisor.kill", name, task = self.task, reason = self.reason)
    }
}

pub struct RetryScheduled<'a> {
    pub task: &'a str,
    pub attempt: u32,
    pub delay_ms: u64,
}

impl Display for RetryScheduled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "retrying '{}' (attempt {}) after {}ms", self.task, self.attempt, self.delay_ms)
    }
}

impl StructuredLog for RetryScheduled<'_> {
    fn log(&self) {
        tracing::info!(task = self.task, attempt = self.attempt, delay_ms = self.delay_ms, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("supervisor.retry", name, task = self.task, attempt = self.attempt)
    }
}
