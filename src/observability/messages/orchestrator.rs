// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Orchestrator-level lifecycle messages: run completion, workflow stage
//! sequencing, and approval gates.

use std::fmt::{Display, Formatter};
use tracing::Span;

use super::StructuredLog;

pub struct RunCompleted<'a> {
    pub roots: &'a [String],
    pub aggregate_success: bool,
    pub task_count: usize,
}

impl Display for RunCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "run of [{}] completed: {} ({} tasks)",
            self.roots.join(", "),
            if self.aggregate_success { "success" } else { "failed" },
            self.task_count
        )
    }
}

impl StructuredLog for RunCompleted<'_> {
    fn log(&self) {
        tracing::info!(aggregate_success = self.aggregate_success, task_count = self.task_count, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("orchestrator.run", name, task_count = self.task_count)
    }
}

pub struct WorkflowStageStarted<'a> {
    pub workflow: &'a str,
    pub stage: &'a str,
    pub task_count: usize,
}

impl Display for WorkflowStageStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "workflow '{}' entering stage '{}' ({} tasks)", self.workflow, self.stage, self.task_count)
    }
}

impl StructuredLog for WorkflowStageStarted<'_> {
    fn log(&self) {
        tracing::info!(workflow = self.workflow, stage = self.stage, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("orchestrator.workflow_stage", name, workflow = self.workflow, stage = self.stage)
    }
}

pub struct WorkflowStageSkipped<'a> {
    pub workflow: &'a str,
    pub stage: &'a str,
}

impl Display for WorkflowStageSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "workflow '{}' skipped stage '{}': condition evaluated false", self.workflow, self.stage)
    }
}

impl StructuredLog for WorkflowStageSkipped<'_> {
    fn log(&self) {
        tracing::info!(workflow = self.workflow, stage = self.stage, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("orchestrator.workflow_stage_skipped", name, workflow = self.workflow, stage = self.stage)
    }
}

pub struct ApprovalAwaited<'a> {
    pub workflow: &'a str,
    pub stage: &'a str,
}

impl Display for ApprovalAwaited<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "workflow '{}' paused for approval before stage '{}'", self.workflow, self.stage)
    }
}

impl StructuredLog for ApprovalAwaited<'_> {
    fn log(&self) {
        tracing::info!(workflow = self.workflow, stage = self.stage, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("orchestrator.approval_awaited", name, workflow = self.workflow, stage = self.stage)
    }
}

pub struct ApprovalDenied<'a> {
    pub workflow: &'a str,
    pub stage: &'a str,
}

impl Display for ApprovalDenied<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "workflow '{}' aborted: approval denied before stage '{}'", self.workflow, self.stage)
    }
}

impl StructuredLog for ApprovalDenied<'_> {
    fn log(&self) {
        tracing::warn!(workflow = self.workflow, stage = self.stage, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("orchestrator.approval_denied", name, workflow = self.workflow, stage = self.stage)
    }
}
