// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Filesystem debounce batches and re-execution triggers.

use std::fmt::{Display, Formatter};
use tracing::Span;

use super::StructuredLog;

/// A debounce window closed with one or more changed paths coalesced into
/// it.
pub struct ChangeBatchCoalesced {
    pub path_count: usize,
    pub debounce_ms: u64,
}

impl Display for ChangeBatchCoalesced {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "coalesced {} changed path(s) after {}ms debounce",
            self.path_count, self.debounce_ms
        )
    }
}

impl StructuredLog for ChangeBatchCoalesced {
    fn log(&self) {
        tracing::debug!(path_count = self.path_count, debounce_ms = self.debounce_ms, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("watch.coalesce", name, path_count = self.path_count)
    }
}

/// A coalesced batch mapped to at least one seed task and a new run began.
pub struct WatchRunTriggered<'a> {
    pub affected_task_count: usize,
    pub trigger_paths: &'a [String],
}

impl Display for WatchRunTriggered<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "triggering run: {} task(s) affected by {:?}",
            self.affected_task_count, self.trigger_paths
        )
    }
}

impl StructuredLog for WatchRunTriggered<'_> {
    fn log(&self) {
        tracing::info!(affected_task_count = self.affected_task_count, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("watch.trigger", name, affected_task_count = self.affected_task_count)
    }
}

/// A batch arrived while the previous run was still in flight; it is held
/// rather than dropped, and will be merged with whatever arrives next —
/// a new run starts only after the previous run's graph is fully terminal.
pub struct WatchRunSuppressed {
    pub held_path_count: usize,
}

impl Display for WatchRunSuppressed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "previous run still in flight, holding {} changed path(s)", self.held_path_count)
    }
}

impl StructuredLog for WatchRunSuppressed {
    fn log(&self) {
        tracing::debug!(held_path_count = self.held_path_count, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("watch.suppress", name, held_path_count = self.held_path_count)
    }
}

/// A changed path matched no workspace member and was dropped.
pub struct WatchPathUnmapped<'a> {
    pub path: &'a str,
}

impl Display for WatchPathUnmapped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "changed path '{}' matched no workspace member, ignoring", self.path)
    }
}

impl StructuredLog for WatchPathUnmapped<'_> {
    fn log(&self) {
        tracing::debug!(path = self.path, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("watch.unmapped", name, path = self.path)
    }
}
