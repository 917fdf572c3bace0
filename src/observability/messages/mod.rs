// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging and distributed tracing.
//!
//! Every message type implements `Display` (human-readable output) and
//! `StructuredLog` (machine-readable fields + span creation), eliminating
//! magic strings scattered through the component modules.
//!
//! # Organization
//!
//! * `scheduler` - run/task lifecycle and state transitions
//! * `supervisor` - process spawn, exit, kill, and retry events
//! * `cache` - cache hit/miss/corruption events
//! * `watch` - filesystem debounce batches and re-execution triggers
//! * `orchestrator` - run completion and workflow stage/approval sequencing

pub mod cache;
pub mod orchestrator;
pub mod scheduler;
pub mod supervisor;
pub mod watch;

use tracing::Span;

/// Messages that support structured logging and distributed tracing.
///
/// ```rust
/// use zr_core::observability::messages::{StructuredLog, scheduler::RunStarted};
///
/// let msg = RunStarted { task_count: 5, max_concurrency: 4 };
/// msg.log();
/// let span = msg.span("run");
/// let _guard = span.enter();
/// ```
pub trait StructuredLog {
    /// Emits a log event carrying both the `Display` message and
    /// machine-readable fields, at the level appropriate to the message.
    fn log(&self);

    /// Creates a `tracing::Span` named `name` with this message's fields as
    /// attributes.
    fn span(&self, name: &str) -> Span;
}
