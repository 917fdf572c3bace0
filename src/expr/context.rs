// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::ExpressionError;

/// Read-only accessors the evaluator resolves identifiers and calls
/// against. One implementation backs real runs (reading
/// `std::env`, the filesystem, and spawning a subshell); tests substitute a
/// fake. `Send + Sync` so a single instance can be shared (via `Arc`)
/// across the tasks the scheduler spawns for a run.
pub trait Context: Send + Sync {
    fn platform_os(&self) -> &str;
    fn arch_name(&self) -> &str;
    fn env(&self, name: &str) -> Option<String>;
    fn matrix(&self, key: &str) -> Option<String>;
    fn file_exists(&self, path: &str) -> bool;
    fn file_hash(&self, path: &str) -> Result<String, ExpressionError>;
    fn file_newer(&self, a: &str, b: &str) -> bool;
    fn shell(&self, cmd: &str) -> Result<String, ExpressionError>;
    fn semver_satisfies(&self, version: &str, constraint: &str) -> bool;
    fn task_status(&self, name: &str) -> Option<String>;
    fn task_output(&self, name: &str) -> Option<String>;
}
