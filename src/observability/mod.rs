// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout the crate. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Enable future internationalization without code changes
//! * Maintain Single Responsibility Principle (SRP)
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::scheduler` - run/task lifecycle and state transitions
//! * `messages::supervisor` - process spawn, exit, kill, and retry events
//! * `messages::cache` - cache hit/miss/corruption events
//! * `messages::watch` - filesystem debounce batches and re-execution triggers
//!
//! # Usage
//!
//! ```rust
//! use zr_core::observability::messages::{StructuredLog, scheduler::TaskTerminal};
//!
//! let msg = TaskTerminal { task: "build", status: "Success" };
//! tracing::info!("{}", msg);
//! ```

pub mod messages;
