// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cache hit/miss/corruption messages.

use std::fmt::{Display, Formatter};
use tracing::Span;

use super::StructuredLog;

pub struct CacheHit<'a> {
    pub task: &'a str,
    pub fingerprint: &'a str,
}

impl Display for CacheHit<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "cache hit for '{}' (fp {})", self.task, self.fingerprint)
    }
}

impl StructuredLog for CacheHit<'_> {
    fn log(&self) {
        tracing::info!(task = self.task, fingerprint = self.fingerprint, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("cache.hit", name, task = self.task)
    }
}

pub struct CacheEvicted<'a> {
    pub fingerprint: &'a str,
    pub reason: &'a str,
}

impl Display for CacheEvicted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "evicted cache entry {}: {}", self.fingerprint, self.reason)
    }
}

impl StructuredLog for CacheEvicted<'_> {
    fn log(&self) {
        tracing::warn!(fingerprint = self.fingerprint, reason = self.reason, "{}", self);
    }
    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("cache.evict", name, fingerprint = self.fingerprint)
    }
}
