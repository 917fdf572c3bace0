// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The plugin hook-point interface: before/after-task and resource-limit
//! hooks, threaded through the scheduler as a vector of implementations,
//! with the core usable unchanged when that vector is empty. Plugin
//! *loading* is out of scope; only the interface and its threading through
//! the scheduler live here.

use crate::model::{RunRecord, Task};

/// Observes task lifecycle events and resource-limit decisions. Every
/// method has a default no-op body so implementers only override what they
/// need.
pub trait RunHook: Send + Sync {
    fn before_task(&self, _task: &Task) {}
    fn after_task(&self, _record: &RunRecord) {}
    fn on_resource_limit(&self, _task_name: &str, _limit: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl RunHook for CountingHook {
        fn before_task(&self, _task: &Task) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }
        fn after_task(&self, _record: &RunRecord) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_hook_methods_are_no_ops() {
        struct Empty;
        impl RunHook for Empty {}
        let hook = Empty;
        hook.before_task(&crate::model::Task::Meta(crate::model::MetaTask {
            core: crate::model::TaskCore {
                name: "x".into(),
                parallel_deps: vec![],
                serial_deps: vec![],
                condition: None,
                tags: Default::default(),
            },
        }));
    }

    #[test]
    fn custom_hook_counts_invocations() {
        let hook = CountingHook {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        };
        let task = crate::model::Task::Meta(crate::model::MetaTask {
            core: crate::model::TaskCore {
                name: "x".into(),
                parallel_deps: vec![],
                serial_deps: vec![],
                condition: None,
                tags: Default::default(),
            },
        });
        hook.before_task(&task);
        hook.before_task(&task);
        assert_eq!(hook.before.load(Ordering::SeqCst), 2);
    }
}
