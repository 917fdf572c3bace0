// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Watch Coordinator.
//!
//! Subscribes to a filesystem change stream through a narrow collaborator
//! contract (`next() -> Event`, cancellable), debounces
//! the events it sees into batches, maps the batch to affected workspace
//! members by longest-prefix match, and hands the seed set to whatever
//! triggers a run (the Orchestrator, via [`RunTrigger`]). The coordinator
//! never depends on the Orchestrator directly, only on this trait, so the
//! dependency points inward the way [`crate::hooks::RunHook`] does for the
//! Scheduler.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::WorkspaceDef;
use crate::observability::messages::{watch as msg, StructuredLog};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// The filesystem watcher collaborator contract: a blocking
/// `next() -> Event` that yields `(path, kind)` and is cancellable. The
/// coordinator neither chooses nor assumes a backend (native vs polling);
/// [`NotifyEventSource`] is one implementation.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Option<Event>;
}

/// Invoked with the union of affected workspace members once a debounce
/// window closes on at least one mapped path. Implemented by the
/// Orchestrator, which expands the seeds to the full transitive dependent
/// set before scheduling.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    async fn trigger(&self, seeds: &[String]);
}

/// A declared `[workspace]` member resolved to an absolute root for
/// prefix-matching changed paths against.
#[derive(Debug, Clone)]
pub struct WorkspaceMember {
    pub name: String,
    pub root: PathBuf,
}

/// Resolves `workspace.members` against `root`, the same literal
/// `root.join(member)` join [`crate::config::lower`] uses for config
/// inheritance — members are directory names, not glob patterns, in this
/// implementation.
pub fn members_from_workspace(workspace: &WorkspaceDef, root: &Path) -> Vec<WorkspaceMember> {
    workspace
        .members
        .iter()
        .map(|member| WorkspaceMember {
            name: member.clone(),
            root: root.join(member),
        })
        .collect()
}

pub struct WatchCoordinator<S: EventSource> {
    source: S,
    members: Vec<WorkspaceMember>,
    debounce: Duration,
}

impl<S: EventSource> WatchCoordinator<S> {
    pub fn new(source: S, members: Vec<WorkspaceMember>) -> Self {
        WatchCoordinator {
            source,
            members,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Longest-prefix match among declared members; `None` means the path
    /// matched no member and is ignored.
    fn map_to_member(&self, path: &Path) -> Option<&str> {
        self.members
            .iter()
            .filter(|m| path.starts_with(&m.root))
            .max_by_key(|m| m.root.as_os_str().len())
            .map(|m| m.name.as_str())
    }

    fn map_batch(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut seeds = BTreeSet::new();
        for path in paths {
            match self.map_to_member(path) {
                Some(name) => {
                    seeds.insert(name.to_string());
                }
                None => {
                    let rendered = path.display().to_string();
                    msg::WatchPathUnmapped { path: &rendered }.log();
                }
            }
        }
        seeds.into_iter().collect()
    }

    /// Runs until `cancel` fires; otherwise never returns.
    pub async fn run(mut self, trigger: Arc<dyn RunTrigger>, cancel: CancellationToken) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

        let mut batch: Vec<PathBuf> = Vec::new();
        let mut window_deadline: Option<Instant> = None;
        let mut run_in_progress = false;
        let mut held_seeds: BTreeSet<String> = BTreeSet::new();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return,

                _ = sleep_until(window_deadline.unwrap_or_else(Instant::now)), if window_deadline.is_some() => {
                    window_deadline = None;
                    let paths = std::mem::take(&mut batch);
                    let debounce_ms = self.debounce.as_millis() as u64;
                    msg::ChangeBatchCoalesced { path_count: paths.len(), debounce_ms }.log();
                    let seeds = self.map_batch(&paths);
                    if seeds.is_empty() {
                        continue;
                    }
                    if run_in_progress {
                        held_seeds.extend(seeds);
                        msg::WatchRunSuppressed { held_path_count: held_seeds.len() }.log();
                    } else {
                        msg::WatchRunTriggered { affected_task_count: seeds.len(), trigger_paths: &seeds }.log();
                        spawn_run(trigger.clone(), seeds, done_tx.clone());
                        run_in_progress = true;
                    }
                }

                Some(()) = done_rx.recv(), if run_in_progress => {
                    run_in_progress = false;
                    if !held_seeds.is_empty() {
                        let seeds: Vec<String> = std::mem::take(&mut held_seeds).into_iter().collect();
                        msg::WatchRunTriggered { affected_task_count: seeds.len(), trigger_paths: &seeds }.log();
                        spawn_run(trigger.clone(), seeds, done_tx.clone());
                        run_in_progress = true;
                    }
                }

                event = self.source.next() => {
                    match event {
                        None => {
                            if run_in_progress {
                                let _ = done_rx.recv().await;
                            }
                            return;
                        }
                        Some(ev) => {
                            if window_deadline.is_none() {
                                window_deadline = Some(Instant::now() + self.debounce);
                            }
                            batch.push(ev.path);
                        }
                    }
                }
            }
        }
    }
}

fn spawn_run(trigger: Arc<dyn RunTrigger>, seeds: Vec<String>, done_tx: mpsc::UnboundedSender<()>) {
    tokio::spawn(async move {
        trigger.trigger(&seeds).await;
        let _ = done_tx.send(());
    });
}

/// `notify`-crate-backed [`EventSource`]. The only module in the crate that
/// touches `notify` directly — the coordinator above depends solely on the
/// trait.
pub struct NotifyEventSource {
    _watcher: notify::RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl NotifyEventSource {
    pub fn new(paths: &[PathBuf]) -> notify::Result<Self> {
        use notify::Watcher;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if let Some(translated) = translate(event) {
                    let _ = tx.send(translated);
                }
            }
        })?;
        for path in paths {
            watcher.watch(path, notify::RecursiveMode::Recursive)?;
        }
        Ok(NotifyEventSource { _watcher: watcher, rx })
    }
}

#[async_trait]
impl EventSource for NotifyEventSource {
    async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

fn translate(event: notify::Event) -> Option<Event> {
    let kind = match event.kind {
        notify::EventKind::Create(_) => ChangeKind::Created,
        notify::EventKind::Modify(_) => ChangeKind::Modified,
        notify::EventKind::Remove(_) => ChangeKind::Deleted,
        _ => return None,
    };
    let path = event.paths.into_iter().next()?;
    Some(Event { path, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Yields each scripted event after its paired delay, then blocks
    /// forever (mirroring a real watcher that has nothing left to report).
    struct ScriptedSource {
        events: VecDeque<(Duration, Event)>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next(&mut self) -> Option<Event> {
            match self.events.pop_front() {
                Some((delay, ev)) => {
                    tokio::time::sleep(delay).await;
                    Some(ev)
                }
                None => std::future::pending().await,
            }
        }
    }

    struct RecordingTrigger {
        calls: Mutex<Vec<Vec<String>>>,
        run_duration: Duration,
    }

    #[async_trait]
    impl RunTrigger for RecordingTrigger {
        async fn trigger(&self, seeds: &[String]) {
            self.calls.lock().unwrap().push(seeds.to_vec());
            tokio::time::sleep(self.run_duration).await;
        }
    }

    fn member(name: &str) -> WorkspaceMember {
        WorkspaceMember {
            name: name.to_string(),
            root: PathBuf::from(format!("/repo/{name}")),
        }
    }

    #[tokio::test]
    async fn events_within_the_debounce_window_are_coalesced_into_one_run() {
        let source = ScriptedSource {
            events: VecDeque::from([
                (Duration::ZERO, Event { path: PathBuf::from("/repo/svc-a/src/main.rs"), kind: ChangeKind::Modified }),
                (Duration::from_millis(5), Event { path: PathBuf::from("/repo/svc-a/src/lib.rs"), kind: ChangeKind::Modified }),
            ]),
        };
        let coordinator = WatchCoordinator::new(source, vec![member("svc-a"), member("svc-b")])
            .with_debounce(Duration::from_millis(30));
        let trigger = Arc::new(RecordingTrigger {
            calls: Mutex::new(Vec::new()),
            run_duration: Duration::from_millis(1),
        });
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(coordinator.run(trigger.clone(), cancel_clone));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let _ = handle.await;

        let calls = trigger.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn a_path_outside_every_member_is_ignored() {
        let source = ScriptedSource {
            events: VecDeque::from([(
                Duration::ZERO,
                Event { path: PathBuf::from("/etc/hosts"), kind: ChangeKind::Modified },
            )]),
        };
        let coordinator =
            WatchCoordinator::new(source, vec![member("svc-a")]).with_debounce(Duration::from_millis(20));
        let trigger = Arc::new(RecordingTrigger {
            calls: Mutex::new(Vec::new()),
            run_duration: Duration::from_millis(1),
        });
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(coordinator.run(trigger.clone(), cancel_clone));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        let _ = handle.await;

        assert!(trigger.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn longest_prefix_match_prefers_the_more_specific_member() {
        let source = ScriptedSource {
            events: VecDeque::from([(
                Duration::ZERO,
                Event { path: PathBuf::from("/repo/svc-a/nested/file.rs"), kind: ChangeKind::Created },
            )]),
        };
        let members = vec![
            WorkspaceMember { name: "repo".into(), root: PathBuf::from("/repo") },
            member("svc-a"),
        ];
        let coordinator = WatchCoordinator::new(source, members).with_debounce(Duration::from_millis(20));
        let trigger = Arc::new(RecordingTrigger {
            calls: Mutex::new(Vec::new()),
            run_duration: Duration::from_millis(1),
        });
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(coordinator.run(trigger.clone(), cancel_clone));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        let _ = handle.await;

        assert_eq!(trigger.calls.lock().unwrap()[0], vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn an_event_arriving_during_a_run_is_held_for_the_next_one() {
        // Second event lands at t=80ms, after the first window (closes at
        // t=20ms) has already started a run that won't finish until t=170ms.
        let source = ScriptedSource {
            events: VecDeque::from([
                (Duration::ZERO, Event { path: PathBuf::from("/repo/svc-a/one.rs"), kind: ChangeKind::Modified }),
                (Duration::from_millis(80), Event { path: PathBuf::from("/repo/svc-a/two.rs"), kind: ChangeKind::Modified }),
            ]),
        };
        let coordinator =
            WatchCoordinator::new(source, vec![member("svc-a"), member("svc-b")]).with_debounce(Duration::from_millis(20));
        let trigger = Arc::new(RecordingTrigger {
            calls: Mutex::new(Vec::new()),
            run_duration: Duration::from_millis(150),
        });
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(coordinator.run(trigger.clone(), cancel_clone));
        // Long enough for the first run (ends ~170ms) and the held batch's
        // follow-up run (starts ~170ms, runs 150ms more) to both complete.
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        let _ = handle.await;

        let calls = trigger.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["svc-a".to_string()]);
        assert_eq!(calls[1], vec!["svc-a".to_string()]);
    }
}
