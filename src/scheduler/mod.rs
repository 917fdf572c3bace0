// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Scheduler.
//!
//! A dependency-counting dispatch loop that pops zero-indegree nodes off a
//! ready queue, dispatches them to worker tasks, and decrements dependents'
//! counts as each completes. A node executes at most once per run, so there
//! is no fan-in merge to perform. The control loop owns the ready queue and
//! node-state table directly and never shares them behind a lock; every
//! dispatched node runs as an independent `tokio::spawn`ed task that reports
//! back over an `mpsc` channel — workers communicate with the control loop
//! by message passing, never by touching shared state directly.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStore, SingleFlightToken};
use crate::config::LoweredConfig;
use crate::errors::ExpressionError;
use crate::expr::{self, Context};
use crate::fingerprint::{fingerprint_of, Fingerprint};
use crate::hooks::RunHook;
use crate::model::{RunRecord, Task, TaskStatus};
use crate::observability::messages::{scheduler as msg, StructuredLog};
use crate::supervisor::{self, CapturingSink, OutputSink};

/// Tunables for one scheduling run.
pub struct ScheduleOptions {
    /// Maximum global parallelism `P`. Defaults to the CPU count.
    pub max_concurrency: usize,
    /// Concurrency caps keyed by tag (`[resources]`). A tag
    /// absent from this map has no cap.
    pub per_tag_concurrency: HashMap<String, u32>,
    pub fail_fast: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            max_concurrency: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            per_tag_concurrency: HashMap::new(),
            fail_fast: true,
        }
    }
}

/// The result of running a run set to completion.
pub struct RunOutcome {
    pub records: Vec<RunRecord>,
    pub aggregate_success: bool,
    pub cancelled: bool,
}

/// Builds an `OutputSink` for a task's live output (stdout/stderr as they
/// arrive) and for replaying a cache hit's captured bytes. The Orchestrator
/// supplies the real implementation; tests use a no-op.
pub trait SinkFactory: Send + Sync {
    fn sink_for(&self, task: &str) -> Box<dyn OutputSink>;
}

/// Runs every task reachable from `run_set` to a terminal state.
///
/// `run_set` is assumed to already be closed over whatever dependency floor
/// the caller wants included — the Orchestrator computes this with
/// `Graph::reverse_transitive_closure` before calling in.
pub async fn run(
    lowered: &LoweredConfig,
    run_set: &HashSet<String>,
    ctx: Arc<dyn Context>,
    cache: Arc<CacheStore>,
    hooks: &[Arc<dyn RunHook>],
    sinks: &dyn SinkFactory,
    opts: ScheduleOptions,
    cancel: CancellationToken,
) -> RunOutcome {
    let mut remaining_preds: HashMap<String, usize> = run_set.iter().map(|n| (n.clone(), 0)).collect();
    for dependency in run_set {
        for dependent in lowered.graph.dependents_of(dependency) {
            if let Some(count) = remaining_preds.get_mut(dependent) {
                *count += 1;
            }
        }
    }

    let mut ready: VecDeque<String> = remaining_preds
        .iter()
        .filter(|(_, &c)| c == 0)
        .map(|(n, _)| n.clone())
        .collect();
    {
        let mut sorted: Vec<String> = ready.into_iter().collect();
        sorted.sort();
        ready = sorted.into();
    }

    msg::RunStarted {
        task_count: run_set.len(),
        max_concurrency: opts.max_concurrency,
    }
    .log();

    let mut terminal: HashMap<String, TaskStatus> = HashMap::new();
    let mut fingerprints: HashMap<String, Fingerprint> = HashMap::new();
    let mut records: Vec<RunRecord> = Vec::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut running_tags: HashMap<String, u32> = HashMap::new();
    let mut aggregate_success = true;

    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerDone>();

    loop {
        // Dispatch pass: admit as many ready nodes as capacity allows.
        let mut requeued_this_pass: HashSet<String> = HashSet::new();
        while let Some(name) = ready.pop_front() {
            if in_flight.len() >= opts.max_concurrency {
                ready.push_front(name);
                break;
            }
            if requeued_this_pass.contains(&name) {
                // Every remaining ready node has been tried once this pass
                // and none could be admitted — a tag cap is saturated.
                // Park on the channel instead of spinning.
                ready.push_front(name);
                break;
            }

            let task = &lowered.tasks[&name];
            let tags = &task.core().tags;
            let saturated = tags.iter().any(|tag| {
                opts.per_tag_concurrency
                    .get(tag)
                    .map(|&cap| *running_tags.get(tag).unwrap_or(&0) >= cap)
                    .unwrap_or(false)
            });
            if saturated {
                requeued_this_pass.insert(name.clone());
                ready.push_back(name);
                continue;
            }

            for tag in tags {
                *running_tags.entry(tag.clone()).or_insert(0) += 1;
            }
            in_flight.insert(name.clone());

            let dep_fps: Vec<Fingerprint> = task
                .core()
                .parallel_deps
                .iter()
                .chain(task.core().serial_deps.iter())
                .filter_map(|d| fingerprints.get(d).copied())
                .collect();

            msg::TaskReady { task: &name }.log();

            tokio::spawn(dispatch_node(
                name.clone(),
                task.clone(),
                dep_fps,
                ctx.clone(),
                cache.clone(),
                hooks.to_vec(),
                sinks.sink_for(&name),
                cancel.clone(),
                tx.clone(),
            ));
        }

        if in_flight.is_empty() && ready.is_empty() {
            break;
        }

        let Some(done) = rx.recv().await else {
            break;
        };

        let WorkerDone { name, fingerprint, record, failed_without_allow } = done;
        in_flight.remove(&name);
        for tag in &lowered.tasks[&name].core().tags {
            if let Some(count) = running_tags.get_mut(tag) {
                *count = count.saturating_sub(1);
            }
        }
        if let Some(fp) = fingerprint {
            fingerprints.insert(name.clone(), fp);
        }

        msg::TaskTerminal {
            task: &name,
            status: status_label(&record.status),
        }
        .log();

        if !record.status.is_success_terminal() && record.status != TaskStatus::SkippedUpstreamFailure {
            aggregate_success = false;
        }
        terminal.insert(name.clone(), record.status);
        records.push(record);

        if failed_without_allow {
            if opts.fail_fast {
                msg::FailFastTriggered { failed_task: &name }.log();
                cancel.cancel();
            } else {
                propagate_upstream_failure(&name, lowered, run_set, &mut terminal, &mut records, &mut aggregate_success);
                ready.retain(|n| !terminal.contains_key(n));
            }
        }

        for dependent in lowered.graph.dependents_of(&name) {
            if !run_set.contains(dependent) || terminal.contains_key(dependent) {
                continue;
            }
            if let Some(count) = remaining_preds.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 && !ready.contains(dependent) {
                    ready.push_back(dependent.clone());
                }
            }
        }
    }

    RunOutcome {
        records,
        aggregate_success,
        cancelled: cancel.is_cancelled(),
    }
}

pub(crate) fn status_label(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Success => "Success",
        TaskStatus::Failed => "Failed",
        TaskStatus::Skipped => "Skipped",
        TaskStatus::SkippedUpstreamFailure => "SkippedUpstreamFailure",
        TaskStatus::CacheHit => "CacheHit",
        TaskStatus::Cancelled => "Cancelled",
        TaskStatus::TimedOut => "TimedOut",
    }
}

/// Marks every transitive dependent of `failed` (restricted to `run_set`
/// and not already terminal) as `SkippedUpstreamFailure`. A task's own
/// `allow_failure` decides whether its skip counts
/// against the aggregate result.
fn propagate_upstream_failure(
    failed: &str,
    lowered: &LoweredConfig,
    run_set: &HashSet<String>,
    terminal: &mut HashMap<String, TaskStatus>,
    records: &mut Vec<RunRecord>,
    aggregate_success: &mut bool,
) {
    let closure = lowered.graph.transitive_closure(vec![failed.to_string()]);
    let mut order: Vec<String> = closure.into_iter().filter(|n| n != failed && run_set.contains(n)).collect();
    order.sort();

    for name in order {
        if terminal.contains_key(&name) {
            continue;
        }
        let allow_failure = lowered.tasks[&name].as_exec().map(|e| e.allow_failure).unwrap_or(false);
        if !allow_failure {
            *aggregate_success = false;
        }
        terminal.insert(name.clone(), TaskStatus::SkippedUpstreamFailure);
        records.push(RunRecord {
            task_name: name,
            start_wallclock_ms: now_unix_ms(),
            duration_ms: 0,
            exit_code: None,
            status: TaskStatus::SkippedUpstreamFailure,
            fingerprint: None,
            captured_output_ref: None,
            retry_attempts: 0,
        });
    }
}

struct WorkerDone {
    name: String,
    fingerprint: Option<Fingerprint>,
    record: RunRecord,
    failed_without_allow: bool,
}

/// The full lifecycle of one node: condition, fingerprint, cache lookup,
/// single-flight, supervisor dispatch, cache insert. Runs entirely on its
/// own spawned task; the only way it talks back
/// to the control loop is `tx`.
#[allow(clippy::too_many_arguments)]
async fn dispatch_node(
    name: String,
    task: Task,
    dep_fps: Vec<Fingerprint>,
    ctx: Arc<dyn Context>,
    cache: Arc<CacheStore>,
    hooks: Vec<Arc<dyn RunHook>>,
    sink: Box<dyn OutputSink>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<WorkerDone>,
) {
    let started = Instant::now();
    let start_wallclock_ms = now_unix_ms();

    for hook in &hooks {
        hook.before_task(&task);
    }

    let result = run_node(&name, &task, &dep_fps, &ctx, &cache, &cancel, sink.as_ref()).await;

    let (status, exit_code, fingerprint, captured_output_ref, retry_attempts) = result;
    let record = RunRecord {
        task_name: name.clone(),
        start_wallclock_ms,
        duration_ms: started.elapsed().as_millis(),
        exit_code,
        status,
        fingerprint,
        captured_output_ref,
        retry_attempts,
    };

    for hook in &hooks {
        hook.after_task(&record);
    }

    let failed_without_allow =
        status == TaskStatus::Failed && !task.as_exec().map(|e| e.allow_failure).unwrap_or(false);

    let _ = tx.send(WorkerDone {
        name,
        fingerprint,
        record,
        failed_without_allow,
    });
}

type NodeResult = (TaskStatus, Option<i32>, Option<Fingerprint>, Option<String>, u32);

async fn run_node(
    name: &str,
    task: &Task,
    dep_fps: &[Fingerprint],
    ctx: &Arc<dyn Context>,
    cache: &Arc<CacheStore>,
    cancel: &CancellationToken,
    sink: &dyn OutputSink,
) -> NodeResult {
    if let Some(condition) = &task.core().condition {
        match expr::eval_condition(condition, ctx.as_ref()) {
            Ok(true) => {}
            Ok(false) => return (TaskStatus::Skipped, None, None, None, 0),
            Err(_) => return (TaskStatus::Failed, None, None, None, 0),
        }
    }

    let Task::Exec(exec) = task else {
        // Meta tasks carry no command; their fingerprint still folds into
        // dependents' fingerprints so cache invalidation propagates through
        // aggregate nodes (dep fingerprints are computed
        // bottom-up), but meta tasks themselves are never cached or
        // dispatched to the Supervisor.
        let fp = fingerprint_of(vec![
            ("name", name.as_bytes()),
            ("kind", b"meta".as_slice()),
            ("deps", dep_fingerprint_bytes(dep_fps).as_slice()),
        ]);
        return (TaskStatus::Success, None, Some(fp), None, 0);
    };

    let resolved_env = match resolve_env(exec, ctx.as_ref()) {
        Ok(env) => env,
        Err(_) => return (TaskStatus::Failed, None, None, None, 0),
    };
    let resolved_cwd = match resolve_cwd(exec, ctx.as_ref()) {
        Ok(cwd) => cwd,
        Err(_) => return (TaskStatus::Failed, None, None, None, 0),
    };

    let fingerprint = compute_fingerprint(name, &exec.command, &resolved_env, resolved_cwd.as_deref(), dep_fps);

    if exec.cache_enabled {
        if let Some(entry) = cache.lookup(fingerprint).await {
            if let Ok(bytes) = tokio::fs::read(&entry.captured_output_path).await {
                sink.on_stdout(&bytes);
            }
            crate::observability::messages::cache::CacheHit {
                task: name,
                fingerprint: &fingerprint.to_hex(),
            }
            .log();
            return (
                TaskStatus::CacheHit,
                Some(entry.exit_code),
                Some(fingerprint),
                Some(entry.captured_output_path.display().to_string()),
                0,
            );
        }

        if let SingleFlightToken::Follower(notify) = cache.begin_single_flight(fingerprint).await {
            notify.notified().await;
            if let Some(entry) = cache.lookup(fingerprint).await {
                return (
                    TaskStatus::CacheHit,
                    Some(entry.exit_code),
                    Some(fingerprint),
                    Some(entry.captured_output_path.display().to_string()),
                    0,
                );
            }
            // The producer's build failed (nothing to inherit). Re-register
            // so this node becomes the producer for any later followers
            // rather than leaving the fingerprint permanently un-registered.
            cache.begin_single_flight(fingerprint).await;
        }
    }

    let mut resolved = exec.clone();
    resolved.env = resolved_env;
    resolved.cwd = resolved_cwd.map(Into::into);

    let capture = CapturingSink::default();
    let tee = TeeSink { primary: &capture, secondary: sink };
    let outcome = supervisor::run(&resolved, cancel, &tee).await;

    if exec.cache_enabled {
        cache.finish_single_flight(fingerprint).await;
    }

    match outcome {
        Ok(outcome) => {
            if outcome.status == TaskStatus::Success && exec.cache_enabled {
                let combined = capture.combined.lock().unwrap().clone();
                let _ = cache.insert(fingerprint, outcome.exit_code.unwrap_or(0), &combined).await;
            }
            (outcome.status, outcome.exit_code, Some(fingerprint), None, outcome.attempts.saturating_sub(1))
        }
        Err(_) => (TaskStatus::Failed, None, Some(fingerprint), None, 0),
    }
}

fn dep_fingerprint_bytes(dep_fps: &[Fingerprint]) -> Vec<u8> {
    dep_fps.iter().flat_map(|f| f.0.to_le_bytes()).collect()
}

/// Resolves a task's `env` map by evaluating every value as an
/// interpolation site (`env` maps string to expression-string).
pub fn resolve_env(exec: &crate::model::ExecTask, ctx: &dyn Context) -> Result<BTreeMap<String, String>, ExpressionError> {
    let mut out = BTreeMap::new();
    for (k, v) in &exec.env {
        out.insert(k.clone(), expr::interpolate(v, ctx)?);
    }
    Ok(out)
}

/// Resolves a task's `cwd`, if present, through the expression
/// interpolator.
pub fn resolve_cwd(exec: &crate::model::ExecTask, ctx: &dyn Context) -> Result<Option<String>, ExpressionError> {
    match &exec.cwd {
        None => Ok(None),
        Some(path) => Ok(Some(expr::interpolate(&path.to_string_lossy(), ctx)?)),
    }
}

/// The fingerprint contract: task name, command, resolved env
/// as a sorted `(key, value)` list, resolved cwd, and the fingerprints of
/// every direct dependency (which already fold in *their* dependencies,
/// giving bottom-up propagation without re-walking the whole subgraph).
pub fn compute_fingerprint(
    name: &str,
    command: &str,
    resolved_env: &BTreeMap<String, String>,
    resolved_cwd: Option<&str>,
    dep_fps: &[Fingerprint],
) -> Fingerprint {
    let mut env_bytes = Vec::new();
    for (k, v) in resolved_env {
        env_bytes.extend_from_slice(k.as_bytes());
        env_bytes.push(0);
        env_bytes.extend_from_slice(v.as_bytes());
        env_bytes.push(0);
    }
    let dep_bytes = dep_fingerprint_bytes(dep_fps);
    fingerprint_of(vec![
        ("name", name.as_bytes()),
        ("command", command.as_bytes()),
        ("env", env_bytes.as_slice()),
        ("cwd", resolved_cwd.unwrap_or("").as_bytes()),
        ("deps", dep_bytes.as_slice()),
    ])
}

fn now_unix_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

struct TeeSink<'a> {
    primary: &'a CapturingSink,
    secondary: &'a dyn OutputSink,
}

impl OutputSink for TeeSink<'_> {
    fn on_stdout(&self, chunk: &[u8]) {
        self.primary.on_stdout(chunk);
        self.secondary.on_stdout(chunk);
    }
    fn on_stderr(&self, chunk: &[u8]) {
        self.primary.on_stderr(chunk);
        self.secondary.on_stderr(chunk);
    }
}

/// A sink that discards everything — used by tests and by `plan()`'s
/// dry-run, which never runs the Supervisor.
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_stdout(&self, _chunk: &[u8]) {}
    fn on_stderr(&self, _chunk: &[u8]) {}
}

pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn sink_for(&self, _task: &str) -> Box<dyn OutputSink> {
        Box::new(NullSink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawConfig, RawTask};
    use crate::expr::Context;

    struct FixedContext;
    impl Context for FixedContext {
        fn platform_os(&self) -> &str {
            "linux"
        }
        fn arch_name(&self) -> &str {
            "x86_64"
        }
        fn env(&self, _name: &str) -> Option<String> {
            None
        }
        fn matrix(&self, _key: &str) -> Option<String> {
            None
        }
        fn file_exists(&self, _path: &str) -> bool {
            false
        }
        fn file_hash(&self, _path: &str) -> Result<String, ExpressionError> {
            Ok(String::new())
        }
        fn file_newer(&self, _a: &str, _b: &str) -> bool {
            false
        }
        fn shell(&self, _cmd: &str) -> Result<String, ExpressionError> {
            Ok(String::new())
        }
        fn semver_satisfies(&self, _version: &str, _constraint: &str) -> bool {
            true
        }
        fn task_status(&self, _name: &str) -> Option<String> {
            None
        }
        fn task_output(&self, _name: &str) -> Option<String> {
            None
        }
    }

    fn task(command: &str, deps: &[&str]) -> RawTask {
        RawTask {
            command: Some(command.to_string()),
            parallel_deps: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn run_all(config: &RawConfig) -> RunOutcome {
        let lowered = crate::config::lower(config, None, None).unwrap();
        let run_set: HashSet<String> = lowered.tasks.keys().cloned().collect();
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));
        run(
            &lowered,
            &run_set,
            Arc::new(FixedContext),
            cache,
            &[],
            &NullSinkFactory,
            ScheduleOptions::default(),
            CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn a_linear_chain_runs_to_success() {
        let mut config = RawConfig::default();
        config.tasks.insert("a".into(), task("true", &[]));
        config.tasks.insert("b".into(), task("true", &["a"]));
        let outcome = run_all(&config).await;
        assert!(outcome.aggregate_success);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn a_failure_skips_its_dependents_without_fail_fast() {
        let mut config = RawConfig::default();
        config.tasks.insert("a".into(), task("false", &[]));
        config.tasks.insert("b".into(), task("true", &["a"]));
        config.tasks.insert("c".into(), task("true", &[]));

        let lowered = crate::config::lower(&config, None, None).unwrap();
        let run_set: HashSet<String> = lowered.tasks.keys().cloned().collect();
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));
        let outcome = run(
            &lowered,
            &run_set,
            Arc::new(FixedContext),
            cache,
            &[],
            &NullSinkFactory,
            ScheduleOptions {
                fail_fast: false,
                ..ScheduleOptions::default()
            },
            CancellationToken::new(),
        )
        .await;

        assert!(!outcome.aggregate_success);
        let status_of = |name: &str| outcome.records.iter().find(|r| r.task_name == name).unwrap().status;
        assert_eq!(status_of("a"), TaskStatus::Failed);
        assert_eq!(status_of("b"), TaskStatus::SkippedUpstreamFailure);
        assert_eq!(status_of("c"), TaskStatus::Success);
    }

    #[tokio::test]
    async fn fail_fast_cancels_independent_running_work() {
        let mut config = RawConfig::default();
        config.tasks.insert("fails-fast".into(), task("false", &[]));
        config.tasks.insert("slow".into(), task("sleep 5", &[]));

        let lowered = crate::config::lower(&config, None, None).unwrap();
        let run_set: HashSet<String> = lowered.tasks.keys().cloned().collect();
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));
        let started = Instant::now();
        let outcome = run(
            &lowered,
            &run_set,
            Arc::new(FixedContext),
            cache,
            &[],
            &NullSinkFactory,
            ScheduleOptions {
                fail_fast: true,
                ..ScheduleOptions::default()
            },
            CancellationToken::new(),
        )
        .await;

        assert!(!outcome.aggregate_success);
        assert!(outcome.cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn a_cache_hit_short_circuits_the_second_identical_task() {
        let mut config = RawConfig::default();
        config.tasks.insert("once".into(), task("true", &[]));
        let lowered = crate::config::lower(&config, None, None).unwrap();
        let run_set: HashSet<String> = lowered.tasks.keys().cloned().collect();
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));

        let first = run(
            &lowered,
            &run_set,
            Arc::new(FixedContext),
            cache.clone(),
            &[],
            &NullSinkFactory,
            ScheduleOptions::default(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(first.records[0].status, TaskStatus::Success);

        let second = run(
            &lowered,
            &run_set,
            Arc::new(FixedContext),
            cache,
            &[],
            &NullSinkFactory,
            ScheduleOptions::default(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(second.records[0].status, TaskStatus::CacheHit);
    }

    #[tokio::test]
    async fn a_false_condition_is_a_success_terminal_skip() {
        let mut config = RawConfig::default();
        let mut t = task("true", &[]);
        t.condition = Some("platform.is_windows".into());
        config.tasks.insert("only-on-windows".into(), t);
        let outcome = run_all(&config).await;
        assert!(outcome.aggregate_success);
        assert_eq!(outcome.records[0].status, TaskStatus::Skipped);
    }

    #[test]
    fn fingerprint_changes_when_a_dependency_fingerprint_changes() {
        let env = BTreeMap::new();
        let a = compute_fingerprint("t", "cmd", &env, None, &[Fingerprint(1)]);
        let b = compute_fingerprint("t", "cmd", &env, None, &[Fingerprint(2)]);
        assert_ne!(a, b);
    }
}
