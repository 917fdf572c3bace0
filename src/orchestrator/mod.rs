// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Orchestrator.
//!
//! The thin composition root: loads a `Config`, lowers it into a
//! `LoweredConfig` (evaluating expressions internally through [`context`]),
//! asks the graph for layering/closure, and drives the scheduler. Owns
//! nothing about parsing or scheduling itself — every real decision is
//! delegated to the module that owns it; this module's job is wiring, alias
//! expansion, workflow stage sequencing, and cancellation plumbing.

mod context;
mod report;

pub use context::{LiveSink, RunState, RuntimeContext, StatusRecorderHook};
pub use report::{Plan, PlannedTask, RunReport, RunRequest, TaskReport};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::{self, LoweredConfig, RawConfig};
use crate::errors::{nearest_match, ConfigError, ZrError};
use crate::history::HistoryLog;
use crate::hooks::RunHook;
use crate::model::{Task, TaskStatus};
use crate::observability::messages::{orchestrator as msg, StructuredLog};
use crate::scheduler::{self, ScheduleOptions, SinkFactory};
use crate::supervisor::OutputSink;
use crate::watch::{self, NotifyEventSource, RunTrigger, WatchCoordinator};

/// Resolves a workflow stage's `approval` gate: a hook into the
/// Orchestrator that pauses the pipeline until an external signal resolves.
/// The default [`AutoApprove`] never blocks;
/// an interactive collaborator (the demo binary) supplies its own.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn await_approval(&self, workflow: &str, stage: &str) -> bool;
}

/// Never blocks. Suitable for non-interactive runs (CI, tests) and for any
/// `[workflow]` with no `approval = true` stage, where the gate is never
/// consulted anyway.
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn await_approval(&self, _workflow: &str, _stage: &str) -> bool {
        true
    }
}

/// Owns the long-lived collaborators a run needs: the raw configuration
/// document, the workspace root it was loaded from (for `[workspace]`
/// inheritance and watch path mapping), and the persisted-state
/// collaborators (cache, history) rooted under `user_data_root`.
pub struct Orchestrator {
    config: RawConfig,
    workspace_root: PathBuf,
    cache: Arc<CacheStore>,
    history: HistoryLog,
    hooks: Vec<Arc<dyn RunHook>>,
}

impl Orchestrator {
    /// Loads and parses `config_path`; `user_data_root` is where the cache
    /// and history log live.
    pub fn new(config_path: &Path, user_data_root: &Path) -> Result<Self, ZrError> {
        let config = config::load_config(config_path)?;
        let workspace_root = config_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let cache = Arc::new(CacheStore::new(crate::cache::default_cache_root(user_data_root)));
        let history = HistoryLog::new(crate::history::default_history_path(user_data_root));
        Ok(Orchestrator {
            config,
            workspace_root,
            cache,
            history,
            hooks: Vec::new(),
        })
    }

    /// Attaches a plugin hook to the vector threaded through the scheduler.
    pub fn with_hook(mut self, hook: Arc<dyn RunHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn lower(&self, profile: Option<&str>) -> Result<LoweredConfig, ConfigError> {
        config::lower(&self.config, profile, Some(&self.workspace_root))
    }

    /// Expands `roots` through the alias table and validates every name
    /// against the lowered task set, producing "did you mean" hints for
    /// unknown names. Aliases — a name that expands to a list of tasks —
    /// expand one level, not recursively.
    fn resolve_roots(lowered: &LoweredConfig, roots: &[String]) -> Result<Vec<String>, ConfigError> {
        let mut resolved = Vec::new();
        for root in roots {
            if lowered.tasks.contains_key(root) {
                resolved.push(root.clone());
                continue;
            }
            if let Some(tasks) = lowered.aliases.get(root) {
                resolved.extend(tasks.iter().cloned());
                continue;
            }
            let mut candidates: Vec<&str> = lowered.tasks.keys().map(String::as_str).collect();
            candidates.extend(lowered.aliases.keys().map(String::as_str));
            let hint = nearest_match(root, candidates, 2)
                .map(|s| format!("did you mean `{s}`?"))
                .unwrap_or_else(|| "no similarly named task or alias exists".to_string());
            return Err(ConfigError::UnknownTask { name: root.clone(), hint });
        }
        Ok(resolved)
    }

    /// Runs every task reachable from `request.roots`, including their
    /// transitive dependencies: the run set is closed over
    /// `reverse_transitive_closure` before scheduling.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, ZrError> {
        let lowered = self.lower(request.profile.as_deref())?;
        let roots = Self::resolve_roots(&lowered, &request.roots)?;
        let run_set = lowered.graph.reverse_transitive_closure(roots.clone());

        let state = Arc::new(RunState::default());
        let ctx: Arc<dyn crate::expr::Context> = Arc::new(RuntimeContext::new(state.clone()));

        let mut hooks = self.hooks.clone();
        hooks.push(Arc::new(StatusRecorderHook::new(state.clone())));

        let opts = ScheduleOptions {
            max_concurrency: request.jobs.unwrap_or_else(default_concurrency),
            per_tag_concurrency: per_tag_caps(&self.config),
            fail_fast: request.fail_fast.unwrap_or(true),
        };

        let sinks = LiveSinkFactory { state: state.clone() };
        let cancel = CancellationToken::new();
        let outcome = scheduler::run(&lowered, &run_set, ctx, self.cache.clone(), &hooks, &sinks, opts, cancel).await;

        for record in &outcome.records {
            let _ = self.history.append(record).await;
        }

        let tasks: Vec<TaskReport> = outcome
            .records
            .iter()
            .map(|r| TaskReport {
                name: r.task_name.clone(),
                status: r.status,
                duration_ms: r.duration_ms,
                exit_code: r.exit_code,
                cache_hit: r.status == TaskStatus::CacheHit,
                retry_attempts: r.retry_attempts,
            })
            .collect();

        msg::RunCompleted {
            roots: &roots,
            aggregate_success: outcome.aggregate_success,
            task_count: tasks.len(),
        }
        .log();

        let exit_code = if outcome.cancelled {
            130
        } else if outcome.aggregate_success {
            0
        } else {
            1
        };

        Ok(RunReport {
            tasks,
            aggregate_success: outcome.aggregate_success,
            cancelled: outcome.cancelled,
            exit_code,
        })
    }

    /// Runs a named `[workflow.<name>]` stage-by-stage. Stages execute
    /// sequentially; a single `RunState` is
    /// shared across every stage so a later stage's `task.status`/
    /// `task.output` can see an earlier stage's terminal tasks. A stage
    /// whose `condition` is false is skipped entirely (no tasks dispatched,
    /// not even as `Skipped` records). A stage's `approval` gate, when
    /// present, is awaited before that stage's tasks are dispatched; a
    /// denial aborts the workflow without running any later stage. A
    /// stage's `on_failure` names the stage to jump to instead of the next
    /// stage in sequence when this stage fails; absent, a failed stage
    /// aborts the workflow.
    pub async fn run_workflow(&self, name: &str, approval: &dyn ApprovalGate) -> Result<RunReport, ZrError> {
        let lowered = self.lower(None)?;
        let workflow = self.config.workflow.get(name).ok_or_else(|| {
            let hint = nearest_match(name, self.config.workflow.keys().map(String::as_str), 2)
                .map(|s| format!("did you mean `{s}`?"))
                .unwrap_or_else(|| "no similarly named workflow exists".to_string());
            ZrError::Config(ConfigError::UnknownWorkflow { name: name.to_string(), hint })
        })?;

        let state = Arc::new(RunState::default());
        let mut hooks = self.hooks.clone();
        hooks.push(Arc::new(StatusRecorderHook::new(state.clone())));
        let ctx: Arc<dyn crate::expr::Context> = Arc::new(RuntimeContext::new(state.clone()));

        let mut all_tasks: Vec<TaskReport> = Vec::new();
        let mut aggregate_success = true;
        let mut cancelled = false;

        let stage_index: std::collections::HashMap<&str, usize> =
            workflow.stages.iter().enumerate().map(|(i, s)| (s.name.as_str(), i)).collect();
        let mut next_stage = Some(0usize);

        while let Some(index) = next_stage {
            let Some(stage) = workflow.stages.get(index) else {
                break;
            };
            next_stage = if index + 1 < workflow.stages.len() { Some(index + 1) } else { None };

            if let Some(condition) = &stage.condition {
                match crate::expr::eval_condition(condition, ctx.as_ref()) {
                    Ok(true) => {}
                    Ok(false) => {
                        msg::WorkflowStageSkipped { workflow: name, stage: &stage.name }.log();
                        continue;
                    }
                    Err(_) => {
                        aggregate_success = false;
                        break;
                    }
                }
            }

            if stage.approval {
                msg::ApprovalAwaited { workflow: name, stage: &stage.name }.log();
                if !approval.await_approval(name, &stage.name).await {
                    msg::ApprovalDenied { workflow: name, stage: &stage.name }.log();
                    aggregate_success = false;
                    break;
                }
            }

            msg::WorkflowStageStarted {
                workflow: name,
                stage: &stage.name,
                task_count: stage.tasks.len(),
            }
            .log();

            let roots = Self::resolve_roots(&lowered, &stage.tasks)?;
            let run_set = lowered.graph.reverse_transitive_closure(roots);
            let opts = ScheduleOptions {
                max_concurrency: if stage.parallel { default_concurrency() } else { 1 },
                per_tag_concurrency: per_tag_caps(&self.config),
                fail_fast: stage.fail_fast,
            };
            let sinks = LiveSinkFactory { state: state.clone() };
            let cancel = CancellationToken::new();
            let outcome = scheduler::run(&lowered, &run_set, ctx.clone(), self.cache.clone(), &hooks, &sinks, opts, cancel).await;

            for record in &outcome.records {
                let _ = self.history.append(record).await;
                all_tasks.push(TaskReport {
                    name: record.task_name.clone(),
                    status: record.status,
                    duration_ms: record.duration_ms,
                    exit_code: record.exit_code,
                    cache_hit: record.status == TaskStatus::CacheHit,
                    retry_attempts: record.retry_attempts,
                });
            }

            if outcome.cancelled {
                cancelled = true;
            }
            if !outcome.aggregate_success {
                aggregate_success = false;
                next_stage = stage.on_failure.as_deref().and_then(|target| stage_index.get(target).copied());
                if next_stage.is_none() {
                    break;
                }
            }
        }

        let exit_code = if cancelled { 130 } else if aggregate_success { 0 } else { 1 };
        Ok(RunReport {
            tasks: all_tasks,
            aggregate_success,
            cancelled,
            exit_code,
        })
    }

    /// Computes the resolved command/env/cwd/fingerprint for every task in
    /// `request.roots`'s closure without dispatching the Supervisor, for
    /// dry-run use. Empty `roots` plans the whole graph, for the
    /// `list`/`graph` surface.
    pub fn plan(&self, request: &RunRequest) -> Result<Plan, ZrError> {
        let lowered = self.lower(request.profile.as_deref())?;
        let run_set: HashSet<String> = if request.roots.is_empty() {
            lowered.tasks.keys().cloned().collect()
        } else {
            let roots = Self::resolve_roots(&lowered, &request.roots)?;
            lowered.graph.reverse_transitive_closure(roots)
        };

        struct PlanContext;
        impl crate::expr::Context for PlanContext {
            fn platform_os(&self) -> &str {
                std::env::consts::OS
            }
            fn arch_name(&self) -> &str {
                std::env::consts::ARCH
            }
            fn env(&self, name: &str) -> Option<String> {
                std::env::var(name).ok()
            }
            fn matrix(&self, _key: &str) -> Option<String> {
                None
            }
            fn file_exists(&self, path: &str) -> bool {
                Path::new(path).exists()
            }
            fn file_hash(&self, _path: &str) -> Result<String, crate::errors::ExpressionError> {
                Ok(String::new())
            }
            fn file_newer(&self, _a: &str, _b: &str) -> bool {
                false
            }
            fn shell(&self, _cmd: &str) -> Result<String, crate::errors::ExpressionError> {
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
        let ctx = PlanContext;

        let layers = lowered.graph.topological_layers().map_err(|_| {
            ZrError::Internal(crate::errors::InternalInvariant::Violated {
                message: "graph already finalized but layering failed".to_string(),
            })
        })?;

        let mut fingerprints = std::collections::HashMap::new();
        let mut planned_layers = Vec::new();
        for layer in layers {
            let mut planned_layer = Vec::new();
            for name in layer {
                if !run_set.contains(&name) {
                    continue;
                }
                let task = &lowered.tasks[&name];
                let planned = self.plan_task(&name, task, &ctx, &mut fingerprints);
                planned_layer.push(planned);
            }
            if !planned_layer.is_empty() {
                planned_layers.push(planned_layer);
            }
        }

        Ok(Plan { layers: planned_layers })
    }

    fn plan_task(
        &self,
        name: &str,
        task: &Task,
        ctx: &dyn crate::expr::Context,
        fingerprints: &mut std::collections::HashMap<String, crate::fingerprint::Fingerprint>,
    ) -> PlannedTask {
        let dep_fps: Vec<crate::fingerprint::Fingerprint> = task
            .core()
            .parallel_deps
            .iter()
            .chain(task.core().serial_deps.iter())
            .filter_map(|d| fingerprints.get(d).copied())
            .collect();

        let Some(exec) = task.as_exec() else {
            return PlannedTask {
                name: name.to_string(),
                command: None,
                resolved_env: Default::default(),
                resolved_cwd: None,
                fingerprint: None,
                would_skip: false,
            };
        };

        let resolved_env = scheduler::resolve_env(exec, ctx).unwrap_or_default();
        let resolved_cwd = scheduler::resolve_cwd(exec, ctx).ok().flatten();
        let fingerprint = scheduler::compute_fingerprint(name, &exec.command, &resolved_env, resolved_cwd.as_deref(), &dep_fps);
        fingerprints.insert(name.to_string(), fingerprint);

        let would_skip = task
            .core()
            .condition
            .as_ref()
            .map(|cond| !matches!(crate::expr::eval_condition(cond, ctx), Ok(true)))
            .unwrap_or(false);

        PlannedTask {
            name: name.to_string(),
            command: Some(exec.command.clone()),
            resolved_env,
            resolved_cwd: resolved_cwd.map(PathBuf::from),
            fingerprint: Some(fingerprint.to_hex()),
            would_skip,
        }
    }

    /// Watches the paths beneath the declared `[workspace]` members, seeding
    /// a run from `seed_tasks`' affected member whenever a debounce window
    /// closes. Returns only on `Ctrl-C` or the event source closing.
    pub async fn watch(self: Arc<Self>, paths: &[PathBuf]) -> Result<(), ZrError> {
        let source = NotifyEventSource::new(paths).map_err(|e| {
            ZrError::Internal(crate::errors::InternalInvariant::Violated {
                message: format!("could not start filesystem watcher: {e}"),
            })
        })?;
        let members = match &self.config.workspace {
            Some(ws) => watch::members_from_workspace(ws, &self.workspace_root),
            None => Vec::new(),
        };
        let coordinator = WatchCoordinator::new(source, members);
        let trigger = Arc::new(OrchestratorTrigger { orchestrator: self.clone() });
        let cancel = CancellationToken::new();

        let cancel_for_signal = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel_for_signal.cancel();
        });

        coordinator.run(trigger, cancel).await;
        Ok(())
    }
}

/// Bridges [`watch::RunTrigger`] to [`Orchestrator::run`]: a debounced batch
/// names affected workspace members, which become the run's roots directly
/// (each member corresponds to a task/meta-task of the same name once its
/// config is merged in by `merge_workspace_members`, or — for a
/// single-config workspace with no qualifying prefix — the bare task name).
struct OrchestratorTrigger {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl RunTrigger for OrchestratorTrigger {
    async fn trigger(&self, seeds: &[String]) {
        let request = RunRequest::new(seeds.iter().cloned());
        match self.orchestrator.run(request).await {
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "watch-triggered run failed to even start"),
        }
    }
}

/// Builds a [`LiveSink`] per task, forwarding to real stdout/stderr and into
/// the shared [`RunState`].
struct LiveSinkFactory {
    state: Arc<RunState>,
}

impl SinkFactory for LiveSinkFactory {
    fn sink_for(&self, task: &str) -> Box<dyn OutputSink> {
        Box::new(LiveSink::new(task, self.state.clone()))
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Flattens `[resources]`'s single global cap into the per-tag map the
/// Scheduler expects, keyed under a reserved tag every task implicitly
/// carries. Per-tag caps declared directly on tasks (`[resources]`) are
/// read from the task's own `tags` set at lowering time
/// and are not duplicated here; `[resources].max_concurrent` is this
/// config's only crate-wide knob beyond `ScheduleOptions::max_concurrency`.
fn per_tag_caps(config: &RawConfig) -> std::collections::HashMap<String, u32> {
    let mut caps = std::collections::HashMap::new();
    if let Some(resources) = &config.resources {
        if let Some(cap) = resources.max_concurrent {
            caps.insert("__global__".to_string(), cap);
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("zr.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn running_a_simple_task_graph_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [tasks.a]
            command = "true"

            [tasks.b]
            command = "true"
            parallel_deps = ["a"]
            "#,
        );
        let orchestrator = Orchestrator::new(&config_path, dir.path()).unwrap();
        let report = orchestrator.run(RunRequest::new(["b"])).await.unwrap();
        assert!(report.aggregate_success);
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.tasks.len(), 2);
    }

    #[tokio::test]
    async fn an_unknown_root_reports_a_hint() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [tasks.build]
            command = "true"
            "#,
        );
        let orchestrator = Orchestrator::new(&config_path, dir.path()).unwrap();
        let err = orchestrator.run(RunRequest::new(["biuld"])).await.unwrap_err();
        match err {
            ZrError::Config(ConfigError::UnknownTask { hint, .. }) => assert!(hint.contains("build")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn an_alias_expands_to_its_declared_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [tasks.a]
            command = "true"
            [tasks.b]
            command = "true"

            [alias.ci]
            tasks = ["a", "b"]
            "#,
        );
        let orchestrator = Orchestrator::new(&config_path, dir.path()).unwrap();
        let report = orchestrator.run(RunRequest::new(["ci"])).await.unwrap();
        assert_eq!(report.tasks.len(), 2);
    }

    #[tokio::test]
    async fn plan_resolves_fingerprints_without_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [tasks.a]
            command = "echo should-not-run"
            "#,
        );
        let orchestrator = Orchestrator::new(&config_path, dir.path()).unwrap();
        let plan = orchestrator.plan(&RunRequest::new(["a"])).unwrap();
        assert_eq!(plan.layers.len(), 1);
        assert_eq!(plan.layers[0][0].name, "a");
        assert!(plan.layers[0][0].fingerprint.is_some());
    }

    #[tokio::test]
    async fn a_workflow_runs_its_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [tasks.build]
            command = "true"
            [tasks.test]
            command = "true"

            [[workflow.ci.stages]]
            name = "build-stage"
            tasks = ["build"]

            [[workflow.ci.stages]]
            name = "test-stage"
            tasks = ["test"]
            "#,
        );
        let orchestrator = Orchestrator::new(&config_path, dir.path()).unwrap();
        let report = orchestrator.run_workflow("ci", &AutoApprove).await.unwrap();
        assert!(report.aggregate_success);
        assert_eq!(report.tasks.len(), 2);
    }

    #[tokio::test]
    async fn a_denied_approval_aborts_the_workflow() {
        struct DenyAll;
        #[async_trait::async_trait]
        impl ApprovalGate for DenyAll {
            async fn await_approval(&self, _workflow: &str, _stage: &str) -> bool {
                false
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(
            dir.path(),
            r#"
            [tasks.build]
            command = "true"
            [tasks.deploy]
            command = "true"

            [[workflow.ci.stages]]
            name = "build-stage"
            tasks = ["build"]
            approval = true

            [[workflow.ci.stages]]
            name = "deploy-stage"
            tasks = ["deploy"]
            "#,
        );
        let orchestrator = Orchestrator::new(&config_path, dir.path()).unwrap();
        let report = orchestrator.run_workflow("ci", &DenyAll).await.unwrap();
        assert!(!report.aggregate_success);
        assert!(report.tasks.is_empty());
    }
}
