// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The lowering pipeline: profile overlay -> template instantiation ->
//! matrix expansion -> workspace inheritance -> alias expansion, in that
//! order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::errors::{nearest_match, ConfigError};
use crate::graph::Graph;
use crate::model::{ExecTask, MetaTask, RetryPolicy, Task, TaskCore};

use super::raw::{RawConfig, RawTask};

/// Output of the lowering pipeline: the typed task model plus the
/// finalized dependency graph, and the alias table for invocation-time
/// expansion — aliases resolve at invocation, so the
/// mapping is carried rather than expanded eagerly.
pub struct LoweredConfig {
    pub tasks: BTreeMap<String, Task>,
    pub graph: Graph,
    pub aliases: BTreeMap<String, Vec<String>>,
}

/// Lowers `config` under the (optional) active `profile`. `workspace_root`
/// is used to resolve workspace member configs when `[workspace]` is
/// present; pass `None` to skip workspace inheritance for a single-file
/// config.
pub fn lower(config: &RawConfig, profile: Option<&str>, workspace_root: Option<&Path>) -> Result<LoweredConfig, ConfigError> {
    let mut raw_tasks = apply_profile_overlay(config, profile)?;
    instantiate_templates(&mut raw_tasks, config)?;
    let mut raw_tasks = expand_matrices(raw_tasks, config)?;

    if let (Some(ws), Some(root)) = (&config.workspace, workspace_root) {
        merge_workspace_members(&mut raw_tasks, ws, root)?;
    }

    let names: BTreeSet<String> = raw_tasks.keys().cloned().collect();
    let mut tasks = BTreeMap::new();
    let mut graph = Graph::new();

    for (name, raw) in &raw_tasks {
        let task = lower_task(name, raw, &names)?;
        graph.add_node(name.clone());
        for dep in task.core().parallel_deps.iter().chain(task.core().serial_deps.iter()) {
            graph.add_edge(dep.clone(), name.clone());
        }
        // `serial_deps` is an ordered sequence: beyond each entry gating
        // this task, consecutive entries gate each other, so dependents
        // observe the declared order regardless of parallelism elsewhere.
        for pair in task.core().serial_deps.windows(2) {
            graph.add_edge(pair[0].clone(), pair[1].clone());
        }
        tasks.insert(name.clone(), task);
    }

    graph.finalize()?;

    let aliases = config
        .alias
        .iter()
        .map(|(name, def)| (name.clone(), def.tasks.clone()))
        .collect();

    Ok(LoweredConfig { tasks, graph, aliases })
}

fn apply_profile_overlay(config: &RawConfig, profile: Option<&str>) -> Result<BTreeMap<String, RawTask>, ConfigError> {
    let mut tasks = config.tasks.clone();
    let Some(profile_name) = profile else {
        return Ok(tasks);
    };
    let Some(profile_def) = config.profile.get(profile_name) else {
        return Ok(tasks);
    };

    for (name, overlay) in &profile_def.task {
        let base = tasks.entry(name.clone()).or_default();
        deep_merge_task(base, overlay);
    }
    for task in tasks.values_mut() {
        for (k, v) in &profile_def.env {
            task.env.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    Ok(tasks)
}

/// Overlay fields from `overlay` win when present; `base` fields are kept
/// otherwise. Maps (`env`) are merged key-by-key.
fn deep_merge_task(base: &mut RawTask, overlay: &RawTask) {
    macro_rules! overlay_opt {
        ($field:ident) => {
            if overlay.$field.is_some() {
                base.$field = overlay.$field.clone();
            }
        };
    }
    overlay_opt!(command);
    overlay_opt!(template);
    overlay_opt!(cwd);
    overlay_opt!(timeout_ms);
    overlay_opt!(retry_max);
    overlay_opt!(retry_delay_ms);
    overlay_opt!(retry_exponential);
    overlay_opt!(allow_failure);
    overlay_opt!(condition);
    overlay_opt!(cache_enabled);
    overlay_opt!(max_concurrent);
    overlay_opt!(max_cpu_cores);
    overlay_opt!(max_memory_bytes);

    for (k, v) in &overlay.env {
        base.env.insert(k.clone(), v.clone());
    }
    if !overlay.parallel_deps.is_empty() {
        base.parallel_deps = overlay.parallel_deps.clone();
    }
    if !overlay.serial_deps.is_empty() {
        base.serial_deps = overlay.serial_deps.clone();
    }
    if !overlay.tags.is_empty() {
        base.tags = overlay.tags.clone();
    }
}

fn instantiate_templates(tasks: &mut BTreeMap<String, RawTask>, config: &RawConfig) -> Result<(), ConfigError> {
    for (name, task) in tasks.iter_mut() {
        let Some(template_name) = task.template.clone() else {
            continue;
        };
        let Some(template) = config.template.get(&template_name) else {
            return Err(ConfigError::MissingTemplate {
                task: name.clone(),
                template: template_name.clone(),
                hint: format!("declare [template.{template_name}]"),
            });
        };
        let mut inlined = template.clone();
        deep_merge_task(&mut inlined, task);
        for value in [&mut inlined.command, &mut inlined.cwd] {
            if let Some(s) = value {
                *s = substitute_params(s, &task.params);
            }
        }
        for v in inlined.env.values_mut() {
            *v = substitute_params(v, &task.params);
        }
        *task = inlined;
    }
    Ok(())
}

fn substitute_params(text: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (k, v) in params {
        out = out.replace(&format!("${{param.{k}}}"), v);
    }
    out
}

fn insert_unique(out: &mut BTreeMap<String, RawTask>, name: String, task: RawTask) -> Result<(), ConfigError> {
    if out.contains_key(&name) {
        return Err(ConfigError::DuplicateTaskName { name });
    }
    out.insert(name, task);
    Ok(())
}

fn expand_matrices(tasks: BTreeMap<String, RawTask>, config: &RawConfig) -> Result<BTreeMap<String, RawTask>, ConfigError> {
    let mut out = BTreeMap::new();

    for (base_name, task) in tasks {
        if task.matrix.is_empty() {
            insert_unique(&mut out, base_name, task)?;
            continue;
        }

        let mut dims: Vec<(String, Vec<String>)> = Vec::new();
        for (key, values) in &task.matrix {
            if !values.is_empty() {
                dims.push((key.clone(), values.clone()));
            } else if let Some(named) = config.matrix.get(key) {
                let values = named.dimensions.get(key).cloned().ok_or_else(|| ConfigError::MissingMatrixKey {
                    task: base_name.clone(),
                    key: key.clone(),
                })?;
                dims.push((key.clone(), values));
            } else {
                return Err(ConfigError::MissingMatrixKey {
                    task: base_name.clone(),
                    key: key.clone(),
                });
            }
        }

        let variants = cartesian_product(&dims);
        let mut variant_names = Vec::with_capacity(variants.len());

        for binding in &variants {
            let suffix: Vec<String> = dims.iter().map(|(k, _)| binding[k].clone()).collect();
            let variant_name = format!("{base_name}-{}", suffix.join("-"));
            let mut variant = task.clone();
            variant.matrix.clear();
            if let Some(cmd) = &mut variant.command {
                *cmd = substitute_matrix(cmd, binding);
            }
            if let Some(cwd) = &mut variant.cwd {
                *cwd = substitute_matrix(cwd, binding);
            }
            for v in variant.env.values_mut() {
                *v = substitute_matrix(v, binding);
            }
            variant_names.push(variant_name.clone());
            insert_unique(&mut out, variant_name, variant)?;
        }

        // The base name is reserved as an aggregate depending on all
        // variants.
        insert_unique(
            &mut out,
            base_name,
            RawTask {
                parallel_deps: variant_names,
                ..Default::default()
            },
        )?;
    }

    Ok(out)
}

fn substitute_matrix(text: &str, binding: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (k, v) in binding {
        out = out.replace(&format!("${{matrix.{k}}}"), v);
    }
    out
}

fn cartesian_product(dims: &[(String, Vec<String>)]) -> Vec<BTreeMap<String, String>> {
    let mut result: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
    for (key, values) in dims {
        let mut next = Vec::with_capacity(result.len() * values.len());
        for partial in &result {
            for value in values {
                let mut extended = partial.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        result = next;
    }
    result
}

fn merge_workspace_members(
    tasks: &mut BTreeMap<String, RawTask>,
    workspace: &super::raw::WorkspaceDef,
    root: &Path,
) -> Result<(), ConfigError> {
    for member in &workspace.members {
        let member_dir = root.join(member);
        let member_config_path = member_dir.join("zr.toml");
        if !member_config_path.exists() {
            continue;
        }
        let member_config = super::load_config(&member_config_path)?;
        for (task_name, task) in member_config.tasks {
            let qualified = format!("{member}:{task_name}");
            let mut qualified_task = task;
            qualified_task.parallel_deps = qualify_deps(&qualified_task.parallel_deps, member);
            qualified_task.serial_deps = qualify_deps(&qualified_task.serial_deps, member);
            if tasks.contains_key(&qualified) {
                return Err(ConfigError::DuplicateTaskName { name: qualified });
            }
            tasks.insert(qualified, qualified_task);
        }
    }
    Ok(())
}

fn qualify_deps(deps: &[String], member: &str) -> Vec<String> {
    deps.iter()
        .map(|d| if d.contains(':') { d.clone() } else { format!("{member}:{d}") })
        .collect()
}

fn lower_task(name: &str, raw: &RawTask, known_names: &BTreeSet<String>) -> Result<Task, ConfigError> {
    for dep in raw.parallel_deps.iter().chain(raw.serial_deps.iter()) {
        if !known_names.contains(dep) {
            let hint = nearest_match(dep, known_names.iter().map(String::as_str), 2)
                .map(|s| format!("did you mean `{s}`?"))
                .unwrap_or_else(|| "no similarly named task exists".to_string());
            return Err(ConfigError::UnknownDependency {
                task: name.to_string(),
                dependency: dep.clone(),
                hint,
            });
        }
    }

    let core = TaskCore {
        name: name.to_string(),
        parallel_deps: raw.parallel_deps.clone(),
        serial_deps: raw.serial_deps.clone(),
        condition: raw.condition.clone(),
        tags: raw.tags.iter().cloned().collect(),
    };

    match &raw.command {
        None => {
            if raw.cache_enabled == Some(true) {
                return Err(ConfigError::CacheOnMetaTask { task: name.to_string() });
            }
            Ok(Task::Meta(MetaTask { core }))
        }
        Some(command) => {
            let cache_enabled = raw.cache_enabled.unwrap_or(true);
            Ok(Task::Exec(ExecTask {
                core,
                command: command.clone(),
                env: raw.env.clone(),
                cwd: raw.cwd.clone().map(Into::into),
                timeout_ms: raw.timeout_ms,
                retry: RetryPolicy {
                    max: raw.retry_max.unwrap_or(0),
                    delay_ms: raw.retry_delay_ms.unwrap_or(0),
                    exponential: raw.retry_exponential.unwrap_or(false),
                },
                allow_failure: raw.allow_failure.unwrap_or(false),
                cache_enabled,
                max_concurrent: raw.max_concurrent.unwrap_or(0),
                max_cpu_cores: raw.max_cpu_cores,
                max_memory_bytes: raw.max_memory_bytes,
                required_tools: BTreeSet::new(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(command: Option<&str>, deps: &[&str]) -> RawTask {
        RawTask {
            command: command.map(String::from),
            parallel_deps: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn linear_chain_lowers_with_no_errors() {
        let mut config = RawConfig::default();
        config.tasks.insert("a".into(), task(Some("true"), &[]));
        config.tasks.insert("b".into(), task(Some("true"), &["a"]));
        config.tasks.insert("c".into(), task(Some("true"), &["b"]));

        let lowered = lower(&config, None, None).unwrap();
        assert_eq!(lowered.tasks.len(), 3);
        assert!(lowered.graph.is_finalized());
    }

    #[test]
    fn unknown_dependency_is_reported_with_a_hint() {
        let mut config = RawConfig::default();
        config.tasks.insert("biuld".into(), task(Some("true"), &[]));
        config.tasks.insert("test".into(), task(Some("true"), &["build"]));

        let err = lower(&config, None, None).unwrap_err();
        match err {
            ConfigError::UnknownDependency { hint, .. } => assert!(hint.contains("biuld")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cycle_is_rejected() {
        let mut config = RawConfig::default();
        config.tasks.insert("a".into(), task(Some("true"), &["b"]));
        config.tasks.insert("b".into(), task(Some("true"), &["a"]));

        let err = lower(&config, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::CyclicDependency { .. }));
    }

    #[test]
    fn meta_task_without_command_has_no_exec_fields() {
        let mut config = RawConfig::default();
        config.tasks.insert("all".into(), task(None, &[]));
        let lowered = lower(&config, None, None).unwrap();
        assert!(lowered.tasks["all"].as_exec().is_none());
    }

    #[test]
    fn matrix_expansion_produces_cartesian_variants_and_an_aggregate() {
        let mut config = RawConfig::default();
        let mut t = task(Some("run ${matrix.os} ${matrix.arch}"), &[]);
        t.matrix.insert("os".into(), vec!["linux".into(), "macos".into()]);
        t.matrix.insert("arch".into(), vec!["x86_64".into()]);
        config.tasks.insert("build".into(), t);

        let lowered = lower(&config, None, None).unwrap();
        // 2 variants + 1 aggregate = 3 tasks total.
        assert_eq!(lowered.tasks.len(), 3);
        assert!(lowered.tasks.contains_key("build-linux-x86_64"));
        assert!(lowered.tasks.contains_key("build-macos-x86_64"));
        let aggregate = lowered.tasks["build"].core();
        assert_eq!(aggregate.parallel_deps.len(), 2);
    }

    #[test]
    fn profile_overlay_merges_env_and_overrides_fields() {
        let mut config = RawConfig::default();
        config.tasks.insert("build".into(), task(Some("make"), &[]));
        let mut profile = crate::config::raw::ProfileDef::default();
        profile.env.insert("MODE".into(), "release".into());
        let mut overlay_task = RawTask::default();
        overlay_task.command = Some("make release".into());
        profile.task.insert("build".into(), overlay_task);
        config.profile.insert("release".into(), profile);

        let lowered = lower(&config, Some("release"), None).unwrap();
        let exec = lowered.tasks["build"].as_exec().unwrap();
        assert_eq!(exec.command, "make release");
        assert_eq!(exec.env.get("MODE"), Some(&"release".to_string()));
    }

    #[test]
    fn serial_deps_are_chained_in_declared_order() {
        let mut config = RawConfig::default();
        config.tasks.insert("step1".into(), task(Some("true"), &[]));
        config.tasks.insert("step2".into(), task(Some("true"), &[]));
        config.tasks.insert("step3".into(), task(Some("true"), &[]));
        let mut last = RawTask {
            command: Some("true".into()),
            serial_deps: vec!["step1".into(), "step2".into(), "step3".into()],
            ..Default::default()
        };
        last.command = Some("true".into());
        config.tasks.insert("last".into(), last);

        let lowered = lower(&config, None, None).unwrap();
        assert!(lowered.graph.dependents_of("step1").contains(&"step2".to_string()));
        assert!(lowered.graph.dependents_of("step2").contains(&"step3".to_string()));
        assert!(lowered.graph.dependents_of("step3").contains(&"last".to_string()));
    }

    #[test]
    fn matrix_variant_colliding_with_an_existing_task_is_rejected() {
        let mut config = RawConfig::default();
        let mut t = task(Some("run ${matrix.os}"), &[]);
        t.matrix.insert("os".into(), vec!["linux".into()]);
        config.tasks.insert("build".into(), t);
        // Collides with the variant name `build-linux` the matrix above expands to.
        config.tasks.insert("build-linux".into(), task(Some("true"), &[]));

        let err = lower(&config, None, None).unwrap_err();
        match err {
            ConfigError::DuplicateTaskName { name } => assert_eq!(name, "build-linux"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cache_enabled_meta_task_is_rejected() {
        let mut config = RawConfig::default();
        let mut t = task(None, &[]);
        t.cache_enabled = Some(true);
        config.tasks.insert("all".into(), t);

        let err = lower(&config, None, None).unwrap_err();
        match err {
            ConfigError::CacheOnMetaTask { task } => assert_eq!(task, "all"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn template_instantiation_substitutes_params() {
        let mut config = RawConfig::default();
        config.template.insert(
            "node-task".into(),
            task(Some("node ${param.script}"), &[]),
        );
        let mut t = RawTask {
            template: Some("node-task".into()),
            ..Default::default()
        };
        t.params.insert("script".into(), "build.js".into());
        config.tasks.insert("build".into(), t);

        let lowered = lower(&config, None, None).unwrap();
        let exec = lowered.tasks["build"].as_exec().unwrap();
        assert_eq!(exec.command, "node build.js");
    }
}
