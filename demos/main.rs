// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! `zr-demo`: a manually-parsed command surface over [`zr_core::orchestrator`]
//! exercising `run`, `workflow`, `list`, `graph`, `watch`, `validate`,
//! `history`, and `clean`. Argument handling is hand-rolled
//! rather than pulled in through a CLI framework; `anyhow` carries
//! top-level error context here, never inside `zr_core` itself.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use async_trait::async_trait;

use zr_core::errors::ZrError;
use zr_core::orchestrator::{ApprovalGate, Orchestrator, RunRequest};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("zr_core=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        print_usage();
        std::process::exit(2);
    };

    let runtime = tokio::runtime::Runtime::new().context("could not start the async runtime")?;
    let exit_code = runtime.block_on(dispatch(command, rest))?;
    std::process::exit(exit_code)
}

async fn dispatch(command: &str, rest: &[String]) -> anyhow::Result<i32> {
    let config_path = default_config_path();
    let user_data_root = default_user_data_root();

    match command {
        "run" => {
            if rest.is_empty() {
                bail!("usage: zr-demo run <task...> [--profile NAME] [--jobs N] [--no-fail-fast]");
            }
            let (roots, profile, jobs, fail_fast) = parse_run_args(rest)?;
            let orchestrator = Orchestrator::new(&config_path, &user_data_root)?;
            let mut request = RunRequest::new(roots);
            request.profile = profile;
            request.jobs = jobs;
            request.fail_fast = fail_fast;
            let report = orchestrator.run(request).await?;
            print_report(&report)?;
            Ok(report.exit_code)
        }

        "workflow" => {
            let Some(name) = rest.first() else {
                bail!("usage: zr-demo workflow <name>");
            };
            let orchestrator = Orchestrator::new(&config_path, &user_data_root)?;
            let report = orchestrator.run_workflow(name, &StdinApproval).await?;
            print_report(&report)?;
            Ok(report.exit_code)
        }

        "graph" | "list" => {
            let orchestrator = Orchestrator::new(&config_path, &user_data_root)?;
            let plan = orchestrator.plan(&RunRequest::default())?;
            for (depth, layer) in plan.layers.iter().enumerate() {
                for task in layer {
                    println!("[{depth}] {} {}", task.name, task.command.as_deref().unwrap_or("(meta)"));
                }
            }
            Ok(0)
        }

        "validate" => {
            match Orchestrator::new(&config_path, &user_data_root) {
                Ok(_) => {
                    println!("configuration is valid");
                    Ok(0)
                }
                Err(err) => {
                    eprintln!("{err}");
                    Ok(exit_code_of(&err))
                }
            }
        }

        "watch" => {
            if rest.is_empty() {
                bail!("usage: zr-demo watch <path...>");
            }
            let orchestrator = std::sync::Arc::new(Orchestrator::new(&config_path, &user_data_root)?);
            let paths: Vec<PathBuf> = rest.iter().map(PathBuf::from).collect();
            orchestrator.watch(&paths).await?;
            Ok(0)
        }

        "history" => {
            let history = zr_core::history::HistoryLog::new(zr_core::history::default_history_path(&user_data_root));
            for record in history.read_all().await? {
                println!("{} {:?} ({}ms)", record.task_name, record.status, record.duration_ms);
            }
            Ok(0)
        }

        "clean" => {
            let cache_root = zr_core::cache::default_cache_root(&user_data_root);
            if cache_root.exists() {
                std::fs::remove_dir_all(&cache_root).with_context(|| format!("could not remove '{}'", cache_root.display()))?;
            }
            println!("removed {}", cache_root.display());
            Ok(0)
        }

        other => {
            eprintln!("unknown command: '{other}'");
            print_usage();
            Ok(2)
        }
    }
}

fn parse_run_args(rest: &[String]) -> anyhow::Result<(Vec<String>, Option<String>, Option<usize>, Option<bool>)> {
    let mut roots = Vec::new();
    let mut profile = None;
    let mut jobs = None;
    let mut fail_fast = None;

    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--profile" => profile = Some(iter.next().context("--profile needs a value")?.clone()),
            "--jobs" => jobs = Some(iter.next().context("--jobs needs a value")?.parse()?),
            "--no-fail-fast" => fail_fast = Some(false),
            root => roots.push(root.to_string()),
        }
    }
    Ok((roots, profile, jobs, fail_fast))
}

fn print_report(report: &zr_core::orchestrator::RunReport) -> anyhow::Result<()> {
    for task in &report.tasks {
        println!("{:<24} {:?} ({}ms)", task.name, task.status, task.duration_ms);
    }
    println!(
        "{} ({} tasks)",
        if report.aggregate_success { "OK" } else { "FAILED" },
        report.tasks.len()
    );
    Ok(())
}

fn exit_code_of(err: &ZrError) -> i32 {
    err.exit_code() as i32
}

/// Prompts on stdin before an `approval` stage dispatches. Non-interactive
/// callers should build their own [`ApprovalGate`] rather than use this one.
struct StdinApproval;

#[async_trait]
impl ApprovalGate for StdinApproval {
    async fn await_approval(&self, workflow: &str, stage: &str) -> bool {
        print!("workflow '{workflow}' awaiting approval before stage '{stage}' [y/N]: ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os("ZR_CONFIG").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("zr.toml"))
}

fn default_user_data_root() -> PathBuf {
    std::env::var_os("ZR_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| Path::new(".zr").to_path_buf())
}

fn print_usage() {
    eprintln!("usage: zr-demo <run|workflow|list|graph|watch|validate|history|clean> [args...]");
}
