// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The typed configuration tree handed over by the TOML parsing
//! collaborator. All top-level sections are optional.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub tasks: BTreeMap<String, RawTask>,
    #[serde(default)]
    pub workflow: BTreeMap<String, WorkflowDef>,
    #[serde(default)]
    pub profile: BTreeMap<String, ProfileDef>,
    #[serde(default)]
    pub matrix: BTreeMap<String, MatrixDef>,
    #[serde(default)]
    pub workspace: Option<WorkspaceDef>,
    #[serde(default)]
    pub resources: Option<ResourcesDef>,
    #[serde(default)]
    pub template: BTreeMap<String, RawTask>,
    #[serde(default)]
    pub alias: BTreeMap<String, AliasDef>,

    // Lowered by the out-of-scope CLI collaborator; the core only needs to
    // pass these through untouched.
    #[serde(default)]
    pub toolchains: toml::Table,
    #[serde(default)]
    pub cache: toml::Table,
    #[serde(default)]
    pub schedule: toml::Table,
    #[serde(default)]
    pub conformance: toml::Table,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTask {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub parallel_deps: Vec<String>,
    #[serde(default)]
    pub serial_deps: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_max: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry_exponential: Option<bool>,
    #[serde(default)]
    pub allow_failure: Option<bool>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub cache_enabled: Option<bool>,
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    #[serde(default)]
    pub max_cpu_cores: Option<u32>,
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub matrix: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub stages: Vec<WorkflowStage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub name: String,
    pub tasks: Vec<String>,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub approval: bool,
    #[serde(default)]
    pub on_failure: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileDef {
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub task: BTreeMap<String, RawTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixDef {
    #[serde(flatten)]
    pub dimensions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceDef {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesDef {
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasDef {
    pub tasks: Vec<String>,
}
