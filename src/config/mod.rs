// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The Task Model & Graph Builder.
//!
//! Lowers the typed configuration tree (produced by the `toml`/`serde`
//! parsing collaborator) into the task model of
//! [`crate::model`] and the dependency graph of [`crate::graph`], applying
//! profile overlay, template instantiation, matrix expansion, workspace
//! inheritance, and alias expansion in that order.

mod lower;
mod raw;

pub use lower::{lower, LoweredConfig};
pub use raw::{
    AliasDef, MatrixDef, ProfileDef, RawConfig, RawTask, ResourcesDef, WorkflowDef,
    WorkflowStage, WorkspaceDef,
};

use std::path::Path;

use crate::errors::ConfigError;

/// Reads and parses a TOML configuration document from `path`. Schema
/// deserialization failures become `ConfigError::Malformed`; this is the
/// seam for the §6 "parser is a collaborator" contract — everything past
/// this function operates on the typed `RawConfig` tree only.
pub fn load_config(path: &Path) -> Result<RawConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Malformed {
        message: format!("could not read '{}': {e}", path.display()),
    })?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Malformed {
        message: e.to_string(),
    })
}
