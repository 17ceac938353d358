// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity records for the agent, frameworks, and executors.

use crate::id::{ExecutorId, FrameworkId, SlaveId};
use crate::resources::Resources;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display names longer than this are truncated.
const MAX_DISPLAY_NAME_LEN: usize = 15;

/// Truncated names keep this many leading characters plus "...".
const TRUNCATED_NAME_LEN: usize = 12;

/// Identity of this node: master-assigned ID (absent until first
/// registration), hostname, advertised resources and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SlaveId>,
    pub hostname: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl SlaveInfo {
    pub fn new(hostname: impl Into<String>, resources: Resources) -> Self {
        Self {
            id: None,
            hostname: hostname.into(),
            resources,
            attributes: HashMap::new(),
        }
    }
}

/// Identity of a framework (a tenant of the cluster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    /// How long the agent keeps this framework's executors alive after
    /// losing contact before shutting them down. Zero disables the
    /// timeout.
    #[serde(default)]
    pub failover_timeout_ms: u64,
}

/// A shell command with its environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Command line, run through `sh -c`.
    pub value: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl CommandInfo {
    pub fn shell(value: impl Into<String>) -> Self {
        Self { value: value.into(), env: HashMap::new() }
    }

    /// Human-readable name derived from the command line.
    ///
    /// Longer than 15 characters truncates to the first 12 plus "...";
    /// an empty command yields a deterministic placeholder. Display only,
    /// never an identifier.
    pub fn display_name(&self) -> String {
        let value = self.value.trim();
        if value.is_empty() {
            return "(empty)".to_string();
        }
        if value.chars().count() <= MAX_DISPLAY_NAME_LEN {
            return value.to_string();
        }
        let head: String = value.chars().take(TRUNCATED_NAME_LEN).collect();
        format!("{head}...")
    }
}

/// Identity of one executor: what to run and under which framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub framework_id: FrameworkId,
    pub name: String,
    pub command: CommandInfo,
    /// Resources reserved for the executor itself, on top of its tasks.
    #[serde(default)]
    pub resources: Resources,
}

#[cfg(test)]
#[path = "info_tests.rs"]
mod tests;
