// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port the WebSocket gateway listens on.  The upstream proxy strips
    /// the `/i/<instance-id>` prefix before requests arrive here.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.  The instance normally sits behind a load balancer, so
    /// binding all interfaces is the expected deployment.
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "bedrock" (default) or "mock" for offline runs.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Explicit Bedrock model id (cross-region inference profile id).
    /// When unset, the id is derived from the AWS region prefix — see
    /// [`model_id_for_region`].  The `BEDROCK_MODEL_ID` environment variable
    /// overrides both.
    pub model_id: Option<String>,
    /// AWS region override (also honoured via AWS_REGION / AWS_DEFAULT_REGION).
    pub region: Option<String>,
    /// Maximum output tokens per completion.  Must exceed `reasoning_budget`.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Extended-reasoning token budget.  Set to 0 to disable reasoning.
    #[serde(default = "default_reasoning_budget")]
    pub reasoning_budget: u32,
    /// Sampling temperature.  Anthropic models require 1.0 when extended
    /// reasoning is enabled.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model↔tool iterations per user turn before the turn fails
    /// with `IterationLimitExceeded`.
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: u32,
    /// Maximum `task` sub-agent nesting depth.
    #[serde(default = "default_subagent_depth")]
    pub subagent_depth: usize,
    /// Character cap applied to a single tool result before it enters the
    /// conversation history.
    #[serde(default = "default_tool_output_cap")]
    pub tool_output_cap: usize,
    /// Execution timeout for the `bash` tool, in seconds.
    #[serde(default = "default_bash_timeout_secs")]
    pub bash_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Absolute path of the sandboxed project directory.  Created by the
    /// control plane before the instance starts; every tool path must
    /// canonicalize into it.
    #[serde(default = "default_project_root")]
    pub root: PathBuf,
    /// Directory depth for the mtime snapshot taken around each turn.
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
    /// Character budget for the repo-map section of the system prompt.
    #[serde(default = "default_repo_map_char_budget")]
    pub repo_map_char_budget: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Fixed port the auxiliary dev-server child listens on (exported as
    /// PORT to the child).
    #[serde(default = "default_preview_port")]
    pub port: u16,
    /// Program spawned by `restart_preview`.
    #[serde(default = "default_preview_command")]
    pub command: String,
    /// Arguments for the preview program.
    #[serde(default = "default_preview_args")]
    pub args: Vec<String>,
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_provider() -> String {
    "bedrock".into()
}
fn default_max_output_tokens() -> u32 {
    16_384
}
fn default_reasoning_budget() -> u32 {
    8_192
}
fn default_temperature() -> f32 {
    1.0
}
fn default_iteration_limit() -> u32 {
    30
}
fn default_subagent_depth() -> usize {
    3
}
fn default_tool_output_cap() -> usize {
    100_000
}
fn default_bash_timeout_secs() -> u64 {
    60
}
fn default_project_root() -> PathBuf {
    PathBuf::from("/home/workspace/project")
}
fn default_snapshot_depth() -> usize {
    4
}
fn default_repo_map_char_budget() -> usize {
    16_000
}
fn default_preview_port() -> u16 {
    3000
}
fn default_preview_command() -> String {
    "npm".into()
}
fn default_preview_args() -> Vec<String> {
    vec!["run".into(), "dev".into()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: None,
            region: None,
            max_output_tokens: default_max_output_tokens(),
            reasoning_budget: default_reasoning_budget(),
            temperature: default_temperature(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            iteration_limit: default_iteration_limit(),
            subagent_depth: default_subagent_depth(),
            tool_output_cap: default_tool_output_cap(),
            bash_timeout_secs: default_bash_timeout_secs(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_project_root(),
            snapshot_depth: default_snapshot_depth(),
            repo_map_char_budget: default_repo_map_char_budget(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            port: default_preview_port(),
            command: default_preview_command(),
            args: default_preview_args(),
        }
    }
}

/// Map an AWS region to the matching cross-region inference-profile model id.
///
/// Bedrock inference profiles are prefixed by geography: `apac.` for
/// Asia-Pacific regions, `eu.` for European regions, and `us.` for everything
/// else (including GovCloud fallback).
pub fn model_id_for_region(region: &str) -> String {
    let prefix = if region.starts_with("ap-") {
        "apac"
    } else if region.starts_with("eu-") {
        "eu"
    } else {
        "us"
    };
    format!("{prefix}.anthropic.claude-sonnet-4-20250514-v1:0")
}

impl Config {
    /// Apply environment overrides using the supplied lookup function.
    ///
    /// The indirection keeps this testable without mutating process-global
    /// environment state; the binary passes `std::env::var(..).ok()`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(region) = var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")) {
            self.model.region = Some(region);
        }
        if let Some(id) = var("BEDROCK_MODEL_ID") {
            self.model.model_id = Some(id);
        }
        if let Some(port) = var("TANDEM_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(root) = var("TANDEM_PROJECT_ROOT") {
            let expanded = shellexpand::tilde(&root).into_owned();
            self.project.root = PathBuf::from(expanded);
        }
    }

    /// The model id actually sent to Bedrock: explicit override first,
    /// region-derived profile id otherwise.
    pub fn resolved_model_id(&self) -> String {
        if let Some(id) = &self.model.model_id {
            return id.clone();
        }
        let region = self.model.region.as_deref().unwrap_or("us-east-1");
        model_id_for_region(region)
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.reasoning_budget > 0
            && self.model.max_output_tokens <= self.model.reasoning_budget
        {
            anyhow::bail!(
                "model.max_output_tokens ({}) must exceed model.reasoning_budget ({})",
                self.model.max_output_tokens,
                self.model.reasoning_budget
            );
        }
        if self.agent.iteration_limit == 0 {
            anyhow::bail!("agent.iteration_limit must be at least 1");
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
