// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use tandem_core::{build_repo_map, TaskTool};
use tandem_gateway::GatewayState;
use tandem_model::{BedrockProvider, ModelProvider, ScriptedProvider};
use tandem_tools::{standard_registry, PreviewManager, ReadTracker, Workspace};

/// Per-participant pair-coding backend.  One process per participant: the
/// control plane launches it with a writable project directory and network
/// access to the model provider, and routes the participant's WebSocket here.
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project root override (also: TANDEM_PROJECT_ROOT)
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Listen port override (also: TANDEM_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when RUST_LOG is not set (e.g. "debug", "tandem_core=trace")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = tandem_config::load(cli.config.as_deref())?;
    config.apply_overrides(|key| std::env::var(key).ok());
    if let Some(root) = cli.project_root {
        config.project.root = root;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;
    let config = Arc::new(config);

    tokio::fs::create_dir_all(&config.project.root)
        .await
        .with_context(|| format!("creating project root {}", config.project.root.display()))?;
    let workspace = Arc::new(Workspace::new(&config.project.root)?);
    let reads = Arc::new(ReadTracker::default());
    let preview = Arc::new(PreviewManager::new(
        config.preview.command.clone(),
        config.preview.args.clone(),
        config.preview.port,
        workspace.root().to_path_buf(),
    ));

    let model: Arc<dyn ModelProvider> = match config.model.provider.as_str() {
        "mock" => Arc::new(ScriptedProvider::new(Vec::new())),
        _ => Arc::new(BedrockProvider::new(
            config.resolved_model_id(),
            config.model.region.clone(),
        )),
    };
    info!(
        provider = %model.name(),
        model = %model.model_id(),
        project_root = %workspace.root().display(),
        "instance starting"
    );

    let repo_map: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));
    let registry = Arc::new_cyclic(|weak| {
        let mut reg = standard_registry(
            Arc::clone(&workspace),
            Arc::clone(&reads),
            Arc::clone(&preview),
            config.agent.bash_timeout_secs,
        );
        reg.register(TaskTool::new(
            Arc::clone(&model),
            weak.clone(),
            Arc::clone(&workspace),
            Arc::clone(&reads),
            Arc::clone(&config),
            Arc::clone(&repo_map),
        ));
        reg
    });

    // Initial repo map; sessions pick it up through the shared handle.
    let map = build_repo_map(workspace.root(), config.project.repo_map_char_budget);
    if !map.is_empty() {
        info!(chars = map.len(), "repo map built");
        *repo_map.write().unwrap() = Some(map);
    }

    let state = GatewayState::new(
        model,
        registry,
        workspace,
        reads,
        Arc::clone(&config),
        repo_map,
    );
    let result = tandem_gateway::serve(state).await;

    preview.stop().await;
    result
}

fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback.to_string()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
