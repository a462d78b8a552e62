use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use tandem_config::Config;
use tandem_model::ModelProvider;
use tandem_tools::{ReadTracker, Tool, ToolCall, ToolOutput, ToolRegistry, Workspace};

use crate::agent::AgentLoop;
use crate::events::AgentEvent;

/// Spawns a nested [`AgentLoop`] that shares the parent's tool registry and
/// repo map but runs on its own conversation history.  The child's combined
/// text output becomes the tool result; its thinking/tool events are consumed
/// here and never reach the client.
///
/// The registry the tool lives in is referenced weakly — it is the same
/// registry handed to sub-agents, which is what lets `task` recurse up to the
/// depth bound.
pub struct TaskTool {
    model: Arc<dyn ModelProvider>,
    registry: Weak<ToolRegistry>,
    workspace: Arc<Workspace>,
    reads: Arc<ReadTracker>,
    config: Arc<Config>,
    repo_map: Arc<RwLock<Option<String>>>,
    depth: Arc<AtomicUsize>,
}

impl TaskTool {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        registry: Weak<ToolRegistry>,
        workspace: Arc<Workspace>,
        reads: Arc<ReadTracker>,
        config: Arc<Config>,
        repo_map: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            model,
            registry,
            workspace,
            reads,
            config,
            repo_map,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Decrements the shared depth counter on every exit path.
struct DepthGuard(Arc<AtomicUsize>);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text output. \
         Useful for delegating isolated sub-tasks (research, multi-file refactors). The \
         sub-agent has the same tools but its own conversation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'prompt'"),
        };

        let max_depth = self.config.agent.subagent_depth;
        let current = self.depth.load(Ordering::Relaxed);
        if current >= max_depth {
            return ToolOutput::err(
                &call.id,
                format!("Sub-agent error: maximum nesting depth ({max_depth}) reached"),
            );
        }
        let Some(registry) = self.registry.upgrade() else {
            return ToolOutput::err(&call.id, "Sub-agent error: tool registry shut down");
        };

        self.depth.fetch_add(1, Ordering::Relaxed);
        let _guard = DepthGuard(Arc::clone(&self.depth));
        debug!(depth = current + 1, "task: spawning sub-agent");

        let mut child = AgentLoop::subagent(
            Arc::clone(&self.model),
            registry,
            Arc::clone(&self.workspace),
            Arc::clone(&self.reads),
            Arc::clone(&self.config),
            Arc::clone(&self.repo_map),
        );

        // Drain the child's events concurrently: only finalized text is kept,
        // nothing is forwarded to the parent's client.
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
        let collector = tokio::spawn(async move {
            let mut texts: Vec<String> = Vec::new();
            while let Some(event) = rx.recv().await {
                if let AgentEvent::TextComplete(text) = event {
                    texts.push(text);
                }
            }
            texts
        });

        let run = child.process_message(&prompt, tx).await;
        let texts = collector.await.unwrap_or_default();

        match run {
            Ok(()) if texts.is_empty() => {
                ToolOutput::err(&call.id, "Sub-agent failed: produced no text output")
            }
            Ok(()) => ToolOutput::ok(&call.id, texts.join("\n\n")),
            Err(e) => ToolOutput::err(&call.id, format!("Sub-agent error: {e}")),
        }
    }
}
