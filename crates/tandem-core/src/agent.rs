// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use tandem_config::Config;
use tandem_model::{
    CompletionRequest, ContentBlock, Message, ModelProvider, StopReason, ToolSchema,
};
use tandem_tools::{ReadTracker, ToolCall, ToolRegistry, Workspace};

use crate::{
    changes::ChangeSnapshot,
    decode::{DecodeSignal, TurnCollector},
    error::AgentError,
    events::AgentEvent,
    prompts::system_prompt,
};

/// Tools whose success mutates a project file.  Their `file_changed` events
/// are emitted tool-side, right after the tool result; everything else is
/// caught by the end-of-turn snapshot diff.
const FILE_MUTATING_TOOLS: &[&str] = &["write_file", "edit_file"];

/// The agent loop.  Owns one conversation history and drives the
/// model ↔ tool cycle for it.
pub struct AgentLoop {
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    workspace: Arc<Workspace>,
    reads: Arc<ReadTracker>,
    config: Arc<Config>,
    /// Shared with the `task` tool so sub-agents see the current repo map.
    repo_map: Arc<RwLock<Option<String>>>,
    history: Vec<Message>,
    /// Top-level loops reset read tracking at turn start; sub-agents run
    /// inside the parent's turn and must leave it alone.
    resets_read_tracking: bool,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        workspace: Arc<Workspace>,
        reads: Arc<ReadTracker>,
        config: Arc<Config>,
        repo_map: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            model,
            tools,
            workspace,
            reads,
            config,
            repo_map,
            history: Vec::new(),
            resets_read_tracking: true,
        }
    }

    /// Construct the loop for a `task` sub-agent: same tools and repo map,
    /// fresh history, no read-tracking reset.
    pub fn subagent(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        workspace: Arc<Workspace>,
        reads: Arc<ReadTracker>,
        config: Arc<Config>,
        repo_map: Arc<RwLock<Option<String>>>,
    ) -> Self {
        let mut loop_ = Self::new(model, tools, workspace, reads, config, repo_map);
        loop_.resets_read_tracking = false;
        loop_
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Clear the conversation.  The gateway only calls this while idle.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Replace the repo-map fragment of the system prompt.  Takes effect on
    /// the next model call, including in running sub-agents.
    pub fn update_repo_map(&self, summary: Option<String>) {
        *self.repo_map.write().unwrap() = summary;
    }

    /// Process one user turn without external cancellation.
    pub async fn process_message(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), AgentError> {
        // The sender half lives for the whole call, so the receiver never
        // observes a cancel.
        let (_keep_alive, mut never) = oneshot::channel::<()>();
        self.process_with_cancel(user_text, tx, &mut never).await
    }

    /// Process one user turn.  Dropping or firing the paired sender aborts
    /// the model stream at its next read; the in-flight tool (if any)
    /// finishes naturally, and the partially-assembled assistant message is
    /// discarded so the ToolUse↔ToolResult pairing invariant holds.
    pub async fn process_with_cancel(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(), AgentError> {
        if self.resets_read_tracking {
            self.reads.reset();
        }
        let snapshot = ChangeSnapshot::capture(
            self.workspace.root(),
            self.config.project.snapshot_depth,
        );
        // Paths already reported tool-side this turn; the snapshot diff
        // must not report them again.
        let mut reported: HashSet<String> = HashSet::new();

        self.history.push(Message::user(user_text));

        let limit = self.config.agent.iteration_limit;
        for round in 1..=limit {
            // Both an explicit cancel and a dropped sender abort the turn.
            if !matches!(
                cancel.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ) {
                let _ = tx.send(AgentEvent::Aborted).await;
                return Ok(());
            }

            let turn = tokio::select! {
                biased;
                _ = &mut *cancel => None,
                result = self.stream_one_turn(&tx) => Some(result),
            };

            let (blocks, stop_reason) = match turn {
                None => {
                    // Aborted mid-stream: the partial assistant message was
                    // never pushed, so history ends at the last complete one.
                    let _ = tx.send(AgentEvent::Aborted).await;
                    return Ok(());
                }
                Some(Err(e)) => return Err(AgentError::Model(e)),
                Some(Ok(t)) => t,
            };

            debug!(round, ?stop_reason, blocks = blocks.len(), "model turn assembled");

            if !blocks.is_empty() {
                self.history.push(Message::assistant(blocks.clone()));
            }

            let tool_uses: Vec<(String, String, serde_json::Value)> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if stop_reason == StopReason::ToolUse && !tool_uses.is_empty() {
                let mut results: Vec<(String, String)> = Vec::with_capacity(tool_uses.len());
                for (id, name, input) in tool_uses {
                    let _ = tx
                        .send(AgentEvent::ToolCallStarted {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        })
                        .await;

                    let started = std::time::Instant::now();
                    let output = self
                        .tools
                        .execute(&ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            args: input.clone(),
                        })
                        .await;
                    debug!(
                        tool = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        is_error = output.is_error,
                        "tool finished"
                    );

                    let _ = tx
                        .send(AgentEvent::ToolCallFinished {
                            id: id.clone(),
                            name: name.clone(),
                            result: output.content.clone(),
                            is_error: output.is_error,
                        })
                        .await;

                    if !output.is_error && FILE_MUTATING_TOOLS.contains(&name.as_str()) {
                        self.emit_file_changed(&tx, &name, &input, &mut reported)
                            .await;
                    }

                    let content = truncate_result(
                        &output.content,
                        self.config.agent.tool_output_cap,
                    );
                    results.push((id, content));
                }
                self.history.push(Message::tool_results(results));
                continue;
            }

            // Terminal turn: report indirect file changes, then finish.
            self.emit_snapshot_changes(&tx, &snapshot, &reported).await;
            let _ = tx.send(AgentEvent::TurnComplete).await;
            return Ok(());
        }

        warn!(limit, "iteration limit exceeded");
        Err(AgentError::IterationLimitExceeded(limit))
    }

    /// One streaming model call, decoded into content blocks.  Thinking and
    /// finalized-text signals are forwarded as they happen.
    async fn stream_one_turn(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<(Vec<ContentBlock>, StopReason)> {
        let tools: Vec<ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let req = CompletionRequest {
            system: self.system_prompt(),
            messages: self.history.clone(),
            tools,
            max_output_tokens: self.config.model.max_output_tokens,
            reasoning_budget: self.config.model.reasoning_budget,
            temperature: self.config.model.temperature,
        };

        let mut stream = self
            .model
            .converse(req)
            .await
            .context("model completion failed")?;

        let mut collector = TurnCollector::new();
        while let Some(event) = stream.next().await {
            let event = event.context("model stream failed")?;
            if let Some(signal) = collector.apply(event) {
                self.forward_signal(tx, signal).await;
            }
        }
        let (blocks, stop_reason, trailing) = collector.finish();
        if let Some(signal) = trailing {
            self.forward_signal(tx, signal).await;
        }
        Ok((blocks, stop_reason))
    }

    async fn forward_signal(&self, tx: &mpsc::Sender<AgentEvent>, signal: DecodeSignal) {
        match signal {
            DecodeSignal::Thinking(chunk) => {
                let _ = tx.send(AgentEvent::ThinkingDelta(chunk)).await;
            }
            DecodeSignal::TextFinal(text) => {
                let _ = tx.send(AgentEvent::TextComplete(text)).await;
            }
        }
    }

    /// Tool-driven change notification for `write_file` / `edit_file`.
    ///
    /// For `write_file` the emitted content is the string just written — no
    /// redundant disk read.  For `edit_file` the file is read back; a failed
    /// read emits the event with content absent.
    async fn emit_file_changed(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        tool: &str,
        input: &serde_json::Value,
        reported: &mut HashSet<String>,
    ) {
        let Some(raw_path) = input.get("path").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(resolved) = self.workspace.resolve(raw_path) else {
            return;
        };
        let rel = self.workspace.rel_display(&resolved);

        let content = if tool == "write_file" {
            input
                .get("content")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        } else {
            tokio::fs::read_to_string(&resolved).await.ok()
        };

        reported.insert(rel.clone());
        let _ = tx
            .send(AgentEvent::FileChanged { path: rel, content })
            .await;
    }

    /// Snapshot-driven change notification for everything the tool-driven
    /// path cannot see (bash, generators).  Unreadable paths emit an empty
    /// string per the snapshot contract.
    async fn emit_snapshot_changes(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        snapshot: &ChangeSnapshot,
        reported: &HashSet<String>,
    ) {
        let changed = snapshot.diff(self.workspace.root(), self.config.project.snapshot_depth);
        for path in changed {
            let rel = self.workspace.rel_display(&path);
            if reported.contains(&rel) {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .unwrap_or_default();
            let _ = tx
                .send(AgentEvent::FileChanged {
                    path: rel,
                    content: Some(content),
                })
                .await;
        }
    }

    fn system_prompt(&self) -> String {
        let map = self.repo_map.read().unwrap();
        system_prompt(map.as_deref())
    }
}

/// Cap a tool result before it enters the conversation history.
fn truncate_result(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated {} bytes]", &s[..end], s.len() - end)
}
