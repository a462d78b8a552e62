// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::Workspace;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct EditFileTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of old_string with new_string in a file. old_string must \
         match the file contents exactly once — include enough surrounding lines to make \
         it unique. This is the safety mechanism against editing the wrong site."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path of the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let old_string = match call.args.get("old_string").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'old_string'"),
        };
        let new_string = match call.args.get("new_string").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'new_string'"),
        };
        if old_string.is_empty() {
            return ToolOutput::err(&call.id, "old_string must not be empty");
        }

        let resolved = match self.workspace.resolve(&path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot read {path}: {e}")),
        };

        let occurrences = text.matches(&old_string).count();
        match occurrences {
            0 => {
                return ToolOutput::err(
                    &call.id,
                    format!("old_string not found in {path}; read the file again and retry"),
                )
            }
            1 => {}
            n => {
                return ToolOutput::err(
                    &call.id,
                    format!(
                        "old_string occurs {n} times in {path}; it must be unique — \
                         include more surrounding context to disambiguate"
                    ),
                )
            }
        }

        debug!(path = %resolved.display(), "edit_file tool");

        let updated = text.replacen(&old_string, &new_string, 1);
        match tokio::fs::write(&resolved, &updated).await {
            Ok(_) => ToolOutput::ok_json(
                &call.id,
                json!({
                    "status": "ok",
                    "path": self.workspace.rel_display(&resolved),
                    "replacements": 1,
                }),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
