// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::{ReadTracker, Workspace};
use crate::tool::{Tool, ToolCall, ToolOutput};

const READ_LIMIT: usize = 200_000;

pub struct ReadFileTool {
    pub workspace: Arc<Workspace>,
    pub reads: Arc<ReadTracker>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project. Returns the contents with 1-indexed line numbers \
         in the format 'N<TAB>line'. Always read a file before editing or overwriting it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path of the file to read"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let resolved = match self.workspace.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        debug!(path = %resolved.display(), "read_file tool");

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot read {path}: {e}")),
        };
        if looks_binary(&bytes) {
            return ToolOutput::err(&call.id, format!("{path} is a binary file"));
        }
        let text = String::from_utf8_lossy(&bytes);

        self.reads.record(&resolved);

        let mut out = String::with_capacity(text.len() + 64);
        for (i, line) in text.lines().enumerate() {
            out.push_str(&format!("{}\t{}\n", i + 1, line));
            if out.len() > READ_LIMIT {
                out.push_str("...[truncated]");
                break;
            }
        }
        ToolOutput::ok(&call.id, out)
    }
}

/// Heuristic binary detection: a NUL byte in the leading window.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
