// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::sandbox::{is_ignored_dir, Workspace};
use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_DEPTH: usize = 2;

pub struct ListFilesTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories under a path (default: project root), two levels \
         deep. Directories are suffixed with '/'. Build folders and node_modules are \
         skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the project root (default: root)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let raw = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let base = match self.workspace.resolve(raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        if !base.is_dir() {
            return ToolOutput::err(&call.id, format!("{raw} is not a directory"));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&base)
            .min_depth(1)
            .max_depth(MAX_DEPTH)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir() && is_ignored_dir(&e.file_name().to_string_lossy()))
            })
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let mut rel = self.workspace.rel_display(entry.path());
            if entry.file_type().is_dir() {
                rel.push('/');
            }
            entries.push(rel);
        }
        entries.sort();

        if entries.is_empty() {
            return ToolOutput::ok(&call.id, "(empty)");
        }
        ToolOutput::ok(&call.id, entries.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
