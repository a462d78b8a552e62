// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::sandbox::{is_ignored_dir, Workspace};
use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_MATCHES: usize = 200;

pub struct SearchFilesTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search project files with a regular expression. Returns matches as \
         'path:line_number: line'. node_modules, .git and build output are skipped. \
         Use this to find where something is defined before editing it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search, relative to the project root (default: root)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'pattern'"),
        };
        let re = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid regex: {e}")),
        };
        let raw = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let base = match self.workspace.resolve(raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        'walk: for entry in WalkDir::new(&base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir() && is_ignored_dir(&e.file_name().to_string_lossy()))
            })
            .flatten()
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let text = match tokio::fs::read_to_string(entry.path()).await {
                Ok(t) => t,
                Err(_) => continue, // binary or unreadable — skip
            };
            let rel = self.workspace.rel_display(entry.path());
            for (lineno, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{rel}:{}: {line}", lineno + 1));
                    if matches.len() >= MAX_MATCHES {
                        truncated = true;
                        break 'walk;
                    }
                }
            }
        }

        if matches.is_empty() {
            return ToolOutput::ok(
                &call.id,
                format!("No matches found for pattern: {pattern}"),
            );
        }
        let mut out = matches.join("\n");
        if truncated {
            out.push_str(&format!(
                "\n...[showing first {MAX_MATCHES} matches — narrow the pattern or path]"
            ));
        }
        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
