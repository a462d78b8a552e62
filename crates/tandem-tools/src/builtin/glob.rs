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

const MAX_RESULTS: usize = 500;

pub struct GlobTool {
    pub workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files whose project-relative path matches a glob pattern. Supports '*' \
         (within one path segment), '**' (across segments) and '?'. Examples: \
         'src/**/*.tsx', '*.json'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern matched against project-relative paths"
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
        let re = match glob_to_regex(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("bad glob pattern: {e}")),
        };

        let mut results = Vec::new();
        for entry in WalkDir::new(self.workspace.root())
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
            let rel = self.workspace.rel_display(entry.path());
            if re.is_match(&rel) {
                results.push(rel);
                if results.len() >= MAX_RESULTS {
                    break;
                }
            }
        }
        results.sort();

        if results.is_empty() {
            return ToolOutput::ok(&call.id, "(no matches)");
        }
        ToolOutput::ok(&call.id, results.join("\n"))
    }
}

/// Compile a glob pattern into an anchored regex over forward-slash paths.
///
/// `**` matches across path segments (including none), `*` within one
/// segment, `?` a single non-separator character.
fn glob_to_regex(pattern: &str) -> anyhow::Result<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following '/' so "a/**/b" also matches "a/b".
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:[^/]+/)*");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            other => re.push(other),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
