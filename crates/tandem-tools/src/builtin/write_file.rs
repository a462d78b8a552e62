// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::{ReadTracker, Workspace};
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct WriteFileTool {
    pub workspace: Arc<Workspace>,
    pub reads: Arc<ReadTracker>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file to the project, overwriting any existing content. Creates parent \
         directories automatically. Overwriting an existing file requires a read_file of \
         that path earlier in the same turn. ALWAYS prefer edit_file for small changes \
         to existing files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path of the file"
                },
                "content": {
                    "type": "string",
                    "description": "Complete new content of the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => {
                let args_preview =
                    serde_json::to_string(&call.args).unwrap_or_else(|_| "null".to_string());
                return ToolOutput::err(
                    &call.id,
                    format!("missing required parameter 'path'. Received: {args_preview}"),
                );
            }
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                return ToolOutput::err(
                    &call.id,
                    "missing required parameter 'content'. This usually means the arguments \
                     were truncated because the content was too large for one generation.",
                )
            }
        };

        let resolved = match self.workspace.resolve(&path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        // Read-before-write: overwriting a file the agent has never looked at
        // this turn is the classic wrong-file failure mode.  New files are
        // exempt.
        if resolved.exists() && !self.reads.was_read(&resolved) {
            return ToolOutput::err(
                &call.id,
                format!("{path} already exists; read_file it first before overwriting"),
            );
        }

        debug!(path = %resolved.display(), bytes = content.len(), "write_file tool");

        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(&call.id, format!("cannot create parent dirs: {e}"));
                }
            }
        }

        match tokio::fs::write(&resolved, &content).await {
            Ok(_) => ToolOutput::ok_json(
                &call.id,
                json!({
                    "status": "ok",
                    "path": self.workspace.rel_display(&resolved),
                    "bytes": content.len(),
                }),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, WriteFileTool) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Arc::new(Workspace::new(dir.path()).unwrap());
        let tool = WriteFileTool {
            workspace,
            reads: Arc::new(ReadTracker::default()),
        };
        (dir, tool)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "w1".into(),
            name: "write_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn creates_new_file_and_reports_bytes() {
        let (dir, tool) = setup();
        let out = tool
            .execute(&call(json!({"path": "hello.txt", "content": "Hi"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["path"], "hello.txt");
        assert_eq!(v["bytes"], 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "Hi"
        );
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let (dir, tool) = setup();
        let out = tool
            .execute(&call(json!({"path": "src/components/App.tsx", "content": "x"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(dir.path().join("src/components/App.tsx").exists());
    }

    #[tokio::test]
    async fn overwrite_without_prior_read_is_rejected() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let out = tool
            .execute(&call(json!({"path": "a.txt", "content": "new"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("read_file it first"));
        // File untouched.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "old"
        );
    }

    #[tokio::test]
    async fn overwrite_after_read_succeeds() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let resolved = tool.workspace.resolve("a.txt").unwrap();
        tool.reads.record(&resolved);
        let out = tool
            .execute(&call(json!({"path": "a.txt", "content": "new"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn path_escape_blocked() {
        let (_dir, tool) = setup();
        let out = tool
            .execute(&call(json!({"path": "../evil.txt", "content": "x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("Path traversal blocked"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips_modulo_line_numbers() {
        use crate::builtin::ReadFileTool;

        let (_dir, tool) = setup();
        tool.execute(&call(json!({"path": "r.txt", "content": "alpha\nbeta"})))
            .await;
        let reader = ReadFileTool {
            workspace: Arc::clone(&tool.workspace),
            reads: Arc::clone(&tool.reads),
        };
        let out = reader
            .execute(&ToolCall {
                id: "r1".into(),
                name: "read_file".into(),
                args: json!({"path": "r.txt"}),
            })
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "1\talpha\n2\tbeta\n");
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({"path": "a.txt"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("content"));
    }
}
