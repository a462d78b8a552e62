// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::sandbox::Workspace;
use crate::tool::{Tool, ToolCall, ToolOutput};

const OUTPUT_LIMIT: usize = 100_000;

/// Marker the trailing reporter prints so the tool can recover the shell's
/// final working directory.  `cd` inside a command therefore persists into
/// the next call.
const CWD_MARKER: &str = "__TANDEM_CWD__";

pub struct BashTool {
    /// Working directory carried across calls within the session.
    cwd: Mutex<PathBuf>,
    timeout_secs: u64,
}

impl BashTool {
    pub fn new(workspace: Arc<Workspace>, timeout_secs: u64) -> Self {
        Self {
            cwd: Mutex::new(workspace.root().to_path_buf()),
            timeout_secs,
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory. The working directory persists \
         across calls: 'cd sub && pwd' here means later commands also run in 'sub'. \
         DO NOT use it for file operations — use read_file / write_file / edit_file / \
         search_files instead. Non-zero exit codes are reported in the output. \
         Avoid starting long-running servers; use restart_preview for the dev server."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'command'"),
        };

        // Hold the cwd lock across the whole execution so concurrent calls
        // cannot interleave their directory state.
        let mut cwd = self.cwd.lock().await;
        debug!(cmd = %command, cwd = %cwd.display(), "bash tool");

        // The user command runs first; its exit status is preserved while a
        // trailing reporter prints the final working directory on its own line.
        let script = format!(
            "{command}\n__tandem_status=$?\nprintf '\\n{CWD_MARKER}%s\\n' \"$PWD\"\nexit $__tandem_status\n"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&script)
            .current_dir(&*cwd)
            .stdin(std::process::Stdio::null());

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await;

        let output = match result {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => {
                return ToolOutput::err(
                    &call.id,
                    format!("timeout after {}s", self.timeout_secs),
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let (stdout, reported_cwd) = strip_cwd_marker(&stdout);
        if let Some(dir) = reported_cwd {
            let path = PathBuf::from(dir);
            if path.is_dir() {
                *cwd = path;
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut content = String::new();
        if !stdout.is_empty() {
            content.push_str(&truncate(&stdout, OUTPUT_LIMIT));
        }
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&truncate(&stderr, OUTPUT_LIMIT));
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("[exit {code}]"));
        }

        // Failed commands are still ordinary results — the model reads the
        // exit code from the output and recovers.
        ToolOutput::ok_json(&call.id, json!({ "output": content }))
    }
}

/// Split the trailing cwd-reporter line out of the command output.
fn strip_cwd_marker(stdout: &str) -> (String, Option<String>) {
    match stdout.rfind(CWD_MARKER) {
        Some(pos) => {
            let dir = stdout[pos + CWD_MARKER.len()..].trim().to_string();
            let mut head = stdout[..pos].to_string();
            // Drop the newline the reporter printed before the marker.
            if head.ends_with('\n') {
                head.pop();
            }
            (head, Some(dir))
        }
        None => (stdout.to_string(), None),
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated {} bytes]", &s[..end], s.len() - end)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, BashTool) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Arc::new(Workspace::new(dir.path()).unwrap());
        (dir, BashTool::new(workspace, 10))
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "b1".into(),
            name: "bash".into(),
            args,
        }
    }

    fn output_of(out: &ToolOutput) -> String {
        let v: Value = serde_json::from_str(&out.content).unwrap();
        v["output"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn echo_returns_stdout_in_output_field() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({"command": "echo hello"}))).await;
        assert!(!out.is_error);
        assert_eq!(output_of(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn cwd_persists_across_calls() {
        let (dir, tool) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let first = tool.execute(&call(json!({"command": "cd sub && pwd"}))).await;
        let first_pwd = output_of(&first).trim().to_string();
        let second = tool.execute(&call(json!({"command": "pwd"}))).await;
        let second_pwd = output_of(&second).trim().to_string();

        assert_eq!(first_pwd, second_pwd);
        assert!(second_pwd.ends_with("sub"), "got: {second_pwd}");
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_in_output_not_error() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({"command": "exit 3"}))).await;
        assert!(!out.is_error, "non-zero exit must not be a tool error");
        assert!(output_of(&out).contains("[exit 3]"));
    }

    #[tokio::test]
    async fn failed_command_does_not_move_cwd() {
        let (_dir, tool) = setup();
        let before = output_of(&tool.execute(&call(json!({"command": "pwd"}))).await);
        let _ = tool
            .execute(&call(json!({"command": "cd /nonexistent_dir_xyz"})))
            .await;
        let after = output_of(&tool.execute(&call(json!({"command": "pwd"}))).await);
        assert_eq!(before.trim(), after.trim());
    }

    #[tokio::test]
    async fn stderr_is_labelled() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({"command": "echo oops >&2"}))).await;
        let text = output_of(&out);
        assert!(text.contains("[stderr]"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Arc::new(Workspace::new(dir.path()).unwrap());
        let tool = BashTool::new(workspace, 1);
        let out = tool.execute(&call(json!({"command": "sleep 30"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({}))).await;
        assert!(out.is_error);
    }

    #[test]
    fn strip_cwd_marker_extracts_directory() {
        let (head, cwd) = strip_cwd_marker("hello\n__TANDEM_CWD__/tmp/project\n");
        assert_eq!(head, "hello");
        assert_eq!(cwd.as_deref(), Some("/tmp/project"));
    }

    #[test]
    fn strip_cwd_marker_without_marker_is_passthrough() {
        let (head, cwd) = strip_cwd_marker("plain output");
        assert_eq!(head, "plain output");
        assert!(cwd.is_none());
    }
}
