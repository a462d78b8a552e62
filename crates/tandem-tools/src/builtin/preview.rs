// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Grace period between SIGTERM and SIGKILL when replacing the child.
const TERM_GRACE: Duration = Duration::from_secs(3);

/// Single-slot owner of the auxiliary preview dev-server.
///
/// Lifecycle is a small state machine — none / starting / running / stopping —
/// where the transitional states exist only while the slot mutex is held, so
/// concurrent `restart_preview` calls serialize instead of racing the child.
pub struct PreviewManager {
    command: String,
    args: Vec<String>,
    port: u16,
    workdir: PathBuf,
    slot: Mutex<Option<Child>>,
}

impl PreviewManager {
    pub fn new(command: String, args: Vec<String>, port: u16, workdir: PathBuf) -> Self {
        Self {
            command,
            args,
            port,
            workdir,
            slot: Mutex::new(None),
        }
    }

    /// Terminate any running child, then spawn a fresh one on the fixed port.
    /// Returns the new child's pid.
    pub async fn restart(&self) -> anyhow::Result<u32> {
        let mut slot = self.slot.lock().await;

        if let Some(child) = slot.take() {
            terminate(child).await;
        }

        debug!(command = %self.command, port = self.port, "starting preview child");
        let child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.workdir)
            .env("PORT", self.port.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id().unwrap_or(0);
        *slot = Some(child);
        Ok(pid)
    }

    /// Stop the child if one is running.  Used at instance shutdown.
    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(child) = slot.take() {
            terminate(child).await;
        }
    }

    /// Pid of the running child, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.slot.lock().await.as_ref().and_then(|c| c.id())
    }
}

/// SIGTERM first; escalate to SIGKILL after the grace period.
async fn terminate(mut child: Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(TERM_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("preview child ignored SIGTERM; sending SIGKILL");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

pub struct RestartPreviewTool {
    pub manager: Arc<PreviewManager>,
}

#[async_trait]
impl Tool for RestartPreviewTool {
    fn name(&self) -> &str {
        "restart_preview"
    }

    fn description(&self) -> &str {
        "Restart the live-preview dev server. Use after dependency changes or when the \
         preview stops responding; file edits are picked up automatically and do not \
         need a restart."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.manager.restart().await {
            Ok(pid) => ToolOutput::ok_json(&call.id, json!({ "status": "restarted", "pid": pid })),
            Err(e) => ToolOutput::err(&call.id, format!("preview restart failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
