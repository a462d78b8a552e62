// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire protocol between the browser client and the gateway.
//!
//! UTF-8 JSON objects over WebSocket text frames, tagged by `type`.  The
//! upstream proxy strips the `/i/<instance-id>` path prefix before frames
//! arrive here, so the protocol itself is instance-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tandem_core::AgentEvent;

// ── Client → gateway ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a new agent turn.  Rejected with `error{"Agent is busy"}` while
    /// a turn is active.
    Chat { message: String },
    /// Cancel the active turn (best effort; in-flight tools finish).
    Cancel,
    /// Clear the conversation history.  Only allowed while idle.
    Reset,
    /// The participant clicked an element in the live preview; the gateway
    /// answers with a pre-filled prompt.
    ElementClick {
        #[serde(rename = "tagName")]
        tag_name: String,
        #[serde(rename = "textContent")]
        text_content: String,
        selector: String,
    },
    /// The live preview surfaced a runtime error; the gateway may dispatch an
    /// auto-fix turn, rate-limited.
    PreviewError { error: String },
}

// ── Gateway → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "agent:thinking")]
    Thinking { text: String },
    #[serde(rename = "agent:text")]
    Text { content: String },
    #[serde(rename = "agent:tool_call")]
    ToolCall {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "agent:tool_result")]
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        name: String,
        result: String,
    },
    #[serde(rename = "agent:file_changed")]
    FileChanged {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    #[serde(rename = "agent:done")]
    Done,
    #[serde(rename = "prefill")]
    Prefill { message: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// Map a core agent event to its wire form.  `Aborted` maps to nothing:
    /// a cancelled turn sends no further frames, and in particular no
    /// `agent:done`.
    pub fn from_agent(event: AgentEvent) -> Option<Self> {
        match event {
            AgentEvent::ThinkingDelta(text) => Some(Self::Thinking { text }),
            AgentEvent::TextComplete(content) => Some(Self::Text { content }),
            AgentEvent::ToolCallStarted { id, name, input } => Some(Self::ToolCall {
                tool_use_id: id,
                name,
                input,
            }),
            AgentEvent::ToolCallFinished {
                id, name, result, ..
            } => Some(Self::ToolResult {
                tool_use_id: id,
                name,
                result,
            }),
            AgentEvent::FileChanged { path, content } => {
                Some(Self::FileChanged { path, content })
            }
            AgentEvent::TurnComplete => Some(Self::Done),
            AgentEvent::Aborted => None,
        }
    }
}

/// Synthesize the pre-filled prompt for an `element_click`.
pub fn prefill_for_click(tag_name: &str, text_content: &str, selector: &str) -> String {
    let tag = tag_name.to_lowercase();
    let trimmed = text_content.trim();
    if trimmed.is_empty() {
        format!("Update the <{tag}> element (selector: {selector}): ")
    } else {
        let preview: String = trimmed.chars().take(60).collect();
        format!("Update the <{tag}> element containing \"{preview}\" (selector: {selector}): ")
    }
}

/// Prompt dispatched automatically when the preview reports a runtime error.
pub fn fix_prompt(error: &str) -> String {
    format!(
        "The live preview is showing an error:\n\n{error}\n\nPlease find the cause and fix it."
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
