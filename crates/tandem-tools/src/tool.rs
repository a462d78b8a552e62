// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// `content` is the string handed back to the model: either a plain text
/// result, a serialized JSON object for structured results, or the
/// `{"error": "..."}` shape on failure.  The loop forwards it unchanged.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// True when the tool failed non-fatally and `content` is an error JSON.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Successful structured result, serialized as a JSON object.
    pub fn ok_json(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            content: value.to_string(),
            is_error: false,
        }
    }

    /// Error result, serialized as `{"error": "<message>"}`.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: json!({ "error": msg.into() }).to_string(),
            is_error: true,
        }
    }
}

/// Trait that every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input object
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are wrapped in [`ToolOutput::err`], never
    /// returned as `Err` — tool errors are data for the model to recover from.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
