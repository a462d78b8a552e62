// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One typed segment of a conversation message.
///
/// An assistant message is an ordered list of these; the order in which the
/// model emitted them must be preserved when the message is replayed as
/// history.  `Reasoning.signature` is an opaque integrity token — providers
/// reject replayed reasoning blocks whose signature was dropped, so it is
/// stored verbatim and sent back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        /// Decoded JSON argument object.
        input: Value,
    },
    ToolResult {
        /// Matches the `id` of the `ToolUse` block being answered.
        id: String,
        content: String,
    },
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: blocks,
        }
    }

    /// A user message whose content is an ordered list of tool results.
    pub fn tool_results(results: Vec<(String, String)>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|(id, content)| ContentBlock::ToolResult { id, content })
                .collect(),
        }
    }

    /// All text segments of this message, concatenated in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Iterate over the tool-use blocks of this message, in emission order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

// ─── Tool schema ─────────────────────────────────────────────────────────────

/// A tool descriptor exposed to the model.  The set is fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object
    pub parameters: Value,
}

// ─── Completion request ──────────────────────────────────────────────────────

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt (capability preamble + optional repo-map section).
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Hard output-token ceiling.  Must exceed `reasoning_budget`.
    pub max_output_tokens: u32,
    /// Extended-reasoning token budget; 0 disables reasoning.
    pub reasoning_budget: u32,
    pub temperature: f32,
}

// ─── Stream events ───────────────────────────────────────────────────────────

/// Terminal stop reason reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl StopReason {
    pub fn parse(s: &str) -> Self {
        match s {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A single decoded event from the model stream.
///
/// Mirrors the Converse stream: tool-use blocks announce themselves with a
/// `BlockStart` carrying id and name; text and reasoning blocks open
/// implicitly with their first delta.  Every open block is closed by a
/// `BlockStop` for its index, and the message ends with `MessageStop`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A tool-use content block opened (id and name arrive up front; the
    /// input JSON follows as `InputJsonDelta` fragments).
    BlockStart {
        index: u32,
        tool_use_id: String,
        name: String,
    },
    /// Assistant prose delta.
    TextDelta { index: u32, text: String },
    /// Reasoning ("thinking") text delta.
    ReasoningDelta { index: u32, text: String },
    /// Opaque reasoning signature fragment; may arrive after the reasoning
    /// text and must be attached to the finalized block.
    ReasoningSignatureDelta { index: u32, signature: String },
    /// Verbatim fragment of a tool-use input JSON document.
    InputJsonDelta { index: u32, partial_json: String },
    /// The block at `index` is complete.
    BlockStop { index: u32 },
    /// The message is complete.
    MessageStop { stop_reason: StopReason },
    /// Final token accounting for the turn.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
