// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

/// Events emitted by the agent during a single turn.
/// The gateway subscribes to these and frames them for the client.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A streamed chunk of model output that is not yet final: reasoning
    /// deltas and in-progress assistant prose both surface here.
    ThinkingDelta(String),
    /// A finalized assistant text block (the full text, re-emitted once the
    /// block closes).
    TextComplete(String),
    /// The model requested a tool call.
    ToolCallStarted {
        id: String,
        name: String,
        input: Value,
    },
    /// A tool call finished; `result` is the string handed back to the model.
    ToolCallFinished {
        id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    /// A project file was created or updated.  `content` is absent when the
    /// file could not be read back at emit time.
    FileChanged {
        path: String,
        content: Option<String>,
    },
    /// The turn finished normally.  Never emitted for cancelled turns.
    TurnComplete,
    /// The turn was cancelled; any partially-assembled output was discarded.
    Aborted,
}
