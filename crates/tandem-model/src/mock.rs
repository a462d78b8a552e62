// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::EventStream, CompletionRequest, StopReason, StreamEvent};

/// A pre-scripted mock provider.  Each call to `converse` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences — including tool calls and reasoning blocks —
/// without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `converse()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from a list of response scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`StreamEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: a single text-only turn ending in `end_turn`.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_turn(reply)])
    }

    /// Event script for a text-only turn.
    pub fn text_turn(text: impl Into<String>) -> Vec<StreamEvent> {
        vec![
            StreamEvent::TextDelta {
                index: 0,
                text: text.into(),
            },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageStop {
                stop_reason: StopReason::EndTurn,
            },
        ]
    }

    /// Event script for a single tool call (`stop_reason = tool_use`), with
    /// the input JSON split into two fragments the way the real stream
    /// delivers it.
    pub fn tool_turn(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<StreamEvent> {
        let args = args_json.into();
        let split = args.len() / 2;
        vec![
            StreamEvent::BlockStart {
                index: 0,
                tool_use_id: id.into(),
                name: name.into(),
            },
            StreamEvent::InputJsonDelta {
                index: 0,
                partial_json: args[..split].to_string(),
            },
            StreamEvent::InputJsonDelta {
                index: 0,
                partial_json: args[split..].to_string(),
            },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageStop {
                stop_reason: StopReason::ToolUse,
            },
        ]
    }

    /// Convenience: one tool call, then a final text turn.
    pub fn tool_then_text(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_turn(id, name, args_json),
            Self::text_turn(final_text),
        ])
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        "scripted-mock"
    }

    async fn converse(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Self::text_turn("[no more scripts]")
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<StreamEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
