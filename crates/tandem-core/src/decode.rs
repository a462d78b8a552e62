// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;
use tracing::warn;

use tandem_model::{ContentBlock, StopReason, StreamEvent};

/// Per-event side output of the collector: what the caller should surface to
/// the client while the block list is still being assembled.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeSignal {
    /// Stream this chunk as `agent:thinking` (reasoning text and in-progress
    /// assistant prose alike — clients render partial prose as thinking until
    /// the block finalizes).
    Thinking(String),
    /// A text block finalized; re-emit the full text as `agent:text`.
    TextFinal(String),
}

/// State machine that assembles the model's event stream into an ordered list
/// of [`ContentBlock`]s.
///
/// Tool-use blocks open explicitly via `BlockStart` (carrying id and name)
/// and accumulate their input JSON verbatim across `InputJsonDelta`
/// fragments; the buffer is parsed only at `BlockStop` — provider semantics
/// guarantee it is complete JSON by then, and a parse failure degrades to an
/// empty object rather than aborting the turn.  Text and reasoning blocks
/// open implicitly with their first delta.  A reasoning signature may arrive
/// after the reasoning text and is attached to the block it trails.
pub struct TurnCollector {
    open: Option<OpenBlock>,
    blocks: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
    synthetic_ids: usize,
}

enum OpenBlock {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        json_buf: String,
    },
}

impl TurnCollector {
    pub fn new() -> Self {
        Self {
            open: None,
            blocks: Vec::new(),
            stop_reason: None,
            synthetic_ids: 0,
        }
    }

    /// Feed one stream event; returns what (if anything) to surface now.
    pub fn apply(&mut self, event: StreamEvent) -> Option<DecodeSignal> {
        match event {
            StreamEvent::BlockStart {
                tool_use_id, name, ..
            } => {
                // A new explicit block implies the previous one is done even
                // if its BlockStop was lost.
                let signal = self.finalize_open();
                self.open = Some(OpenBlock::ToolUse {
                    id: tool_use_id,
                    name,
                    json_buf: String::new(),
                });
                signal
            }
            StreamEvent::TextDelta { text, .. } => {
                if text.is_empty() {
                    return None;
                }
                let signal = match &mut self.open {
                    Some(OpenBlock::Text { text: buf }) => {
                        buf.push_str(&text);
                        None
                    }
                    _ => {
                        let signal = self.finalize_open();
                        self.open = Some(OpenBlock::Text { text: text.clone() });
                        signal
                    }
                };
                // Partial prose streams to the client as thinking; the final
                // text is re-emitted whole when the block closes.
                signal.or(Some(DecodeSignal::Thinking(text)))
            }
            StreamEvent::ReasoningDelta { text, .. } => {
                if text.is_empty() {
                    return None;
                }
                let signal = match &mut self.open {
                    Some(OpenBlock::Reasoning { text: buf, .. }) => {
                        buf.push_str(&text);
                        None
                    }
                    _ => {
                        let signal = self.finalize_open();
                        self.open = Some(OpenBlock::Reasoning {
                            text: text.clone(),
                            signature: None,
                        });
                        signal
                    }
                };
                signal.or(Some(DecodeSignal::Thinking(text)))
            }
            StreamEvent::ReasoningSignatureDelta { signature, .. } => {
                self.attach_signature(signature);
                None
            }
            StreamEvent::InputJsonDelta { partial_json, .. } => {
                if let Some(OpenBlock::ToolUse { json_buf, .. }) = &mut self.open {
                    json_buf.push_str(&partial_json);
                } else {
                    warn!("input JSON fragment with no open tool-use block; dropped");
                }
                None
            }
            StreamEvent::BlockStop { .. } => self.finalize_open(),
            StreamEvent::MessageStop { stop_reason } => {
                self.stop_reason = Some(stop_reason);
                self.finalize_open()
            }
            StreamEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                tracing::debug!(input_tokens, output_tokens, "turn token usage");
                None
            }
        }
    }

    /// Consume the collector, yielding the assembled blocks and stop reason.
    pub fn finish(mut self) -> (Vec<ContentBlock>, StopReason, Option<DecodeSignal>) {
        let signal = self.finalize_open();
        let stop = self.stop_reason.unwrap_or(StopReason::EndTurn);
        (self.blocks, stop, signal)
    }

    fn finalize_open(&mut self) -> Option<DecodeSignal> {
        match self.open.take()? {
            OpenBlock::Text { text } => {
                self.blocks.push(ContentBlock::Text { text: text.clone() });
                Some(DecodeSignal::TextFinal(text))
            }
            OpenBlock::Reasoning { text, signature } => {
                self.blocks.push(ContentBlock::Reasoning { text, signature });
                None
            }
            OpenBlock::ToolUse { id, name, json_buf } => {
                let input = parse_tool_input(&name, &json_buf);
                let id = if id.is_empty() {
                    // An id is mandatory for ToolUse↔ToolResult pairing; fall
                    // back to a synthetic one rather than corrupting history.
                    self.synthetic_ids += 1;
                    let synthetic = format!("toolu_synthetic_{}", self.synthetic_ids);
                    warn!(tool_name = %name, "tool use with empty id; substituting {synthetic}");
                    synthetic
                } else {
                    id
                };
                self.blocks.push(ContentBlock::ToolUse { id, name, input });
                None
            }
        }
    }

    /// Signatures trail the reasoning text; attach to the open reasoning
    /// block, or to the most recent finalized one when the block already
    /// closed.
    fn attach_signature(&mut self, fragment: String) {
        if let Some(OpenBlock::Reasoning { signature, .. }) = &mut self.open {
            signature.get_or_insert_with(String::new).push_str(&fragment);
            return;
        }
        if let Some(ContentBlock::Reasoning { signature, .. }) = self
            .blocks
            .iter_mut()
            .rev()
            .find(|b| matches!(b, ContentBlock::Reasoning { .. }))
        {
            signature.get_or_insert_with(String::new).push_str(&fragment);
            return;
        }
        warn!("reasoning signature with no reasoning block; dropped");
    }
}

impl Default for TurnCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an accumulated tool-input buffer.  Empty and malformed buffers
/// degrade to `{}` so a single bad tool call cannot abort the turn.
fn parse_tool_input(name: &str, buf: &str) -> Value {
    if buf.is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(buf) {
        Ok(v) => v,
        Err(e) => {
            warn!(tool_name = %name, error = %e, "malformed tool input JSON; substituting {{}}");
            Value::Object(Default::default())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
