// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! AWS Bedrock driver — Converse streaming API with SigV4 authentication.
//!
//! Uses `POST /model/{modelId}/converse-stream` and decodes the
//! `application/vnd.amazon.eventstream` response body into [`StreamEvent`]s.
//! The full SigV4 signing algorithm is implemented locally using `sha2` and
//! `hex` (already workspace dependencies) to avoid pulling in the AWS SDK;
//! the event-stream framing lives in [`crate::eventstream`] for the same
//! reason.
//!
//! # Credentials
//! Reads from env vars:
//! - `AWS_ACCESS_KEY_ID`
//! - `AWS_SECRET_ACCESS_KEY`
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! # Extended reasoning
//! When `reasoning_budget > 0` the request carries
//! `additionalModelRequestFields.thinking` with that token budget; the model
//! then streams `reasoningContent` deltas whose trailing `signature` must be
//! preserved for history replay.

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    eventstream::{Frame, FrameDecoder},
    provider::EventStream,
    CompletionRequest, ContentBlock, Message, Role, StopReason, StreamEvent,
};

pub struct BedrockProvider {
    model: String,
    region: String,
    client: reqwest::Client,
}

impl BedrockProvider {
    pub fn new(model: String, region: Option<String>) -> Self {
        let region = region
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .or_else(|| std::env::var("AWS_REGION").ok())
            .unwrap_or_else(|| "us-east-1".into());
        Self {
            model,
            region,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn converse(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").context("AWS_ACCESS_KEY_ID not set")?;
        let secret_key =
            std::env::var("AWS_SECRET_ACCESS_KEY").context("AWS_SECRET_ACCESS_KEY not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        let body = build_converse_body(&req);
        let body_bytes = serde_json::to_vec(&body)?;
        let path = format!("/model/{}/converse-stream", urlencoded(&self.model));
        let host = format!("bedrock-runtime.{}.amazonaws.com", self.region);
        let url = format!("https://{host}{path}");

        debug!(model = %self.model, region = %self.region, "sending Bedrock converse-stream request");

        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = &date_time[..8];
        let content_type = "application/json";
        let service = "bedrock";

        let headers_to_sign: Vec<(&str, &str)> = {
            let mut h = vec![
                ("content-type", content_type),
                ("host", host.as_str()),
                ("x-amz-date", date_time.as_str()),
            ];
            if let Some(tok) = &session_token {
                h.push(("x-amz-security-token", tok.as_str()));
            }
            h.sort_by_key(|&(k, _)| k);
            h
        };

        let canonical_headers: String = headers_to_sign
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k.to_lowercase(), v.trim()))
            .collect();
        let signed_headers: String = headers_to_sign
            .iter()
            .map(|(k, _)| k.to_lowercase())
            .collect::<Vec<_>>()
            .join(";");
        let body_hash = hex_sha256(&body_bytes);

        let canonical_request = format!(
            "POST\n{}\n\n{}\n{}\n{}",
            path, canonical_headers, signed_headers, body_hash
        );

        let credential_scope = format!("{}/{}/{}/aws4_request", date, self.region, service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(secret_key.as_bytes(), date, &self.region, service);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            access_key, credential_scope, signed_headers, signature
        );

        let mut req_builder = self
            .client
            .post(&url)
            .header("content-type", content_type)
            .header("host", &host)
            .header("x-amz-date", &date_time)
            .header("Authorization", &authorization)
            .body(body_bytes);

        if let Some(tok) = &session_token {
            req_builder = req_builder.header("x-amz-security-token", tok);
        }

        let resp = req_builder.send().await.context("Bedrock request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Bedrock error {status}: {text}");
        }

        // Event-stream frames can be split across TCP chunks, so the decoder
        // carries a byte buffer forward; complete frames are mapped to
        // StreamEvents, partial ones wait for the next chunk.
        let event_stream = resp
            .bytes_stream()
            .scan(FrameDecoder::new(), |dec, chunk| {
                let mut events: Vec<anyhow::Result<StreamEvent>> = Vec::new();
                match chunk {
                    Ok(bytes) => {
                        dec.feed(&bytes);
                        loop {
                            match dec.next_frame() {
                                Ok(Some(frame)) => {
                                    if let Some(ev) = decode_frame(&frame) {
                                        let stop = ev.is_err();
                                        events.push(ev);
                                        if stop {
                                            break;
                                        }
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    events.push(Err(e));
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => events.push(Err(anyhow::anyhow!(e))),
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

// ── Request body ──────────────────────────────────────────────────────────────

/// Build the Converse request body from a [`CompletionRequest`].
pub(crate) fn build_converse_body(req: &CompletionRequest) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

    let mut body = json!({
        "messages": messages,
        "inferenceConfig": {
            "maxTokens": req.max_output_tokens,
            "temperature": req.temperature,
        }
    });
    if !req.system.is_empty() {
        body["system"] = json!([{ "text": req.system }]);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "toolSpec": {
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": { "json": t.parameters },
                    }
                })
            })
            .collect();
        body["toolConfig"] = json!({ "tools": tools });
    }
    if req.reasoning_budget > 0 {
        body["additionalModelRequestFields"] = json!({
            "thinking": {
                "type": "enabled",
                "budget_tokens": req.reasoning_budget,
            }
        });
    }
    body
}

fn message_to_wire(m: &Message) -> Value {
    let role = match m.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = m.content.iter().map(block_to_wire).collect();
    json!({ "role": role, "content": content })
}

fn block_to_wire(b: &ContentBlock) -> Value {
    match b {
        ContentBlock::Text { text } => json!({ "text": text }),
        // Reasoning blocks are replayed with their signature intact; Bedrock
        // rejects unsigned reasoning on subsequent turns.
        ContentBlock::Reasoning { text, signature } => json!({
            "reasoningContent": {
                "reasoningText": {
                    "text": text,
                    "signature": signature.clone().unwrap_or_default(),
                }
            }
        }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "toolUse": {
                "toolUseId": id,
                "name": name,
                "input": input,
            }
        }),
        ContentBlock::ToolResult { id, content } => json!({
            "toolResult": {
                "toolUseId": id,
                "content": [{ "text": content }],
            }
        }),
    }
}

// ── Stream decoding ───────────────────────────────────────────────────────────

/// Map one event-stream frame to a [`StreamEvent`].
///
/// Returns `None` for frames the agent has no use for (`messageStart`,
/// keep-alives, unknown future event kinds).
fn decode_frame(frame: &Frame) -> Option<anyhow::Result<StreamEvent>> {
    let message_type = frame.header(":message-type").unwrap_or("event");
    if message_type != "event" {
        let kind = frame
            .header(":exception-type")
            .or_else(|| frame.header(":error-code"))
            .unwrap_or("unknown");
        let body = String::from_utf8_lossy(&frame.payload);
        return Some(Err(anyhow::anyhow!("Bedrock stream {kind}: {body}")));
    }

    let event_type = frame.header(":event-type")?;
    let payload: Value = match serde_json::from_slice(&frame.payload) {
        Ok(v) => v,
        Err(e) => return Some(Err(anyhow::anyhow!("bad {event_type} payload: {e}"))),
    };
    parse_event(event_type, &payload)
}

/// Translate a decoded frame payload into a [`StreamEvent`].
pub(crate) fn parse_event(event_type: &str, v: &Value) -> Option<anyhow::Result<StreamEvent>> {
    let index = v["contentBlockIndex"].as_u64().unwrap_or(0) as u32;
    match event_type {
        "contentBlockStart" => {
            let tu = v["start"].get("toolUse")?;
            Some(Ok(StreamEvent::BlockStart {
                index,
                tool_use_id: tu["toolUseId"].as_str().unwrap_or("").to_string(),
                name: tu["name"].as_str().unwrap_or("").to_string(),
            }))
        }
        "contentBlockDelta" => {
            let delta = &v["delta"];
            if let Some(text) = delta["text"].as_str() {
                return Some(Ok(StreamEvent::TextDelta {
                    index,
                    text: text.to_string(),
                }));
            }
            if let Some(fragment) = delta["toolUse"]["input"].as_str() {
                return Some(Ok(StreamEvent::InputJsonDelta {
                    index,
                    partial_json: fragment.to_string(),
                }));
            }
            if let Some(rc) = delta.get("reasoningContent") {
                if let Some(text) = rc["text"].as_str() {
                    return Some(Ok(StreamEvent::ReasoningDelta {
                        index,
                        text: text.to_string(),
                    }));
                }
                if let Some(sig) = rc["signature"].as_str() {
                    return Some(Ok(StreamEvent::ReasoningSignatureDelta {
                        index,
                        signature: sig.to_string(),
                    }));
                }
            }
            None
        }
        "contentBlockStop" => Some(Ok(StreamEvent::BlockStop { index })),
        "messageStop" => {
            let reason = v["stopReason"].as_str().unwrap_or("end_turn");
            Some(Ok(StreamEvent::MessageStop {
                stop_reason: StopReason::parse(reason),
            }))
        }
        "metadata" => {
            let usage = v.get("usage")?;
            Some(Ok(StreamEvent::Usage {
                input_tokens: usage["inputTokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["outputTokens"].as_u64().unwrap_or(0) as u32,
            }))
        }
        // messageStart carries only the role; nothing to surface.
        _ => None,
    }
}

// ── SigV4 helpers ─────────────────────────────────────────────────────────────

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// HMAC-SHA256 computed without the `hmac` crate using the raw SHA256 primitive.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    const BLOCK: usize = 64;
    let norm_key = if key.len() > BLOCK {
        sha256(key)
    } else {
        key.to_vec()
    };
    let mut padded = [0u8; BLOCK];
    padded[..norm_key.len()].copy_from_slice(&norm_key);
    let ipad: Vec<u8> = padded.iter().map(|&b| b ^ 0x36).collect();
    let opad: Vec<u8> = padded.iter().map(|&b| b ^ 0x5c).collect();
    let inner = {
        let mut h = Sha256::new();
        h.update(&ipad);
        h.update(data);
        h.finalize().to_vec()
    };
    let mut h = Sha256::new();
    h.update(&opad);
    h.update(&inner);
    h.finalize().to_vec()
}

fn derive_signing_key(secret: &[u8], date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = [b"AWS4", secret].concat();
    let k_date = hmac_sha256(&k_secret, date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URL-encode a path segment (percent-encode non-unreserved characters,
/// keeping `/` which appears between profile prefix and model name).
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
