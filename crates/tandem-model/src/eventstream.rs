// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Decoder for the `application/vnd.amazon.eventstream` binary framing used
//! by Bedrock's streaming endpoints.
//!
//! Implemented locally (like the SigV4 signer in `bedrock.rs`) to avoid
//! pulling in the AWS SDK.  Each frame is:
//!
//! ```text
//! ┌────────────────┬─────────────────┬──────────────┬─────────┬─────────┬─────────────┐
//! │ total len (4B) │ headers len (4B)│ prelude CRC  │ headers │ payload │ message CRC │
//! └────────────────┴─────────────────┴──────────────┴─────────┴─────────┴─────────────┘
//! ```
//!
//! All integers are big-endian; both CRCs are CRC-32 (IEEE) — the prelude CRC
//! covers the first 8 bytes, the message CRC covers everything before itself.
//! Headers are `{name_len(1), name, value_type(1), value}` tuples; Bedrock
//! uses string-valued headers (`:event-type`, `:message-type`,
//! `:exception-type`, `:content-type`).

use anyhow::bail;

/// Smallest possible frame: 12-byte prelude + 4-byte message CRC.
const MIN_FRAME_LEN: usize = 16;

/// One decoded event-stream frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// String-typed headers only; other header types are parsed (to advance
    /// the cursor) but not retained.
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Incremental frame decoder.  Feed it raw HTTP body chunks; complete frames
/// come out as they become available.  Partial frames stay buffered.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        if self.buf.len() < 12 {
            return Ok(None);
        }
        let total = read_u32(&self.buf[0..4]) as usize;
        if total < MIN_FRAME_LEN {
            bail!("event-stream frame too short: {total} bytes");
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        let headers_len = read_u32(&self.buf[4..8]) as usize;
        let prelude_crc = read_u32(&self.buf[8..12]);
        if crc32(&self.buf[..8]) != prelude_crc {
            bail!("event-stream prelude CRC mismatch");
        }
        if 12 + headers_len + 4 > total {
            bail!("event-stream headers overrun frame ({headers_len} bytes)");
        }
        let message_crc = read_u32(&self.buf[total - 4..total]);
        if crc32(&self.buf[..total - 4]) != message_crc {
            bail!("event-stream message CRC mismatch");
        }

        let headers = parse_headers(&self.buf[12..12 + headers_len])?;
        let payload = self.buf[12 + headers_len..total - 4].to_vec();
        self.buf.drain(..total);
        Ok(Some(Frame { headers, payload }))
    }
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn parse_headers(mut b: &[u8]) -> anyhow::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    while !b.is_empty() {
        let name_len = b[0] as usize;
        if b.len() < 1 + name_len + 1 {
            bail!("truncated event-stream header");
        }
        let name = String::from_utf8_lossy(&b[1..1 + name_len]).to_string();
        let value_type = b[1 + name_len];
        b = &b[1 + name_len + 1..];

        // Header value sizes by type tag, per the event-stream encoding.
        let consumed = match value_type {
            0 | 1 => 0, // bool true / bool false — no value bytes
            2 => 1,     // byte
            3 => 2,     // i16
            4 => 4,     // i32
            5 => 8,     // i64
            6 | 7 => {
                // byte array / string: u16 length prefix
                if b.len() < 2 {
                    bail!("truncated event-stream header value length");
                }
                let len = u16::from_be_bytes([b[0], b[1]]) as usize;
                if b.len() < 2 + len {
                    bail!("truncated event-stream header value");
                }
                if value_type == 7 {
                    let value = String::from_utf8_lossy(&b[2..2 + len]).to_string();
                    headers.push((name.clone(), value));
                }
                2 + len
            }
            8 => 8,  // timestamp
            9 => 16, // uuid
            other => bail!("unknown event-stream header type {other}"),
        };
        if b.len() < consumed {
            bail!("truncated event-stream header value");
        }
        b = &b[consumed..];
    }
    Ok(headers)
}

/// CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320), computed bitwise.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
