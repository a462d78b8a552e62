// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Fatal turn-level failures.  Tool failures are not errors — they flow back
/// to the model as `{"error": ...}` results and the loop continues.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model↔tool loop ran more iterations than the configured bound
    /// without reaching a terminal stop reason.
    #[error("IterationLimitExceeded: turn exceeded {0} model iterations")]
    IterationLimitExceeded(u32),

    /// Provider-side failure: HTTP error, stream corruption, rate limit.
    /// History is left at the last fully-assembled message.
    #[error("model call failed: {0}")]
    Model(#[from] anyhow::Error),
}
