// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generation output types.

/// Result of text generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Generated text, stop marker excluded.
    pub text: String,
    /// Tokens drawn and decoded.
    pub tokens_generated: u32,
    /// Reason generation stopped.
    pub finish_reason: FinishReason,
}

impl GenerationOutcome {
    pub(crate) fn empty(finish_reason: FinishReason) -> Self {
        Self { text: String::new(), tokens_generated: 0, finish_reason }
    }
}

/// Reason why text generation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Model drew an end-of-generation token.
    EndOfGeneration,
    /// Accumulated text contained the `<|im_end|>` marker.
    StopMarker,
    /// Hit the max_tokens limit.
    MaxTokens,
    /// Decoding a drawn token failed; text so far is returned.
    DecodeFailed,
    /// Caller cancelled between iterations.
    Cancelled,
    /// Prompt produced no tokens, so there was nothing to decode.
    EmptyPrompt,
}

impl FinishReason {
    /// Whether generation ended early because of a native failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::DecodeFailed)
    }
}
