// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Text ⇄ token conversion against a session's native tokenizer.

use tracing::debug;

use super::error::TokenizeError;
use crate::backend::{NativeContext, TokenId, TokenizeOptions};

/// Extra token slots beyond the text's byte length, for BOS and control
/// tokens that expand the encoding.
pub const TOKEN_MARGIN: usize = 256;

/// Byte ceiling for the surface text of a single token.
pub const PIECE_CAPACITY: usize = 256;

/// Tokenize `text`, inserting BOS and parsing chat control sequences.
///
/// An empty string may yield zero tokens; that is not an error.
pub fn tokenize<C: NativeContext>(ctx: &C, text: &str) -> Result<Vec<TokenId>, TokenizeError> {
    let capacity = text.len() + TOKEN_MARGIN;
    let tokens = ctx.tokenize(text, capacity, TokenizeOptions::default())?;
    debug!(bytes = text.len(), tokens = tokens.len(), "Tokenized text");
    Ok(tokens)
}

/// Surface text of one token, at most [`PIECE_CAPACITY`] bytes.
///
/// Tokens without a printable piece yield an empty fragment.
pub fn detokenize_one<C: NativeContext>(ctx: &mut C, token: TokenId) -> String {
    match ctx.token_to_piece(token, PIECE_CAPACITY) {
        Ok(piece) => piece,
        Err(e) => {
            debug!(token, error = %e, "Token has no piece");
            String::new()
        }
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_to_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
