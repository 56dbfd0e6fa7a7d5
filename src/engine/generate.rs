// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Token generation loop.
//!
//! Each call tokenizes the prompt, clears the session's decode memory,
//! decodes the prompt as one batch and then alternates sample / decode
//! until one of the stop conditions fires:
//!
//! - the model draws an end-of-generation token,
//! - the accumulated text contains [`STOP_MARKER`],
//! - `max_tokens` draws were made,
//! - decoding a drawn token fails (text so far is kept),
//! - the caller's cancellation predicate returns true.
//!
//! The native sampler is built per call and dropped on every exit path.

use tracing::{debug, warn};

use super::config::GenerationParams;
use super::error::{DecodeError, GenerateError};
use super::output::{FinishReason, GenerationOutcome};
use super::sampler::SamplerChain;
use super::streaming::TokenSink;
use super::tokenizer::{detokenize_one, tokenize};
use crate::backend::NativeContext;

/// Chat turn terminator that ends generation when it shows up in the text.
pub const STOP_MARKER: &str = "<|im_end|>";

/// Cooperative cancellation predicate, polled once per iteration.
pub type CancelCheck<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Generate text from `prompt`, returning it in one piece.
///
/// Fails only when tokenization or the prompt decode fails; a decode failure
/// later in the loop ends generation with [`FinishReason::DecodeFailed`].
pub fn generate<C: NativeContext>(
    ctx: &mut C,
    prompt: &str,
    params: &GenerationParams,
) -> Result<GenerationOutcome, GenerateError> {
    generate_cancellable(ctx, prompt, params, None)
}

/// [`generate`] with an optional cancellation predicate.
pub fn generate_cancellable<C: NativeContext>(
    ctx: &mut C,
    prompt: &str,
    params: &GenerationParams,
    is_cancelled: Option<CancelCheck<'_>>,
) -> Result<GenerationOutcome, GenerateError> {
    let Some(mut sampler) = prepare(ctx, prompt, params)? else {
        return Ok(GenerationOutcome::empty(FinishReason::EmptyPrompt));
    };
    let run = sample_loop(ctx, &mut sampler, params, is_cancelled, |_| {});
    let mut text = run.text;
    if let Some(pos) = run.marker_at {
        text.truncate(pos);
    }
    debug!(
        tokens = run.tokens_generated,
        reason = ?run.finish_reason,
        "Generation completed"
    );
    Ok(GenerationOutcome {
        text,
        tokens_generated: run.tokens_generated,
        finish_reason: run.finish_reason,
    })
}

/// Generate text from `prompt`, delivering fragments to `sink` as they are
/// produced.
///
/// The sink sees zero or more `on_token` calls, then exactly one terminal
/// event: `on_error` when tokenization or the prompt decode fails,
/// `on_complete` otherwise. The fragment that completes [`STOP_MARKER`] is
/// not delivered, while fragments before it already were; a marker split
/// across fragments therefore leaves its prefix in the stream, unlike the
/// blocking result, which is cut at the marker start.
///
/// The returned outcome's text is exactly what the sink received.
pub fn generate_streaming<C, S>(
    ctx: &mut C,
    prompt: &str,
    params: &GenerationParams,
    sink: &mut S,
) -> Result<GenerationOutcome, GenerateError>
where
    C: NativeContext,
    S: TokenSink + ?Sized,
{
    generate_streaming_cancellable(ctx, prompt, params, sink, None)
}

/// [`generate_streaming`] with an optional cancellation predicate.
pub fn generate_streaming_cancellable<C, S>(
    ctx: &mut C,
    prompt: &str,
    params: &GenerationParams,
    sink: &mut S,
    is_cancelled: Option<CancelCheck<'_>>,
) -> Result<GenerationOutcome, GenerateError>
where
    C: NativeContext,
    S: TokenSink + ?Sized,
{
    let mut sampler = match prepare(ctx, prompt, params) {
        Ok(Some(sampler)) => sampler,
        Ok(None) => {
            sink.on_complete();
            return Ok(GenerationOutcome::empty(FinishReason::EmptyPrompt));
        }
        Err(e) => {
            sink.on_error(&e.to_string());
            return Err(e);
        }
    };

    let mut emitted = String::new();
    let run = sample_loop(ctx, &mut sampler, params, is_cancelled, |piece| {
        emitted.push_str(piece);
        sink.on_token(piece);
    });
    drop(sampler);
    sink.on_complete();

    debug!(
        tokens = run.tokens_generated,
        reason = ?run.finish_reason,
        "Stream generation completed"
    );
    Ok(GenerationOutcome {
        text: emitted,
        tokens_generated: run.tokens_generated,
        finish_reason: run.finish_reason,
    })
}

/// Tokenize, build the sampler, clear memory and decode the prompt.
///
/// `Ok(None)` means the prompt produced no tokens.
fn prepare<C: NativeContext>(
    ctx: &mut C,
    prompt: &str,
    params: &GenerationParams,
) -> Result<Option<C::Sampler>, GenerateError> {
    let tokens = tokenize(ctx, prompt)?;
    let sampler = ctx.build_sampler(&SamplerChain::for_generation(params));
    ctx.clear_memory();
    if tokens.is_empty() {
        debug!("Prompt produced no tokens, nothing to generate");
        return Ok(None);
    }
    ctx.decode(&tokens).map_err(DecodeError::from)?;
    debug!(tokens = tokens.len(), "Prompt decoded");
    Ok(Some(sampler))
}

struct LoopRun {
    /// Every appended fragment, including one that completed the marker.
    text: String,
    /// Byte offset of the stop marker, when it ended generation.
    marker_at: Option<usize>,
    tokens_generated: u32,
    finish_reason: FinishReason,
}

fn sample_loop<C: NativeContext>(
    ctx: &mut C,
    sampler: &mut C::Sampler,
    params: &GenerationParams,
    is_cancelled: Option<CancelCheck<'_>>,
    mut emit: impl FnMut(&str),
) -> LoopRun {
    let mut run = LoopRun {
        text: String::new(),
        marker_at: None,
        tokens_generated: 0,
        finish_reason: FinishReason::MaxTokens,
    };

    for _ in 0..params.iterations() {
        if is_cancelled.is_some_and(|cancelled| cancelled()) {
            run.finish_reason = FinishReason::Cancelled;
            break;
        }

        let token = ctx.sample(sampler);
        if ctx.is_end_of_generation(token) {
            run.finish_reason = FinishReason::EndOfGeneration;
            break;
        }

        let piece = detokenize_one(ctx, token);
        if !piece.is_empty() {
            let scanned = run.text.len();
            run.text.push_str(&piece);
            if let Some(pos) = find_stop_marker(&run.text, scanned) {
                run.marker_at = Some(pos);
                run.finish_reason = FinishReason::StopMarker;
                break;
            }
            emit(&piece);
        }

        if let Err(e) = ctx.decode(&[token]) {
            warn!(error = %e, generated = run.tokens_generated, "Failed to decode token, stopping early");
            run.finish_reason = FinishReason::DecodeFailed;
            break;
        }
        run.tokens_generated += 1;
    }
    run
}

/// Find [`STOP_MARKER`] in `text`, given that `text[..scanned]` was already
/// searched. Only the tail that could hold a new occurrence is scanned.
pub fn find_stop_marker(text: &str, scanned: usize) -> Option<usize> {
    let mut start = scanned.saturating_sub(STOP_MARKER.len() - 1).min(text.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..].find(STOP_MARKER).map(|i| start + i)
}

#[cfg(test)]
#[path = "generate_tests.rs"]
mod tests;
