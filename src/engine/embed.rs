// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pooled sentence embeddings.

use tracing::debug;

use super::error::{DecodeError, EmbedError};
use super::tokenizer::tokenize;
use crate::backend::NativeContext;

/// Sequence whose pooled output is read.
const POOLED_SEQUENCE: i32 = 0;

/// Embed `text` into a unit-length vector of exactly `dim` components.
///
/// Every call clears decode memory first, so results do not depend on
/// earlier calls. A zero vector is returned as-is rather than normalized.
pub fn embed<C: NativeContext>(ctx: &mut C, text: &str, dim: usize) -> Result<Vec<f32>, EmbedError> {
    let tokens = tokenize(ctx, text)?;
    ctx.clear_memory();
    ctx.decode(&tokens).map_err(DecodeError::from)?;

    let mut vector = ctx
        .sequence_embeddings(POOLED_SEQUENCE)
        .or_else(|| {
            debug!("No pooled sequence embedding, falling back to context embedding");
            ctx.context_embeddings()
        })
        .ok_or(EmbedError::Unavailable)?;

    if vector.len() < dim {
        return Err(EmbedError::DimensionMismatch { expected: dim, actual: vector.len() });
    }
    vector.truncate(dim);
    l2_normalize(&mut vector);

    debug!(tokens = tokens.len(), dim, "Embedded text");
    Ok(vector)
}

/// Scale `v` to unit Euclidean length. Leaves a zero vector untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::engine::test_support::mock_context;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_embed_is_unit_length() {
        let backend = MockBackend::new().with_embedding(vec![3.0, 4.0, 0.0, 12.0]);
        let (_file, mut ctx) = mock_context(&backend, true);

        let v = embed(&mut ctx, "hello world", 4).unwrap();

        assert_eq!(v.len(), 4);
        assert!((norm(&v) - 1.0).abs() < 1e-5);
        assert!((v[0] - 3.0 / 13.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_returned_raw() {
        let backend = MockBackend::new().with_embedding(vec![0.0; 8]);
        let (_file, mut ctx) = mock_context(&backend, true);

        let v = embed(&mut ctx, "hello", 8).unwrap();
        assert_eq!(v, vec![0.0; 8]);
    }

    #[test]
    fn test_falls_back_to_context_embedding() {
        let backend = MockBackend::new()
            .with_embedding(vec![1.0, 1.0])
            .without_sequence_embeddings();
        let (_file, mut ctx) = mock_context(&backend, true);

        let v = embed(&mut ctx, "hello", 2).unwrap();
        assert!((norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_no_embeddings_is_an_error() {
        let backend = MockBackend::new().with_embedding(vec![1.0, 2.0]).without_embeddings();
        let (_file, mut ctx) = mock_context(&backend, true);

        assert_eq!(embed(&mut ctx, "hello", 2), Err(EmbedError::Unavailable));
    }

    #[test]
    fn test_decode_failure_propagates() {
        let backend = MockBackend::new().with_embedding(vec![1.0, 2.0]).fail_decode_at(0);
        let (_file, mut ctx) = mock_context(&backend, true);

        assert!(matches!(embed(&mut ctx, "hello", 2), Err(EmbedError::Decode(_))));
    }

    #[test]
    fn test_empty_text_cannot_be_embedded() {
        let backend = MockBackend::new().with_embedding(vec![1.0, 2.0]);
        let (_file, mut ctx) = mock_context(&backend, true);

        assert!(embed(&mut ctx, "", 2).is_err());
    }

    #[test]
    fn test_short_vector_is_a_dimension_mismatch() {
        let backend = MockBackend::new().with_embedding(vec![1.0, 2.0]);
        let (_file, mut ctx) = mock_context(&backend, true);

        assert_eq!(
            embed(&mut ctx, "hello", 3),
            Err(EmbedError::DimensionMismatch { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_calls_are_independent() {
        let backend = MockBackend::new().with_embedding(vec![2.0, 0.0, 0.0]);
        let (_file, mut ctx) = mock_context(&backend, true);

        embed(&mut ctx, "a much longer first input", 3).unwrap();
        embed(&mut ctx, "hi", 3).unwrap();

        assert_eq!(ctx.memory().len(), 3);
    }

    #[test]
    fn test_tokenize_failure_is_reported() {
        let backend = MockBackend::new().with_embedding(vec![1.0, 2.0]).fail_tokenize();
        let (_file, mut ctx) = mock_context(&backend, true);

        let result = embed(&mut ctx, "hello", 2);

        assert!(matches!(result, Err(EmbedError::Tokenize(_))));
        assert_eq!(backend.stats().decode_calls, 0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = [3.0, 4.0];
        l2_normalize(&mut v);
        assert_eq!(v, [0.6, 0.8]);
    }
}
