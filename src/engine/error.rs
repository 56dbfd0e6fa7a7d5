// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for session loading, tokenization, generation and embedding.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Session creation failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model load failed for {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Context creation failed: {0}")]
    Context(String),
}

/// Text could not be converted to tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("Token buffer too small ({capacity} tokens)")]
    BufferTooSmall { capacity: usize },

    #[error("Tokenization failed: {0}")]
    Failed(String),
}

impl From<BackendError> for TokenizeError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::TokenBufferTooSmall { capacity, .. } => Self::BufferTooSmall { capacity },
            other => Self::Failed(other.to_string()),
        }
    }
}

/// A native decode step failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Decode failed: {0}")]
pub struct DecodeError(pub String);

impl From<BackendError> for DecodeError {
    fn from(e: BackendError) -> Self {
        Self(e.to_string())
    }
}

/// Generation failed before producing any token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Invalid session handle: {0}")]
    InvalidHandle(u64),

    #[error("Failed to tokenize prompt: {0}")]
    Tokenize(#[from] TokenizeError),

    #[error("Failed to decode prompt: {0}")]
    Decode(#[from] DecodeError),
}

/// Embedding extraction failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbedError {
    #[error("Invalid embedding session handle: {0}")]
    InvalidHandle(u64),

    #[error("Failed to tokenize text: {0}")]
    Tokenize(#[from] TokenizeError),

    #[error("Failed to decode text: {0}")]
    Decode(#[from] DecodeError),

    #[error("No embeddings available after decode")]
    Unavailable,

    #[error("Embedding has {actual} components, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}
