// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by engine unit tests.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::backend::mock::{MockBackend, MockContext};
use crate::backend::{Backend, ContextParams, ModelParams};

/// A temp file that passes GGUF magic validation.
pub(crate) fn model_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
    file.write_all(b"GGUF\x03\x00\x00\x00").unwrap();
    file
}

/// A mock context over a fresh model file. Keep the file alive with it.
pub(crate) fn mock_context(backend: &MockBackend, embeddings: bool) -> (NamedTempFile, MockContext) {
    let file = model_file();
    let model = backend.load_model(file.path(), &ModelParams::default()).unwrap();
    let params = ContextParams { n_ctx: 512, n_threads: 2, n_threads_batch: 2, embeddings };
    let ctx = backend.new_context(model, &params).unwrap();
    (file, ctx)
}
