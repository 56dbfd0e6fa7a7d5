// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! C ABI for host runtimes.
//!
//! Every function works against one process-wide [`Runtime`] built on first
//! use from `GG_EDGE_*` environment configuration. Handles are plain `u64`
//! values; 0 means failure or "no session". Failures leave a message that
//! `gg_edge_last_error` returns on the same thread.

mod embedding;
mod error;
mod session;

use std::ffi::{c_char, CStr};
use std::sync::OnceLock;

use tracing::debug;

use crate::backend::DefaultBackend;
use crate::telemetry::init_logging;
use crate::Runtime;

pub use embedding::{
    gg_edge_embed, gg_edge_embedding_dimension, gg_edge_embedding_session_create,
    gg_edge_embedding_session_free,
};
pub use error::{gg_edge_clear_last_error, gg_edge_last_error};
pub use session::{
    gg_edge_generate, gg_edge_generate_stream, gg_edge_gpu_available, gg_edge_session_create,
    gg_edge_session_create_with_gpu, gg_edge_session_free, gg_edge_session_gpu_layers,
    gg_edge_session_is_using_gpu, gg_edge_shutdown, gg_edge_string_free, GgStreamCallbacks,
};

use error::set_last_error;

static RUNTIME: OnceLock<Runtime<DefaultBackend>> = OnceLock::new();

/// The process-wide runtime.
pub(crate) fn runtime() -> &'static Runtime<DefaultBackend> {
    RUNTIME.get_or_init(|| {
        let config = crate::config::load();
        if let Err(e) = init_logging(&config.logging) {
            // The host may already have installed a subscriber.
            debug!(error = %e, "Logging not initialized by gg-edge");
        }
        debug!(config = ?config.effective_config(), "Runtime configured");
        Runtime::with_config(Box::new(DefaultBackend::init), config)
    })
}

/// Borrow a UTF-8 C string argument, recording an error when it is null or
/// not valid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Option<&'a str> {
    if ptr.is_null() {
        set_last_error(format!("null pointer argument: {name}"));
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(format!("invalid UTF-8 in {name}"));
            None
        }
    }
}
