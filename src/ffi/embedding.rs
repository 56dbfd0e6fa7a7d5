// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Embedding session functions for FFI.

use std::ffi::c_char;

use super::error::{clear_last_error, set_last_error};
use super::{runtime, str_arg};
use crate::models::SessionHandle;

/// Create a CPU-only embedding session. Returns 0 on failure.
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_embedding_session_create(
    model_path: *const c_char,
    context_size: i32,
    threads: i32,
) -> u64 {
    let Some(path) = str_arg(model_path, "model_path") else {
        return 0;
    };
    let rt = runtime();
    let options = rt.session_options(context_size, threads);

    match rt.try_create_embedding_session(path, options) {
        Ok(handle) => {
            clear_last_error();
            handle.id()
        }
        Err(e) => {
            set_last_error(e.to_string());
            0
        }
    }
}

/// Embedding width of a session, 0 for an invalid handle.
#[no_mangle]
pub extern "C" fn gg_edge_embedding_dimension(handle: u64) -> i32 {
    runtime().embedding_dimension(handle)
}

/// Embed `text` into `out`, which holds `capacity` floats.
///
/// Returns the number of floats written (the session's dimension) or -1 on
/// failure, including a buffer smaller than the dimension.
///
/// # Safety
/// `text` must be null or a valid NUL-terminated string; `out` must be null
/// or valid for `capacity` writes.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_embed(
    handle: u64,
    text: *const c_char,
    out: *mut f32,
    capacity: usize,
) -> i32 {
    if out.is_null() {
        set_last_error("null pointer argument: out");
        return -1;
    }
    let Some(text) = str_arg(text, "text") else {
        return -1;
    };

    let vector = match runtime().try_embed(SessionHandle::from_raw(handle), text) {
        Ok(v) => v,
        Err(e) => {
            set_last_error(e.to_string());
            return -1;
        }
    };
    if vector.len() > capacity {
        set_last_error(format!("output buffer holds {capacity} floats, need {}", vector.len()));
        return -1;
    }

    std::ptr::copy_nonoverlapping(vector.as_ptr(), out, vector.len());
    i32::try_from(vector.len()).unwrap_or(-1)
}

/// Release an embedding session. Safe with 0 or an already-freed handle.
#[no_mangle]
pub extern "C" fn gg_edge_embedding_session_free(handle: u64) {
    runtime().free_embedding_session(handle);
}
