// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generation session functions for FFI.

use std::ffi::{c_char, c_void, CString};

use super::error::{clear_last_error, set_last_error};
use super::{runtime, str_arg};
use crate::engine::{GenerationParams, GpuRequest, TokenSink};
use crate::models::SessionHandle;

/// Streaming callbacks. Any callback may be null. `user_data` is passed back
/// untouched; string arguments are only valid for the duration of the call.
#[repr(C)]
pub struct GgStreamCallbacks {
    pub user_data: *mut c_void,
    pub on_token: Option<extern "C" fn(user_data: *mut c_void, text: *const c_char)>,
    pub on_complete: Option<extern "C" fn(user_data: *mut c_void)>,
    pub on_error: Option<extern "C" fn(user_data: *mut c_void, message: *const c_char)>,
}

struct CallbackSink<'a> {
    callbacks: &'a GgStreamCallbacks,
}

impl CallbackSink<'_> {
    fn with_c_str(text: &str, f: impl FnOnce(*const c_char)) {
        let c_text = CString::new(text)
            .unwrap_or_else(|_| CString::new(text.replace('\0', "")).unwrap_or_default());
        f(c_text.as_ptr());
    }
}

impl TokenSink for CallbackSink<'_> {
    fn on_token(&mut self, text: &str) {
        if let Some(cb) = self.callbacks.on_token {
            let user_data = self.callbacks.user_data;
            Self::with_c_str(text, |ptr| cb(user_data, ptr));
        }
    }

    fn on_complete(&mut self) {
        if let Some(cb) = self.callbacks.on_complete {
            cb(self.callbacks.user_data);
        }
    }

    fn on_error(&mut self, message: &str) {
        set_last_error(message);
        if let Some(cb) = self.callbacks.on_error {
            let user_data = self.callbacks.user_data;
            Self::with_c_str(message, |ptr| cb(user_data, ptr));
        }
    }
}

/// Create a generation session with the configured GPU preference
/// (`GG_EDGE_USE_GPU`, CPU by default). Returns 0 on failure.
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_session_create(
    model_path: *const c_char,
    context_size: i32,
    threads: i32,
) -> u64 {
    let gpu = runtime().config().session.gpu_request();
    create_session(model_path, context_size, threads, gpu)
}

/// Create a generation session, offloading `gpu_layers` layers (-1 = all)
/// when `use_gpu` is set. Falls back to the CPU silently. Returns 0 on
/// failure.
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_session_create_with_gpu(
    model_path: *const c_char,
    context_size: i32,
    threads: i32,
    use_gpu: bool,
    gpu_layers: i32,
) -> u64 {
    let gpu = GpuRequest { enabled: use_gpu, layers: gpu_layers };
    create_session(model_path, context_size, threads, gpu)
}

unsafe fn create_session(model_path: *const c_char, context_size: i32, threads: i32, gpu: GpuRequest) -> u64 {
    let Some(path) = str_arg(model_path, "model_path") else {
        return 0;
    };
    let rt = runtime();
    let options = rt.session_options(context_size, threads);

    match rt.try_create_session(path, options, gpu) {
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

#[no_mangle]
pub extern "C" fn gg_edge_session_is_using_gpu(handle: u64) -> bool {
    runtime().is_using_gpu(handle)
}

#[no_mangle]
pub extern "C" fn gg_edge_session_gpu_layers(handle: u64) -> i32 {
    runtime().gpu_layers(handle)
}

/// Generate text. Always returns an owned string (empty on failure) that
/// must be released with [`gg_edge_string_free`].
///
/// # Safety
/// `prompt` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_generate(
    handle: u64,
    prompt: *const c_char,
    max_tokens: i32,
    temperature: f32,
    top_p: f32,
    top_k: i32,
) -> *mut c_char {
    let text = match str_arg(prompt, "prompt") {
        Some(prompt) => {
            let params = GenerationParams::new(max_tokens, temperature, top_p, top_k);
            match runtime().try_generate(SessionHandle::from_raw(handle), prompt, &params) {
                Ok(outcome) => outcome.text,
                Err(e) => {
                    set_last_error(e.to_string());
                    String::new()
                }
            }
        }
        None => String::new(),
    };
    CString::new(text.replace('\0', "")).unwrap_or_default().into_raw()
}

/// Release a string returned by [`gg_edge_generate`]. Null is ignored.
///
/// # Safety
/// `s` must be null or a pointer obtained from `gg_edge_generate` that has
/// not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Stream generated text through `callbacks`. Exactly one of `on_complete`
/// or `on_error` fires, after every `on_token`.
///
/// # Safety
/// `prompt` must be null or a valid NUL-terminated string; `callbacks` must
/// be null or point to a valid [`GgStreamCallbacks`] for the whole call.
#[no_mangle]
pub unsafe extern "C" fn gg_edge_generate_stream(
    handle: u64,
    prompt: *const c_char,
    max_tokens: i32,
    temperature: f32,
    top_p: f32,
    top_k: i32,
    callbacks: *const GgStreamCallbacks,
) {
    let Some(callbacks) = callbacks.as_ref() else {
        set_last_error("null pointer argument: callbacks");
        return;
    };
    let mut sink = CallbackSink { callbacks };

    let Some(prompt) = str_arg(prompt, "prompt") else {
        sink.on_error("null or invalid prompt");
        return;
    };
    let params = GenerationParams::new(max_tokens, temperature, top_p, top_k);
    let _ = runtime().generate_streaming_cancellable(
        SessionHandle::from_raw(handle),
        prompt,
        &params,
        &mut sink,
        None,
    );
}

/// Release a generation session. Safe with 0 or an already-freed handle.
#[no_mangle]
pub extern "C" fn gg_edge_session_free(handle: u64) {
    runtime().free_session(handle);
}

/// Whether accelerated execution is available in this build and process.
#[no_mangle]
pub extern "C" fn gg_edge_gpu_available() -> bool {
    runtime().gpu_available()
}

/// Free every session and release the backend.
#[no_mangle]
pub extern "C" fn gg_edge_shutdown() {
    runtime().shutdown();
}
