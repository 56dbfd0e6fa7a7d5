// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thread-local last-error slot for the C ABI.

use std::cell::RefCell;
use std::ffi::{c_char, CString};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record `message` as this thread's last error.
pub(crate) fn set_last_error(message: impl Into<String>) {
    let mut message = message.into();
    message.retain(|c| c != '\0');
    let message = CString::new(message).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message of the last failed call on this thread, or null.
///
/// The pointer stays valid until the next failing call or
/// `gg_edge_clear_last_error` on the same thread. Do not free it.
#[no_mangle]
pub extern "C" fn gg_edge_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(std::ptr::null(), |msg| msg.as_ptr()))
}

/// Clear this thread's last error.
#[no_mangle]
pub extern "C" fn gg_edge_clear_last_error() {
    clear_last_error();
}
