//! FFI bindings for Synheart Stride
//!
//! C-compatible entry points for the native host glue. All strings are
//! null-terminated UTF-8. Returned strings are allocated here and must be
//! released with `stride_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::DateTime;
use serde::Serialize;

use crate::bridge::{StepQueryResult, StepRecordsResult};
use crate::error::StepError;
use crate::reconcile::{apply_delta, park_pending};
use crate::record::{decode_record, encode_record};
use crate::types::{StepDelta, StepRecord, StepSource};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn json_or_null<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&StepError::from(e).to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Bridge payloads
// ============================================================================

/// Validate a bridge step query payload and return it in canonical form.
///
/// Error-only payloads are accepted and come back with zero steps and
/// timestamps filled in.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
/// - Returns NULL on error; call `stride_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn stride_decode_query_result(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json_str) = cstr_to_str(json) else {
        set_last_error("Invalid JSON string pointer");
        return ptr::null_mut();
    };

    match StepQueryResult::from_json(json_str) {
        Ok(result) => json_or_null(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Sum the samples of a bridge step-record payload.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns the total step count, or -1 on error (call `stride_last_error`).
///   A failed payload is an error.
#[no_mangle]
pub unsafe extern "C" fn stride_step_records_total(json: *const c_char) -> i64 {
    clear_last_error();

    let Some(json_str) = cstr_to_str(json) else {
        set_last_error("Invalid JSON string pointer");
        return -1;
    };

    match StepRecordsResult::from_json(json_str).and_then(StepRecordsResult::into_result) {
        Ok(result) => i64::try_from(result.total_steps()).unwrap_or(i64::MAX),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Step Ledger API
// ============================================================================

/// Opaque handle to a step record owned by the host
pub struct StrideLedgerHandle {
    record: StepRecord,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerSnapshot<'a> {
    total_steps_all_time: u64,
    steps_today: u32,
    pending_pedometer_steps: u32,
    last_step_date: Option<String>,
    last_active_source: &'a str,
}

/// Create a ledger from a persisted step record.
///
/// NULL or an unreadable payload yields an empty ledger; the reason for an
/// unreadable payload is available from `stride_last_error`.
///
/// # Safety
/// - `persisted_json` must be NULL or a valid null-terminated C string.
/// - Must be freed with `stride_ledger_free`.
#[no_mangle]
pub unsafe extern "C" fn stride_ledger_new(persisted_json: *const c_char) -> *mut StrideLedgerHandle {
    clear_last_error();

    let record = match cstr_to_str(persisted_json) {
        None => StepRecord::default(),
        Some(json) => match decode_record::<StepRecord>(json) {
            Ok(record) => record,
            Err(e) => {
                let err = StepError::DeserializationFailed {
                    key: "step_record".to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %err, "Starting ledger from defaults");
                set_last_error(&err.to_string());
                StepRecord::default()
            }
        },
    };

    Box::into_raw(Box::new(StrideLedgerHandle { record }))
}

/// Free a ledger.
///
/// # Safety
/// - `ledger` must be a pointer returned by `stride_ledger_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn stride_ledger_free(ledger: *mut StrideLedgerHandle) {
    if !ledger.is_null() {
        drop(Box::from_raw(ledger));
    }
}

/// Reconcile `steps` observed at `now_millis` (epoch milliseconds).
///
/// Returns 1 if the per-day counter was reset first, 0 otherwise, and -1 on
/// error. Zero steps is accepted and changes nothing.
///
/// # Safety
/// - `ledger` must be a valid pointer returned by `stride_ledger_new`.
/// - `source` must be a valid null-terminated C string naming a step source
///   (e.g. "FallbackPedometer").
#[no_mangle]
pub unsafe extern "C" fn stride_ledger_apply_delta(
    ledger: *mut StrideLedgerHandle,
    steps: u32,
    source: *const c_char,
    now_millis: i64,
) -> i32 {
    clear_last_error();

    if ledger.is_null() {
        set_last_error("Null ledger pointer");
        return -1;
    }
    let handle = &mut *ledger;

    let Some(source) = cstr_to_str(source).and_then(StepSource::parse) else {
        set_last_error("Invalid step source");
        return -1;
    };
    let Some(now) = DateTime::from_timestamp_millis(now_millis) else {
        set_last_error("Timestamp out of range");
        return -1;
    };
    let Some(delta) = StepDelta::new(steps) else {
        return 0;
    };

    let outcome = apply_delta(&mut handle.record, delta, source, now.date_naive());
    i32::from(outcome.day_rolled)
}

/// Hold pedometer steps until the next reconciliation.
///
/// # Safety
/// - `ledger` must be a valid pointer returned by `stride_ledger_new`.
#[no_mangle]
pub unsafe extern "C" fn stride_ledger_park_steps(ledger: *mut StrideLedgerHandle, steps: u32) -> i32 {
    clear_last_error();

    if ledger.is_null() {
        set_last_error("Null ledger pointer");
        return -1;
    }
    if let Some(delta) = StepDelta::new(steps) {
        park_pending(&mut (*ledger).record, delta);
    }
    0
}

/// Current totals as JSON.
///
/// # Safety
/// - `ledger` must be a valid pointer returned by `stride_ledger_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_ledger_snapshot(ledger: *const StrideLedgerHandle) -> *mut c_char {
    clear_last_error();

    if ledger.is_null() {
        set_last_error("Null ledger pointer");
        return ptr::null_mut();
    }
    let record = &(*ledger).record;

    json_or_null(&LedgerSnapshot {
        total_steps_all_time: record.total_steps_all_time,
        steps_today: record.steps_today,
        pending_pedometer_steps: record.pending_pedometer_steps,
        last_step_date: record
            .last_step_date
            .map(|d| d.format("%Y-%m-%d").to_string()),
        last_active_source: record.last_active_source.as_str(),
    })
}

/// The record in its persisted form, for the host's key-value store.
///
/// # Safety
/// - `ledger` must be a valid pointer returned by `stride_ledger_new`.
/// - Returns a newly allocated string that must be freed with `stride_free_string`.
#[no_mangle]
pub unsafe extern "C" fn stride_ledger_export(ledger: *const StrideLedgerHandle) -> *mut c_char {
    clear_last_error();

    if ledger.is_null() {
        set_last_error("Null ledger pointer");
        return ptr::null_mut();
    }

    match encode_record(&(*ledger).record) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Stride functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Stride function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn stride_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next Stride call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if the last call succeeded.
#[no_mangle]
pub unsafe extern "C" fn stride_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Stride library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn stride_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
