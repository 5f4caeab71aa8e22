//! C11 (supplemented): application-supplied annotation ranges.
//!
//! Grounded directly on `roctx.cpp`: a
//! thread-local nesting counter for push/pop (never panics on imbalance — pop
//! on an empty nest returns `-1`, matching `roctxRangePop`'s `if
//! (nested_range_level == 0) return -1;`), and a separate process-wide atomic
//! counter for start/stop range handles (`start_stop_range_id`), disjoint from
//! the correlation-id counter in [`crate::correlation`].
//!
//! Dispatch reuses [`crate::dispatch::invoke`] with a no-op "real call" — there
//! is no underlying runtime function to forward to, the annotation *is* the
//! call, so the ENTER/EXIT pair brackets nothing but the two callback
//! invocations.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch;
use crate::domain::Domain;

const MARK: u32 = 0;
const RANGE_PUSH: u32 = 1;
const RANGE_POP: u32 = 2;
const RANGE_START: u32 = 3;
const RANGE_STOP: u32 = 4;

thread_local! {
    static NESTING_DEPTH: Cell<i32> = const { Cell::new(0) };
}

static NEXT_RANGE_HANDLE: AtomicU64 = AtomicU64::new(1);

pub fn mark(message: &str) {
    let bytes = message.as_bytes().to_vec();
    let bytes_out = bytes.clone();
    dispatch::invoke(Domain::Annotation, MARK, move || bytes, || (), move |_| bytes_out);
}

/// Returns the pre-increment nesting depth, per `roctxRangePushA`.
pub fn range_push(message: &str) -> i32 {
    let bytes = message.as_bytes().to_vec();
    let bytes_out = bytes.clone();
    dispatch::invoke(Domain::Annotation, RANGE_PUSH, move || bytes, || (), move |_| bytes_out);
    NESTING_DEPTH.with(|d| {
        let cur = d.get();
        d.set(cur + 1);
        cur
    })
}

/// Returns the post-decrement depth, or `-1` if already at zero.
pub fn range_pop() -> i32 {
    dispatch::invoke(Domain::Annotation, RANGE_POP, Vec::new, || (), |_| Vec::new());
    NESTING_DEPTH.with(|d| {
        let cur = d.get();
        if cur == 0 {
            -1
        } else {
            d.set(cur - 1);
            cur - 1
        }
    })
}

/// Allocates a range handle from `NEXT_RANGE_HANDLE` — never the same sequence
/// as a correlation id.
pub fn range_start(message: &str) -> u64 {
    let handle = NEXT_RANGE_HANDLE.fetch_add(1, Ordering::SeqCst);
    let bytes = message.as_bytes().to_vec();
    dispatch::invoke(
        Domain::Annotation,
        RANGE_START,
        move || bytes,
        || (),
        move |_| handle.to_le_bytes().to_vec(),
    );
    handle
}

pub fn range_stop(handle: u64) {
    dispatch::invoke(
        Domain::Annotation,
        RANGE_STOP,
        move || handle.to_le_bytes().to_vec(),
        || (),
        |_| Vec::new(),
    );
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    NESTING_DEPTH.with(|d| d.set(0));
    NEXT_RANGE_HANDLE.store(1, Ordering::SeqCst);
}
