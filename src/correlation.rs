//! C2: the correlation-identifier subsystem.
//!
//! Grounded on `roctracer.cpp`'s process-wide `next_id` atomic plus its
//! thread-local external-correlation stack (`roctracer_push/pop_external_correlation_id`).
//! `S_internal`/`S_external` are rendered as `RefCell<Vec<u64>>` thread-locals rather
//! than raw per-thread arrays, matching idiomatic Rust for single-owner,
//! thread-confined state.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static INTERNAL_STACK: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
    static EXTERNAL_STACK: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Atomically allocates the next correlation id and pushes it on this thread's
/// internal stack. Id 0 is never allocated (reserved for "unset").
pub fn push_internal() -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    INTERNAL_STACK.with(|s| s.borrow_mut().push(id));
    id
}

/// Pops the top of this thread's internal stack. An empty stack here means a
/// post-hook ran without a matching pre-hook (I2 violation) — a dispatcher bug,
/// not a reportable caller error, so it is fatal rather than surfaced as `Error`.
pub fn pop_internal() -> u64 {
    INTERNAL_STACK
        .with(|s| s.borrow_mut().pop())
        .expect("pop_internal called with an empty internal correlation stack (I2 violation)")
}

pub fn push_external(id: u64) {
    EXTERNAL_STACK.with(|s| s.borrow_mut().push(id));
}

/// Pops the external-correlation stack; `Err(MismatchedExternalCorrelationId)` on
/// underflow, matching `roctracer_pop_external_correlation_id`'s `*last_id = 0`
/// contract (the caller sees `0` alongside the error via `unwrap_or(0)` at the
/// call site in `control::pop_external_correlation_id`).
pub fn pop_external() -> Result<u64, Error> {
    EXTERNAL_STACK
        .with(|s| s.borrow_mut().pop())
        .ok_or_else(|| crate::error::record(Error::MismatchedExternalCorrelationId))
}

/// Peeks the top of this thread's external stack without popping it.
pub fn current_external() -> Option<u64> {
    EXTERNAL_STACK.with(|s| s.borrow().last().copied())
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    NEXT_ID.store(1, Ordering::SeqCst);
    INTERNAL_STACK.with(|s| s.borrow_mut().clear());
    EXTERNAL_STACK.with(|s| s.borrow_mut().clear());
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn internal_ids_are_monotonic_and_lifo() {
        reset_for_test();
        let a = push_internal();
        let b = push_internal();
        assert!(a < b);
        assert_eq!(pop_internal(), b);
        assert_eq!(pop_internal(), a);
    }

    #[test]
    fn external_underflow_is_mismatched() {
        reset_for_test();
        let err = pop_external().unwrap_err();
        assert_eq!(err.status(), crate::error::Status::MismatchedExternalCorrelationId);
    }

    #[test]
    fn external_push_pop_round_trips() {
        reset_for_test();
        push_external(42);
        assert_eq!(current_external(), Some(42));
        assert_eq!(pop_external().unwrap(), 42);
        assert_eq!(current_external(), None);
    }

    #[test]
    #[should_panic(expected = "I2 violation")]
    fn pop_internal_on_empty_stack_is_fatal() {
        reset_for_test();
        pop_internal();
    }
}
