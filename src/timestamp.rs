//! C1: monotonic nanosecond timestamps shared across every record.
//!
//! Thin libc syscall wrapper: call the libc function, check the return, map
//! failure to an error. Here the call cannot fail on any platform the crate
//! supports, so the wrapper is a direct, wait-free function rather than a
//! `Result`-returning one.

use std::mem::MaybeUninit;

/// Nanoseconds from `CLOCK_MONOTONIC`. Wait-free, lock-free, callable from any
/// thread including inside a dispatcher hook. Non-decreasing within one thread.
pub fn now_ns() -> u64 {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // CLOCK_MONOTONIC never fails for a valid `timespec*` on a supported target.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()) };
    debug_assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    let ts = unsafe { ts.assume_init() };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn non_decreasing() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
