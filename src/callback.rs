//! C3: the per-(domain,op) callback table.
//!
//! Grounded on `roctracer.cpp`'s per-domain `CallbackTable` (instantiated once per
//! domain, e.g. `HIP_cb_table`) and the reader/writer split documented in
//! `util/callback_table.h` usage from `roctx.cpp` (`callbacks.Set`/`callbacks.Invoke`):
//! many concurrent readers on the hot path, a small mutex serializing writers
//! against each other but never against readers. Rendered here with
//! `AtomicUsize`/`AtomicPtr` slots instead of the original's raw atomic pointer
//! pair, since Rust cannot put a function pointer directly in an `AtomicPtr`.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::domain::{Domain, OpCode, ALL_DOMAINS};

/// Signature every subscriber callback implements. `data` points at a
/// domain-specific `ApiData` (owned by [`crate::dispatch`]); `arg` is the raw
/// user pointer supplied at `enable_*_callback` time.
pub type RawFn = unsafe fn(Domain, OpCode, *const c_void, *mut c_void);

struct Slot {
    func: AtomicUsize,
    arg: AtomicPtr<c_void>,
}

impl Slot {
    const fn empty() -> Self {
        Slot {
            func: AtomicUsize::new(0),
            arg: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

pub struct CallbackTable {
    domain: Domain,
    slots: Box<[Slot]>,
    write_lock: Mutex<()>,
}

impl CallbackTable {
    fn new(domain: Domain) -> Self {
        let slots = (0..domain.op_count()).map(|_| Slot::empty()).collect();
        CallbackTable {
            domain,
            slots,
            write_lock: Mutex::new(()),
        }
    }

    /// Installs `(fn, arg)` for `op`, replacing any prior subscription. Not an
    /// error to overwrite — the journal applies the same replace-silently rule.
    pub fn set(&self, op: OpCode, f: RawFn, arg: *mut c_void) {
        let _guard = self.write_lock.lock().unwrap();
        let slot = &self.slots[op as usize];
        // Publish the arg before the function pointer: a reader that observes a
        // non-null `func` via acquire is guaranteed to see the matching `arg`.
        slot.arg.store(arg, Ordering::Relaxed);
        slot.func.store(f as usize, Ordering::Release);
        log::debug!("{:?} op {op}: callback installed", self.domain);
    }

    pub fn clear(&self, op: OpCode) {
        let _guard = self.write_lock.lock().unwrap();
        let slot = &self.slots[op as usize];
        slot.func.store(0, Ordering::Release);
        slot.arg.store(std::ptr::null_mut(), Ordering::Relaxed);
        log::debug!("{:?} op {op}: callback cleared", self.domain);
    }

    pub fn is_enabled(&self, op: OpCode) -> bool {
        self.slots[op as usize].func.load(Ordering::Acquire) != 0
    }

    /// No-op if no callback is installed. `data` is forwarded to the installed
    /// function verbatim as an opaque pointer.
    pub fn invoke(&self, op: OpCode, data: *const c_void) {
        let slot = &self.slots[op as usize];
        let raw = slot.func.load(Ordering::Acquire);
        if raw == 0 {
            return;
        }
        let arg = slot.arg.load(Ordering::Relaxed);
        let f: RawFn = unsafe { std::mem::transmute(raw) };
        unsafe { f(self.domain, op, data, arg) };
    }
}

static TABLES: OnceLock<Vec<CallbackTable>> = OnceLock::new();

fn domain_index(domain: Domain) -> usize {
    ALL_DOMAINS.iter().position(|&d| d == domain).expect("closed domain enum")
}

pub fn table(domain: Domain) -> &'static CallbackTable {
    let tables = TABLES.get_or_init(|| ALL_DOMAINS.iter().map(|&d| CallbackTable::new(d)).collect());
    &tables[domain_index(domain)]
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    if let Some(tables) = TABLES.get() {
        for t in tables {
            for op in 0..t.slots.len() as OpCode {
                t.clear(op);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static HITS: AtomicUsize = AtomicUsize::new(0);

    unsafe fn bump(_d: Domain, _op: OpCode, _data: *const c_void, _arg: *mut c_void) {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn set_invoke_clear() {
        reset_for_test();
        HITS.store(0, Ordering::SeqCst);
        let t = table(Domain::HostApi);
        assert!(!t.is_enabled(0));
        t.set(0, bump, std::ptr::null_mut());
        assert!(t.is_enabled(0));
        t.invoke(0, std::ptr::null());
        t.invoke(0, std::ptr::null());
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
        t.clear(0);
        assert!(!t.is_enabled(0));
        t.invoke(0, std::ptr::null());
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn overwrite_is_not_an_error() {
        reset_for_test();
        let t = table(Domain::HostApi);
        t.set(1, bump, std::ptr::null_mut());
        t.set(1, bump, std::ptr::null_mut());
        assert!(t.is_enabled(1));
    }
}
