//! C4: the subscription journal — a durable record of live subscriptions, used to
//! replay them across `stop()`/`start()` (I5).
//!
//! Grounded on `roctracer.cpp`'s `cb_journal`/`act_journal` statics (`Journal<T>`),
//! which are consulted by `roctracer_enable_callback_impl`/`roctracer_start` to
//! reinstall every subscription after a stop without touching the journal itself
//! on `stop()`.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;

use crate::callback::RawFn;
use crate::domain::{Domain, OpCode};
use crate::pool::PoolHandle;

#[derive(Clone, Copy)]
pub struct CallbackEntry {
    pub func: RawFn,
    pub arg: *mut c_void,
}

// Safety: `arg` is an opaque user pointer forwarded verbatim to the callback
// that owns it; the journal never dereferences it, only stores/copies it under
// its own mutex, the same way the callback table does.
unsafe impl Send for CallbackEntry {}

#[derive(Clone, Copy)]
pub struct ActivityEntry {
    pub pool: PoolHandle,
}

struct Journal {
    callbacks: Mutex<HashMap<(Domain, OpCode), CallbackEntry>>,
    activities: Mutex<HashMap<(Domain, OpCode), ActivityEntry>>,
}

static JOURNAL: Journal = Journal {
    callbacks: Mutex::new(HashMap::new()),
    activities: Mutex::new(HashMap::new()),
};

pub fn insert_callback(domain: Domain, op: OpCode, func: RawFn, arg: *mut c_void) {
    JOURNAL
        .callbacks
        .lock()
        .unwrap()
        .insert((domain, op), CallbackEntry { func, arg });
}

pub fn remove_callback(domain: Domain, op: OpCode) {
    JOURNAL.callbacks.lock().unwrap().remove(&(domain, op));
}

pub fn insert_activity(domain: Domain, op: OpCode, pool: PoolHandle) {
    JOURNAL
        .activities
        .lock()
        .unwrap()
        .insert((domain, op), ActivityEntry { pool });
}

pub fn remove_activity(domain: Domain, op: OpCode) {
    JOURNAL.activities.lock().unwrap().remove(&(domain, op));
}

pub fn for_each_callback(mut visitor: impl FnMut(Domain, OpCode, CallbackEntry)) {
    let map = JOURNAL.callbacks.lock().unwrap();
    for (&(domain, op), &entry) in map.iter() {
        visitor(domain, op, entry);
    }
}

pub fn for_each_activity(mut visitor: impl FnMut(Domain, OpCode, ActivityEntry)) {
    let map = JOURNAL.activities.lock().unwrap();
    for (&(domain, op), &entry) in map.iter() {
        visitor(domain, op, entry);
    }
}

/// Every `(domain, op)` whose activity subscription is bound to `pool` — used by
/// `close_pool` (P8) to know exactly which subscriptions to tear down.
pub fn activities_bound_to(pool: PoolHandle) -> Vec<(Domain, OpCode)> {
    JOURNAL
        .activities
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, e)| e.pool == pool)
        .map(|(&k, _)| k)
        .collect()
}

pub fn activity_count() -> usize {
    JOURNAL.activities.lock().unwrap().len()
}

pub fn callback_count() -> usize {
    JOURNAL.callbacks.lock().unwrap().len()
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    JOURNAL.callbacks.lock().unwrap().clear();
    JOURNAL.activities.lock().unwrap().clear();
}

#[cfg(test)]
mod test {
    use super::*;

    unsafe fn noop(_d: Domain, _op: OpCode, _data: *const c_void, _arg: *mut c_void) {}

    #[test]
    fn insert_remove_round_trips() {
        reset_for_test();
        insert_callback(Domain::HostApi, 0, noop, std::ptr::null_mut());
        assert_eq!(callback_count(), 1);
        remove_callback(Domain::HostApi, 0);
        assert_eq!(callback_count(), 0);
    }

    #[test]
    fn activities_bound_to_pool_are_found() {
        reset_for_test();
        insert_activity(Domain::DeviceOps, 1, PoolHandle(7));
        insert_activity(Domain::DeviceOps, 2, PoolHandle(7));
        insert_activity(Domain::DeviceOps, 3, PoolHandle(9));
        let mut found = activities_bound_to(PoolHandle(7));
        found.sort_by_key(|&(_, op)| op);
        assert_eq!(found, vec![(Domain::DeviceOps, 1), (Domain::DeviceOps, 2)]);
    }
}
