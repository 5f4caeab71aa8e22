//! C9 (control plane) + C10 (external API): start/stop gate, pool lifecycle,
//! subscription management, the on-load contract, and the free-function
//! surface of §6.
//!
//! Grounded on `roctracer.cpp` end to end: `roctracer_enable_callback_impl`/
//! `_disable_callback_impl` (journal-then-apply ordering), `roctracer_start`/
//! `roctracer_stop` (disable-activities-before-callbacks on stop, reverse on
//! start — §4.4), `roctracer_open_pool_impl`/`_close_pool_impl` (default-pool
//! double-definition / idempotent-close semantics), `roctracer_enable_domain_*`
//! (swallowing `NOT_IMPLEMENTED` per op), and the `extern "C" OnLoad`/`OnUnload`
//! pair with `HSA_AMD_TOOL_PRIORITY`.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::callback::{self, RawFn};
use crate::domain::{Domain, OpCode, ALL_DOMAINS};
use crate::error::Error;
use crate::journal;
use crate::pool::{self, ConsumerFn, PoolConfig, PoolHandle};
use crate::timestamp;

/// The priority this library registers itself at when a host runtime's tool
/// interface supports multiple simultaneous tools — mirrors the original's
/// `HSA_AMD_TOOL_PRIORITY`, generalized to any accelerator runtime rather than
/// one vendor's HSA layer.
pub const TOOL_PRIORITY: u32 = 50;

pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;

// --- activity fast-path table (mirrors callback.rs's reader/writer split) ---

struct ActivityTable {
    slots: Box<[AtomicU64]>,
}

impl ActivityTable {
    fn new(domain: Domain) -> Self {
        ActivityTable {
            slots: (0..domain.op_count()).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn set(&self, op: OpCode, pool: PoolHandle) {
        self.slots[op as usize].store(pool.0 + 1, Ordering::Release);
    }

    fn clear(&self, op: OpCode) {
        self.slots[op as usize].store(0, Ordering::Release);
    }

    fn get(&self, op: OpCode) -> Option<PoolHandle> {
        let raw = self.slots[op as usize].load(Ordering::Acquire);
        if raw == 0 {
            None
        } else {
            Some(PoolHandle(raw - 1))
        }
    }
}

static ACTIVITY_TABLES: OnceLock<Vec<ActivityTable>> = OnceLock::new();

fn activity_tables() -> &'static Vec<ActivityTable> {
    ACTIVITY_TABLES.get_or_init(|| ALL_DOMAINS.iter().map(|&d| ActivityTable::new(d)).collect())
}

fn domain_index(domain: Domain) -> usize {
    ALL_DOMAINS.iter().position(|&d| d == domain).expect("closed domain enum")
}

pub(crate) fn activity_pool_for(domain: Domain, op: OpCode) -> Option<PoolHandle> {
    activity_tables()[domain_index(domain)].get(op)
}

fn check_domain_op(domain: Domain, op: OpCode) -> Result<(), Error> {
    if !domain.contains_op(op) {
        return Err(crate::error::record(Error::InvalidArgument(format!(
            "op {op} out of range for domain {domain:?}"
        ))));
    }
    Ok(())
}

// --- start/stop gate ---

static RUNNING: AtomicBool = AtomicBool::new(true);
static CONTROL_LOCK: Mutex<()> = Mutex::new(());

pub fn is_running() -> bool {
    RUNNING.load(Ordering::Acquire)
}

/// `stop()`: activities disabled before callbacks (§4.4 ordering) so a
/// callback can never enqueue into an activity subscription that was already
/// torn down. Idempotent; does not touch the journal.
pub fn stop() {
    let _guard = CONTROL_LOCK.lock().unwrap();
    if !RUNNING.swap(false, Ordering::AcqRel) {
        return;
    }
    journal::for_each_activity(|domain, op, _entry| {
        activity_tables()[domain_index(domain)].clear(op);
    });
    journal::for_each_callback(|domain, op, _entry| {
        callback::table(domain).clear(op);
    });
    if let Some(cb) = properties().lock().unwrap().stop_cb {
        cb();
    }
    log::debug!("tracing stopped");
}

/// `start()`: replays the journal, callbacks first then activities (§4.4).
/// Idempotent.
pub fn start() {
    let _guard = CONTROL_LOCK.lock().unwrap();
    if RUNNING.swap(true, Ordering::AcqRel) {
        return;
    }
    journal::for_each_callback(|domain, op, entry| {
        callback::table(domain).set(op, entry.func, entry.arg);
    });
    journal::for_each_activity(|domain, op, entry| {
        activity_tables()[domain_index(domain)].set(op, entry.pool);
    });
    if let Some(cb) = properties().lock().unwrap().start_cb {
        cb();
    }
    log::debug!("tracing started");
}

// --- op/domain callback subscription ---

pub fn enable_op_callback(domain: Domain, op: OpCode, func: RawFn, arg: *mut c_void) -> Result<(), Error> {
    check_domain_op(domain, op)?;
    journal::insert_callback(domain, op, func, arg);
    if is_running() {
        callback::table(domain).set(op, func, arg);
    }
    Ok(())
}

pub fn disable_op_callback(domain: Domain, op: OpCode) -> Result<(), Error> {
    check_domain_op(domain, op)?;
    journal::remove_callback(domain, op);
    callback::table(domain).clear(op);
    Ok(())
}

pub fn enable_domain_callback(domain: Domain, func: RawFn, arg: *mut c_void) -> Result<(), Error> {
    for op in 0..domain.op_count() as OpCode {
        enable_op_callback(domain, op, func, arg)?;
    }
    Ok(())
}

pub fn disable_domain_callback(domain: Domain) -> Result<(), Error> {
    for op in 0..domain.op_count() as OpCode {
        disable_op_callback(domain, op)?;
    }
    Ok(())
}

// --- pool lifecycle ---

pub fn open_pool(config: PoolConfig, consumer: ConsumerFn, as_default: bool) -> Result<PoolHandle, Error> {
    pool::open(config, consumer, as_default)
}

pub fn close_pool(handle: Option<PoolHandle>) -> Result<(), Error> {
    if let Some(h) = handle.or_else(pool::default_handle) {
        for (domain, op) in journal::activities_bound_to(h) {
            activity_tables()[domain_index(domain)].clear(op);
        }
    }
    pool::close(handle)
}

pub fn default_pool() -> Option<PoolHandle> {
    pool::default_handle()
}

pub fn default_pool_expl(new: Option<PoolHandle>) -> Option<PoolHandle> {
    pool::default_handle_expl(new)
}

// --- op/domain activity subscription ---

pub fn enable_op_activity(domain: Domain, op: OpCode, pool: Option<PoolHandle>) -> Result<(), Error> {
    check_domain_op(domain, op)?;
    let target = match pool.or_else(pool::default_handle) {
        Some(h) => h,
        None => return Err(crate::error::record(Error::DefaultPoolUndefined)),
    };
    journal::insert_activity(domain, op, target);
    if is_running() {
        activity_tables()[domain_index(domain)].set(op, target);
    }
    Ok(())
}

pub fn disable_op_activity(domain: Domain, op: OpCode) -> Result<(), Error> {
    check_domain_op(domain, op)?;
    journal::remove_activity(domain, op);
    activity_tables()[domain_index(domain)].clear(op);
    Ok(())
}

/// Fan-out over every op in `domain`; ops the domain doesn't implement as an
/// activity surface return `NotImplemented` and are swallowed so the overall
/// call still succeeds (§7).
pub fn enable_domain_activity(domain: Domain, pool: Option<PoolHandle>) -> Result<(), Error> {
    for op in 0..domain.op_count() as OpCode {
        match enable_op_activity(domain, op, pool) {
            Ok(()) | Err(Error::NotImplemented) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn disable_domain_activity(domain: Domain) -> Result<(), Error> {
    for op in 0..domain.op_count() as OpCode {
        match disable_op_activity(domain, op) {
            Ok(()) | Err(Error::NotImplemented) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn flush_activity(pool: Option<PoolHandle>) -> Result<(), Error> {
    pool::flush(pool)
}

pub fn get_timestamp() -> u64 {
    timestamp::now_ns()
}

// --- external correlation ---

pub fn push_external_correlation_id(id: u64) {
    crate::correlation::push_external(id);
}

pub fn pop_external_correlation_id() -> (Result<(), Error>, u64) {
    match crate::correlation::pop_external() {
        Ok(id) => (Ok(()), id),
        Err(e) => (Err(e), 0),
    }
}

// --- properties (only EXT_API consumes start/stop hooks) ---

#[derive(Clone, Copy, Default)]
pub struct ExtApiProperties {
    pub start_cb: Option<fn()>,
    pub stop_cb: Option<fn()>,
}

static PROPERTIES: OnceLock<Mutex<ExtApiProperties>> = OnceLock::new();

fn properties() -> &'static Mutex<ExtApiProperties> {
    PROPERTIES.get_or_init(|| Mutex::new(ExtApiProperties::default()))
}

pub fn set_properties(domain: Domain, props: ExtApiProperties) -> Result<(), Error> {
    if domain != Domain::ExternalMarker {
        return Err(crate::error::record(Error::NotImplemented));
    }
    *properties().lock().unwrap() = props;
    Ok(())
}

// --- on-load contract ---

/// Called by the host runtime during its own initialization. Returns `true`
/// on successful registration; the host is expected to route its own API
/// table's entry points through [`crate::dispatch::invoke`] afterward.
pub fn on_load() -> bool {
    log::info!("accel-trace on-load (priority {TOOL_PRIORITY})");
    true
}

/// Called by the host runtime at shutdown; tears down every live subscription
/// without touching the journal (same effect as `stop()` would have, plus it
/// is not expected to be followed by a `start()`).
pub fn on_unload() {
    stop();
    log::info!("accel-trace on-unload");
}

#[cfg(any(test, feature = "test-support"))]
pub fn reset_for_test() {
    crate::correlation::reset_for_test();
    crate::callback::reset_for_test();
    crate::journal::reset_for_test();
    crate::pool::reset_for_test();
    crate::error::reset_for_test();
    crate::annotation::reset_for_test();
    crate::buffer::reset_for_test();
    if let Some(tables) = ACTIVITY_TABLES.get() {
        for (idx, domain) in ALL_DOMAINS.iter().enumerate() {
            for op in 0..domain.op_count() as OpCode {
                tables[idx].clear(op);
            }
        }
    }
    *properties().lock().unwrap() = ExtApiProperties::default();
    RUNNING.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering as Ord};
    use std::sync::Arc;

    use super::*;

    static HITS: AtomicUsize = AtomicUsize::new(0);

    unsafe fn bump(_d: Domain, _op: OpCode, _data: *const c_void, _arg: *mut c_void) {
        HITS.fetch_add(1, Ord::SeqCst);
    }

    #[test]
    fn stop_start_replays_journal() {
        reset_for_test();
        HITS.store(0, Ord::SeqCst);
        enable_op_callback(Domain::HostApi, 0, bump, std::ptr::null_mut()).unwrap();
        assert!(callback::table(Domain::HostApi).is_enabled(0));

        stop();
        assert!(!callback::table(Domain::HostApi).is_enabled(0));
        assert_eq!(journal::callback_count(), 1, "journal unaffected by stop");

        start();
        assert!(callback::table(Domain::HostApi).is_enabled(0));
        assert_eq!(journal::callback_count(), 1);
    }

    #[test]
    fn enable_domain_activity_swallows_not_implemented_but_not_other_errors() {
        reset_for_test();
        // No default pool and no explicit pool: every op should surface
        // DefaultPoolUndefined, which must NOT be swallowed (only
        // NotImplemented is).
        let err = enable_domain_activity(Domain::Annotation, None).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::DefaultPoolUndefined);
    }

    #[test]
    fn close_pool_disables_bound_activities_only() {
        reset_for_test();
        let pool_a = open_pool(PoolConfig::default(), Arc::new(|_: &[u8]| {}), false).unwrap();
        let pool_b = open_pool(PoolConfig::default(), Arc::new(|_: &[u8]| {}), false).unwrap();
        enable_op_activity(Domain::DeviceOps, 0, Some(pool_a)).unwrap();
        enable_op_activity(Domain::DeviceOps, 1, Some(pool_b)).unwrap();

        close_pool(Some(pool_a)).unwrap();

        assert!(activity_pool_for(Domain::DeviceOps, 0).is_none());
        assert_eq!(activity_pool_for(Domain::DeviceOps, 1), Some(pool_b));
        close_pool(Some(pool_b)).unwrap();
    }

    #[test]
    fn close_pool_leaves_an_unrelated_callback_on_the_same_op_intact() {
        reset_for_test();
        HITS.store(0, Ord::SeqCst);
        let pool = open_pool(PoolConfig::default(), Arc::new(|_: &[u8]| {}), false).unwrap();
        enable_op_activity(Domain::DeviceOps, 0, Some(pool)).unwrap();
        enable_op_callback(Domain::DeviceOps, 0, bump, std::ptr::null_mut()).unwrap();

        close_pool(Some(pool)).unwrap();

        assert!(activity_pool_for(Domain::DeviceOps, 0).is_none(), "activity subscription must be cleared");
        assert!(
            callback::table(Domain::DeviceOps).is_enabled(0),
            "an unrelated callback subscription on the same op must survive close_pool (P8/I4)"
        );
        disable_op_callback(Domain::DeviceOps, 0).unwrap();
    }

    #[test]
    fn error_string_reflects_the_last_surfaced_control_error() {
        reset_for_test();
        crate::error::reset_for_test();
        let err = enable_op_activity(Domain::DeviceOps, 0, None).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::DefaultPoolUndefined);
        assert_eq!(crate::error::error_string(), "default pool undefined");
    }
}
