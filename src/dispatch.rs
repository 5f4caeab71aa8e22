//! C8: the domain dispatcher — the generated entry/exit shim around every
//! traced API, and the activity-record shape it emits.
//!
//! Grounded directly on `roctracer.cpp`'s `HIP_ApiCallback`/`HIP_AsyncActivityCallback`
//! pairs: push correlation, invoke the ENTER callback, run the real call, invoke
//! the EXIT callback, emit an activity record if bound, pop correlation. The
//! process/thread id helpers use a raw `libc::syscall` for `gettid`, which has
//! no portable libc wrapper, rather than reaching for a crate.

use std::ffi::c_void;

use crate::callback;
use crate::control;
use crate::correlation;
use crate::domain::{Domain, Kind, OpCode, EXTERN_ID_OP};
use crate::error::Error;
use crate::pool::PoolHandle;
use crate::timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Enter,
    Exit,
}

/// The per-call data handed to callbacks. `args` holds the op's argument tuple
/// pre-encoded by the caller — generating one concrete struct per op is out
/// of scope for this core; callers that need typed access decode `args`
/// themselves using the op code.
#[repr(C)]
pub struct ApiData<'a> {
    pub correlation_id: u64,
    pub phase: Phase,
    pub domain: Domain,
    pub op: OpCode,
    pub args: &'a [u8],
}

/// The wire-level activity record written into a pool (§3). `Copy`, no
/// destructor, safe to byte-copy into an arena.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ActivityRecord {
    pub domain: Domain,
    pub op: OpCode,
    pub kind: Kind,
    pub process_id: u32,
    pub thread_id: u64,
    pub correlation_id: u64,
    pub begin_ns: u64,
    pub end_ns: u64,
    pub device_id: u32,
    pub queue_id: u32,
    /// `0` means "no external correlation id was active" (id 0 is otherwise
    /// unused by the public API, which never hands out 0 as a real id).
    pub external_id: u64,
    pub inline_blob_offset: usize,
    pub inline_blob_len: usize,
}

fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}

fn process_id() -> u32 {
    unsafe { libc::getpid() as u32 }
}

fn thread_id() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

/// Runs the pre-phase / real call / post-phase sequence for one traced
/// invocation (§4.8). `real_call` is the resolved runtime function (via C7);
/// `encode_enter`/`encode_exit` build the op's argument bytes lazily, only
/// when a callback is actually installed, so an unsubscribed op pays no
/// encoding cost.
pub fn invoke<R>(
    domain: Domain,
    op: OpCode,
    encode_enter: impl FnOnce() -> Vec<u8>,
    real_call: impl FnOnce() -> R,
    encode_exit: impl FnOnce(&R) -> Vec<u8>,
) -> R {
    let table = callback::table(domain);
    let activity_pool = control::activity_pool_for(domain, op);
    let has_callback = table.is_enabled(op);

    if !has_callback && activity_pool.is_none() {
        return real_call();
    }

    let correlation_id = correlation::push_internal();
    let begin_ns = timestamp::now_ns();

    if has_callback {
        let enter_args = encode_enter();
        let data = ApiData {
            correlation_id,
            phase: Phase::Enter,
            domain,
            op,
            args: &enter_args,
        };
        table.invoke(op, &data as *const ApiData as *const c_void);
    }

    let result = real_call();
    let end_ns = timestamp::now_ns();

    if has_callback {
        let exit_args = encode_exit(&result);
        let data = ApiData {
            correlation_id,
            phase: Phase::Exit,
            domain,
            op,
            args: &exit_args,
        };
        table.invoke(op, &data as *const ApiData as *const c_void);
    }

    if let Some(pool) = activity_pool {
        emit_activity(domain, op, correlation_id, begin_ns, end_ns, pool);
    }

    correlation::pop_internal();
    result
}

/// Emits the activity record for one completed call, weaving in the external
/// correlation id record when one is active. Both records are written as a
/// single pool reservation so they are contiguous and share `correlation_id`
/// (P9); the external record is written only from the EXIT phase of the call
/// that observes it, matching exit-only emission semantics.
fn emit_activity(domain: Domain, op: OpCode, correlation_id: u64, begin_ns: u64, end_ns: u64, pool: PoolHandle) {
    let mut buf = Vec::new();
    if let Some(external_id) = correlation::current_external() {
        let ext_record = ActivityRecord {
            domain: Domain::ExternalMarker,
            op: EXTERN_ID_OP,
            kind: 0,
            process_id: process_id(),
            thread_id: thread_id(),
            correlation_id,
            begin_ns,
            end_ns,
            device_id: 0,
            queue_id: 0,
            external_id,
            inline_blob_offset: 0,
            inline_blob_len: 0,
        };
        buf.extend_from_slice(as_bytes(&ext_record));
    }
    let record = ActivityRecord {
        domain,
        op,
        kind: 0,
        process_id: process_id(),
        thread_id: thread_id(),
        correlation_id,
        begin_ns,
        end_ns,
        device_id: 0,
        queue_id: 0,
        external_id: 0,
        inline_blob_offset: 0,
        inline_blob_len: 0,
    };
    buf.extend_from_slice(as_bytes(&record));

    if let Err(e) = crate::pool::write_bytes(pool, &buf) {
        log::warn!("activity record for {domain:?}/{op} dropped: {e}");
    }
}

/// Emits an activity record directly from an asynchronous device-side
/// completion (no ENTER/EXIT phases straddle it). If `kernel_name` is set it
/// is copied into the pool's inline-blob region and the record's blob fields
/// are fixed up to reference the copy.
pub fn emit_async_completion(
    domain: Domain,
    op: OpCode,
    correlation_id: u64,
    begin_ns: u64,
    end_ns: u64,
    device_id: u32,
    queue_id: u32,
    kernel_name: Option<&str>,
    pool: PoolHandle,
) -> Result<(), Error> {
    let record = ActivityRecord {
        domain,
        op,
        kind: 0,
        process_id: process_id(),
        thread_id: thread_id(),
        correlation_id,
        begin_ns,
        end_ns,
        device_id,
        queue_id,
        external_id: 0,
        inline_blob_offset: 0,
        inline_blob_len: 0,
    };

    match kernel_name {
        Some(name) => crate::pool::write_with_blob(pool, record, name.as_bytes(), |r, offset, len| {
            r.inline_blob_offset = offset;
            r.inline_blob_len = len;
        }),
        None => crate::pool::write_bytes(pool, as_bytes(&record)),
    }
}

/// Advances a pointer into a drained record buffer by exactly one
/// `sizeof(ActivityRecord)`, mirroring `roctracer_next_record`'s
/// `*next = record + 1`: pure pointer arithmetic, no bounds checking against
/// the buffer the caller is walking.
///
/// # Safety
/// `record` must point to a valid `ActivityRecord`. The returned pointer is
/// one past it; the caller is responsible for knowing whether that address
/// still lies within the buffer before dereferencing it.
pub unsafe fn next_record(record: *const ActivityRecord) -> *const ActivityRecord {
    record.add(1)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::control;

    #[test]
    fn unsubscribed_op_skips_correlation_push() {
        control::reset_for_test();
        let before = correlation::push_internal();
        correlation::pop_internal();
        let result = invoke(Domain::HostApi, 5, Vec::new, || 1 + 1, |_| Vec::new());
        let after = correlation::push_internal();
        correlation::pop_internal();
        assert_eq!(result, 2);
        assert_eq!(after, before + 1, "no correlation id should have been burned by the unsubscribed call");
    }

    #[test]
    fn subscribed_op_invokes_enter_and_exit() {
        control::reset_for_test();
        static HITS: AtomicUsize = AtomicUsize::new(0);
        unsafe fn cb(_d: Domain, _op: OpCode, data: *const c_void, _arg: *mut c_void) {
            let data = &*(data as *const ApiData);
            assert!(matches!(data.phase, Phase::Enter | Phase::Exit));
            HITS.fetch_add(1, Ordering::SeqCst);
        }
        callback::table(Domain::HostApi).set(6, cb, std::ptr::null_mut());
        let _ = invoke(Domain::HostApi, 6, Vec::new, || (), |_| Vec::new());
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
        callback::table(Domain::HostApi).clear(6);
    }

    #[test]
    fn activity_and_external_id_share_one_reservation() {
        control::reset_for_test();
        let seen = Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));
        let seen2 = Arc::clone(&seen);
        let pool = crate::pool::open(
            crate::pool::PoolConfig {
                half_size: 4096,
                high_water: 4096,
            },
            Arc::new(move |buf: &[u8]| seen2.lock().unwrap().extend_from_slice(buf)),
            false,
        )
        .unwrap();
        control::enable_op_activity(Domain::HostApi, 7, Some(pool)).unwrap();
        correlation::push_external(42);
        let _ = invoke(Domain::HostApi, 7, Vec::new, || (), |_| Vec::new());
        correlation::pop_external().unwrap();
        crate::pool::flush(Some(pool)).unwrap();

        let bytes = seen.lock().unwrap();
        let record_size = std::mem::size_of::<ActivityRecord>();
        assert_eq!(bytes.len(), record_size * 2);
        let ext = unsafe { &*(bytes.as_ptr() as *const ActivityRecord) };
        let act = unsafe { &*(bytes.as_ptr().add(record_size) as *const ActivityRecord) };
        assert_eq!(ext.domain, Domain::ExternalMarker);
        assert_eq!(ext.external_id, 42);
        assert_eq!(act.domain, Domain::HostApi);
        assert_eq!(act.correlation_id, ext.correlation_id);
        control::disable_op_activity(Domain::HostApi, 7).unwrap();
        crate::pool::close(Some(pool)).unwrap();
    }

    #[test]
    fn next_record_advances_by_one_record_width() {
        let a = ActivityRecord {
            domain: Domain::HostApi,
            op: 1,
            kind: 0,
            process_id: 1,
            thread_id: 1,
            correlation_id: 10,
            begin_ns: 0,
            end_ns: 0,
            device_id: 0,
            queue_id: 0,
            external_id: 0,
            inline_blob_offset: 0,
            inline_blob_len: 0,
        };
        let b = ActivityRecord {
            correlation_id: 20,
            ..a
        };
        let buf = [a, b];
        let first = &buf[0] as *const ActivityRecord;
        let second = unsafe { next_record(first) };
        assert_eq!(second, &buf[1] as *const ActivityRecord);
        assert_eq!(unsafe { (*second).correlation_id }, 20);
    }
}
