//! C6: the memory pool — a dual-half byte arena with a bulk-consumer callback.
//!
//! Grounded on `roctracer.cpp`'s pool lifecycle (`roctracer_open_pool_impl`/
//! `_close_pool_impl`, the default-pool slot, double-definition and
//! undefined-pool errors). Ownership follows the same `NonNull<u8>` + manual
//! `Drop` idiom used elsewhere in this crate for raw memory, allocated once
//! and sliced for the whole lifetime; the arena itself is heap memory via the
//! global allocator rather than `mmap`'d kernel memory, since there is no
//! file descriptor to share here — `std::alloc` stands in for
//! `libc::mmap`/`munmap`. The dedicated drain thread (§4.6) is a plain
//! `std::thread` fed by an `mpsc` channel, preferring direct OS primitives
//! over pulling in an async executor.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::error::Error;

/// Opaque identifier for an open pool. `0` is never issued, so it doubles as a
/// sentinel for "no pool" where convenient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolHandle(pub(crate) u64);

pub const DEFAULT_HALF_SIZE: usize = 512 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Size of each of the two halves, in bytes.
    pub half_size: usize,
    /// Swap the active half once its write cursor crosses this many bytes.
    pub high_water: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            half_size: DEFAULT_HALF_SIZE,
            high_water: DEFAULT_HALF_SIZE * 4 / 5,
        }
    }
}

/// The consumer callback: receives a contiguous byte range `[begin, end)`
/// holding every record flushed since the last invocation.
pub type ConsumerFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Half {
    ptr: NonNull<u8>,
    len: usize,
    cursor: AtomicUsize,
    /// Writers that have reserved space but not yet finished copying into it.
    /// The drainer spins on this hitting zero before reading the half, which
    /// is what turns "reservation" into "no torn records" (I3): a half is only
    /// ever handed to the consumer once every producer that claimed a byte
    /// range inside it has finished writing that range.
    in_flight: AtomicUsize,
}

impl Half {
    fn new(len: usize) -> Self {
        let layout = Layout::array::<u8>(len).unwrap();
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Half {
            ptr,
            len,
            cursor: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn as_slice(&self, up_to: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), up_to.min(self.len)) }
    }

    /// Reserves `n` bytes, returning the start offset, or `None` if `n` would
    /// overflow the half. Bumps `in_flight`; the caller must call
    /// [`Half::finish_write`] once the bytes are actually copied in.
    fn reserve(&self, n: usize) -> Option<usize> {
        let mut cur = self.cursor.load(Ordering::Relaxed);
        loop {
            let end = cur.checked_add(n)?;
            if end > self.len {
                return None;
            }
            match self
                .cursor
                .compare_exchange_weak(cur, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    self.in_flight.fetch_add(1, Ordering::AcqRel);
                    return Some(cur);
                }
                Err(actual) => cur = actual,
            }
        }
    }

    unsafe fn write_at(&self, offset: usize, bytes: &[u8]) {
        let dst = self.ptr.as_ptr().add(offset);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
    }

    fn finish_write(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn filled_len(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Blocks (spinning) until every in-flight writer into this half has
    /// finished. Only called by the drain thread against a half the producer
    /// side has already swapped away from.
    fn wait_quiescent(&self) {
        while self.in_flight.load(Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }
    }

    fn reset(&self) {
        self.cursor.store(0, Ordering::Release);
    }
}

impl Drop for Half {
    fn drop(&mut self) {
        let layout = Layout::array::<u8>(self.len).unwrap();
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

unsafe impl Send for Half {}
unsafe impl Sync for Half {}

enum DrainMsg {
    Flush(usize, Sender<()>),
    Close,
}

pub struct Pool {
    handle: PoolHandle,
    config: PoolConfig,
    halves: Arc<[Half; 2]>,
    active: AtomicUsize,
    swap_lock: Mutex<()>,
    closed: AtomicBool,
    drain_tx: Sender<DrainMsg>,
    drain_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    fn new(handle: PoolHandle, config: PoolConfig, consumer: ConsumerFn) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<DrainMsg>();
        let half_size = config.half_size;

        // Both Pool and the drain thread hold a clone of the same `Arc`, so
        // they address the identical two allocations; the drain thread only
        // ever touches the half the producer side has already swapped away
        // from, so there is no reader/writer race on a single half.
        let halves: Arc<[Half; 2]> = Arc::new([Half::new(half_size), Half::new(half_size)]);
        let halves_for_thread = Arc::clone(&halves);
        let join = std::thread::Builder::new()
            .name(format!("accel-trace-pool-drain-{}", handle.0))
            .spawn(move || {
                for msg in rx {
                    match msg {
                        DrainMsg::Flush(idx, ack) => {
                            let half = &halves_for_thread[idx];
                            half.wait_quiescent();
                            let len = half.filled_len();
                            if len > 0 {
                                log::trace!("pool {}: draining {len} bytes from half {idx}", handle.0);
                                consumer(half.as_slice(len));
                            }
                            half.reset();
                            let _ = ack.send(());
                        }
                        DrainMsg::Close => break,
                    }
                }
            })
            .expect("spawn pool drain thread");

        Arc::new(Pool {
            handle,
            config,
            halves,
            active: AtomicUsize::new(0),
            swap_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            drain_tx: tx,
            drain_thread: Mutex::new(Some(join)),
        })
    }

    fn active_idx(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn maybe_swap(&self) {
        let idx = self.active_idx();
        if self.halves[idx].filled_len() >= self.config.high_water {
            self.swap(false);
        }
    }

    /// Swaps the active half, handing the filled one to the drain thread.
    /// `wait` blocks until the drain thread has returned from the consumer
    /// callback for that half (used by `flush()`/`close()`).
    fn swap(&self, wait: bool) {
        let _guard = self.swap_lock.lock().unwrap();
        let old = self.active_idx();
        let new = 1 - old;
        self.active.store(new, Ordering::Release);

        let (ack_tx, ack_rx) = mpsc::channel();
        if self.drain_tx.send(DrainMsg::Flush(old, ack_tx)).is_err() {
            return;
        }
        if wait {
            let _ = ack_rx.recv();
        }
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::error::record(Error::Generic("write on a closed pool".into())));
        }
        if bytes.len() > self.config.half_size {
            return Err(crate::error::record(Error::MemoryAllocation(format!(
                "record of {} bytes exceeds pool half size {}",
                bytes.len(),
                self.config.half_size
            ))));
        }
        loop {
            let idx = self.active_idx();
            if let Some(offset) = self.halves[idx].reserve(bytes.len()) {
                // I3: the drain thread waits for `in_flight` to hit zero before
                // reading a half at all, so this half is never consumed until
                // this write (and every other concurrent one) has completed.
                unsafe { self.halves[idx].write_at(offset, bytes) };
                self.halves[idx].finish_write();
                self.maybe_swap();
                return Ok(());
            }
            self.swap(true);
        }
    }

    /// Copies `record` then `blob` contiguously into the active half as one
    /// reservation, then calls `fixup` with the blob's offset (relative to the
    /// start of the reservation) and length so the record can be patched to
    /// reference it before either is serialized.
    pub fn write_with_blob<T: Copy>(
        &self,
        mut record: T,
        blob: &[u8],
        fixup: impl FnOnce(&mut T, usize, usize),
    ) -> Result<(), Error> {
        let record_len = std::mem::size_of::<T>();
        fixup(&mut record, record_len, blob.len());
        let mut combined = Vec::with_capacity(record_len + blob.len());
        combined.extend_from_slice(unsafe {
            std::slice::from_raw_parts(&record as *const T as *const u8, record_len)
        });
        combined.extend_from_slice(blob);
        self.write_bytes(&combined)
    }

    /// Forces a swap even below the watermark; blocks until the consumer has
    /// returned for the half that was active.
    pub fn flush(&self) {
        self.swap(true);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush();
        self.swap(true);
        let _ = self.drain_tx.send(DrainMsg::Close);
        if let Some(handle) = self.drain_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

struct Registry {
    pools: Mutex<std::collections::HashMap<u64, Arc<Pool>>>,
    next_handle: AtomicUsize,
    default_pool: Mutex<Option<PoolHandle>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        pools: Mutex::new(std::collections::HashMap::new()),
        next_handle: AtomicUsize::new(1),
        default_pool: Mutex::new(None),
    })
}

/// Opens a new pool. If `as_default` is set and a default pool already exists,
/// returns `DefaultPoolAlreadyDefined` and opens nothing.
pub fn open(config: PoolConfig, consumer: ConsumerFn, as_default: bool) -> Result<PoolHandle, Error> {
    let reg = registry();
    if as_default {
        let mut slot = reg.default_pool.lock().unwrap();
        if slot.is_some() {
            return Err(crate::error::record(Error::DefaultPoolAlreadyDefined));
        }
        let id = reg.next_handle.fetch_add(1, Ordering::Relaxed) as u64;
        let handle = PoolHandle(id);
        let pool = Pool::new(handle, config, consumer);
        reg.pools.lock().unwrap().insert(id, pool);
        *slot = Some(handle);
        log::debug!("pool {id} opened as default");
        Ok(handle)
    } else {
        let id = reg.next_handle.fetch_add(1, Ordering::Relaxed) as u64;
        let handle = PoolHandle(id);
        let pool = Pool::new(handle, config, consumer);
        reg.pools.lock().unwrap().insert(id, pool);
        log::debug!("pool {id} opened");
        Ok(handle)
    }
}

pub fn get(handle: PoolHandle) -> Option<Arc<Pool>> {
    registry().pools.lock().unwrap().get(&handle.0).cloned()
}

pub fn default_handle() -> Option<PoolHandle> {
    *registry().default_pool.lock().unwrap()
}

/// Swaps in `new` as the default pool (or clears it, if `new` is `None`),
/// returning the previous default.
pub fn default_handle_expl(new: Option<PoolHandle>) -> Option<PoolHandle> {
    let mut slot = registry().default_pool.lock().unwrap();
    std::mem::replace(&mut *slot, new)
}

/// `close_pool(None)` targets the default pool; a no-op if there is none.
/// `close_pool(Some(h))` on an unknown handle is also treated as a no-op —
/// closing is idempotent.
pub fn close(handle: Option<PoolHandle>) -> Result<(), Error> {
    let reg = registry();
    let target = match handle {
        Some(h) => h,
        None => match default_handle() {
            Some(h) => h,
            None => return Ok(()),
        },
    };

    let mut default_slot = reg.default_pool.lock().unwrap();
    if *default_slot == Some(target) {
        *default_slot = None;
    }
    drop(default_slot);

    let removed = reg.pools.lock().unwrap().remove(&target.0);
    if let Some(pool) = removed {
        for (domain, op) in crate::journal::activities_bound_to(target) {
            crate::journal::remove_activity(domain, op);
            log::debug!("pool {}: disabled activity {domain:?}/{op} on close", target.0);
        }
        pool.close();
    }
    Ok(())
}

pub fn flush(handle: Option<PoolHandle>) -> Result<(), Error> {
    let target = match handle.or_else(default_handle) {
        Some(h) => h,
        None => return Err(crate::error::record(Error::DefaultPoolUndefined)),
    };
    match get(target) {
        Some(pool) => {
            pool.flush();
            Ok(())
        }
        None => Ok(()),
    }
}

pub fn write_bytes(handle: PoolHandle, bytes: &[u8]) -> Result<(), Error> {
    match get(handle) {
        Some(pool) => pool.write_bytes(bytes),
        None => Err(crate::error::record(Error::Generic(format!("unknown pool handle {}", handle.0)))),
    }
}

pub fn write_with_blob<T: Copy>(
    handle: PoolHandle,
    record: T,
    blob: &[u8],
    fixup: impl FnOnce(&mut T, usize, usize),
) -> Result<(), Error> {
    match get(handle) {
        Some(pool) => pool.write_with_blob(record, blob, fixup),
        None => Err(crate::error::record(Error::Generic(format!("unknown pool handle {}", handle.0)))),
    }
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    let reg = registry();
    reg.pools.lock().unwrap().clear();
    *reg.default_pool.lock().unwrap() = None;
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize as Au;

    use super::*;

    #[test]
    fn write_and_flush_invokes_consumer_once() {
        reset_for_test();
        let hits = Arc::new(Au::new(0));
        let bytes_seen = Arc::new(Au::new(0));
        let hits2 = Arc::clone(&hits);
        let bytes2 = Arc::clone(&bytes_seen);
        let handle = open(
            PoolConfig {
                half_size: 1024,
                high_water: 1024,
            },
            Arc::new(move |buf: &[u8]| {
                hits2.fetch_add(1, Ordering::SeqCst);
                bytes2.fetch_add(buf.len(), Ordering::SeqCst);
            }),
            false,
        )
        .unwrap();

        write_bytes(handle, &[1u8, 2, 3, 4]).unwrap();
        flush(Some(handle)).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bytes_seen.load(Ordering::SeqCst), 4);
        close(Some(handle)).unwrap();
    }

    #[test]
    fn default_pool_double_open_is_an_error() {
        reset_for_test();
        let h1 = open(PoolConfig::default(), Arc::new(|_: &[u8]| {}), true).unwrap();
        let err = open(PoolConfig::default(), Arc::new(|_: &[u8]| {}), true).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::DefaultPoolAlreadyDefined);
        close(Some(h1)).unwrap();
    }

    #[test]
    fn close_nonexistent_default_is_noop() {
        reset_for_test();
        assert!(close(None).is_ok());
    }
}
