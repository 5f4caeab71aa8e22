//! C5: the trace buffer — a bounded, chunked, per-thread sequence of typed
//! entries published to a drainer via a `valid` gate.
//!
//! A lock-free publication gate (scan forward from a read cursor while data
//! is available, hand completed entries to the drainer) generalized from a
//! single shared ring to one chunked, growable buffer per producer thread —
//! this crate has no shared kernel ring to read from, so each thread keeps
//! its own chain of heap-allocated chunks instead of dividing one fixed
//! region.
//!
//! The per-chunk reservation (`Chunk::reserve`) is lock-free; only chunk
//! *rotation* (allocating a new chunk when one fills) takes the per-thread
//! mutex, and only to swap an `Arc` pointer — the drainer's potentially slow
//! flush callback always runs outside that lock, so a slow consumer never
//! blocks a producer the way a true global lock would.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::domain::{Domain, OpCode};
use crate::dispatch::Phase;

const CHUNK_LEN: usize = 256;

/// A producer-populated record owned by the trace buffer until the drainer
/// flushes it. Unlike [`crate::pool`]'s wire-level activity record, this is an
/// in-process, owned type — it may hold heap data (e.g. `args_blob`).
#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub domain: Domain,
    pub op: OpCode,
    pub phase: Phase,
    pub correlation_id: u64,
    pub thread_id: u64,
    pub process_id: u32,
    pub begin_ns: u64,
    pub end_ns: u64,
    pub external_id: Option<u64>,
    pub args_blob: Vec<u8>,
}

const EMPTY: u8 = 0;
const COMPLETE: u8 = 1;

struct Slot {
    /// `EMPTY` is "reserved, not yet published"; `COMPLETE` is "value set,
    /// safe for the drainer to read".
    valid: AtomicU8,
    value: UnsafeCell<Option<TraceEntry>>,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            valid: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(None),
        }
    }
}

// Safety: exactly one producer ever writes a given slot's `value`, and only
// before it stores `valid = COMPLETE` (Release); the drainer only reads
// `value` after observing `COMPLETE` (Acquire) and takes ownership exactly
// once, so there is never a concurrent read/write or double-read of the cell.
unsafe impl Sync for Slot {}

struct Chunk {
    slots: Box<[Slot]>,
    write_cursor: AtomicUsize,
    read_cursor: AtomicUsize,
}

impl Chunk {
    fn new() -> Arc<Self> {
        Arc::new(Chunk {
            slots: (0..CHUNK_LEN).map(|_| Slot::empty()).collect(),
            write_cursor: AtomicUsize::new(0),
            read_cursor: AtomicUsize::new(0),
        })
    }

    /// Reserves the next slot index in this chunk, or `None` if it is full.
    fn reserve(&self) -> Option<usize> {
        let idx = self.write_cursor.fetch_add(1, Ordering::AcqRel);
        if idx < CHUNK_LEN {
            Some(idx)
        } else {
            None
        }
    }

    fn publish(&self, idx: usize, entry: TraceEntry) {
        unsafe { *self.slots[idx].value.get() = Some(entry) };
        self.slots[idx].valid.store(COMPLETE, Ordering::Release);
    }

    /// Drains every completed, not-yet-drained entry, invoking `sink` on each
    /// in order. Returns the number of entries drained.
    fn drain_available(&self, sink: &mut dyn FnMut(TraceEntry)) -> usize {
        let mut drained = 0;
        loop {
            let idx = self.read_cursor.load(Ordering::Relaxed);
            let written = self.write_cursor.load(Ordering::Acquire).min(CHUNK_LEN);
            if idx >= written {
                break;
            }
            if self.slots[idx].valid.load(Ordering::Acquire) != COMPLETE {
                break;
            }
            let entry = unsafe { (*self.slots[idx].value.get()).take() }
                .expect("slot marked COMPLETE without a value");
            sink(entry);
            self.read_cursor.store(idx + 1, Ordering::Release);
            drained += 1;
        }
        drained
    }

    fn is_fully_drained(&self) -> bool {
        self.read_cursor.load(Ordering::Acquire) >= CHUNK_LEN
    }

    fn is_full(&self) -> bool {
        self.write_cursor.load(Ordering::Acquire) >= CHUNK_LEN
    }
}

struct ThreadBuffer {
    chunks: Mutex<VecDeque<Arc<Chunk>>>,
}

impl ThreadBuffer {
    fn new() -> Self {
        let mut chunks = VecDeque::new();
        chunks.push_back(Chunk::new());
        ThreadBuffer {
            chunks: Mutex::new(chunks),
        }
    }

    fn push(&self, entry: TraceEntry) {
        loop {
            let active = {
                let chunks = self.chunks.lock().unwrap();
                Arc::clone(chunks.back().unwrap())
            };
            if let Some(idx) = active.reserve() {
                active.publish(idx, entry);
                return;
            }
            // Active chunk is full: allocate a new one and link it. The old
            // chunk stays in the deque, now eligible for draining.
            let mut chunks = self.chunks.lock().unwrap();
            if chunks.back().unwrap().is_full() {
                chunks.push_back(Chunk::new());
            }
        }
    }

    fn drain_all(&self, sink: &mut dyn FnMut(TraceEntry)) {
        let mut chunks = self.chunks.lock().unwrap();
        for chunk in chunks.iter() {
            chunk.drain_available(sink);
        }
        // Retire fully-drained chunks from the front, except never the sole
        // remaining (active) chunk.
        while chunks.len() > 1 && chunks.front().map(|c| c.is_fully_drained()).unwrap_or(false) {
            chunks.pop_front();
        }
    }
}

struct Registry {
    buffers: Mutex<Vec<Arc<ThreadBuffer>>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        buffers: Mutex::new(Vec::new()),
    })
}

thread_local! {
    static LOCAL: Arc<ThreadBuffer> = {
        let buf = Arc::new(ThreadBuffer::new());
        registry().buffers.lock().unwrap().push(Arc::clone(&buf));
        buf
    };
}

/// Constructs `entry` and publishes it into the calling thread's buffer.
pub fn emplace(entry: TraceEntry) {
    LOCAL.with(|buf| buf.push(entry));
}

/// Drains every thread-local buffer synchronously, invoking `sink` for every
/// completed entry found. Safe to call from any non-hook thread (§4.5).
pub fn flush_all(mut sink: impl FnMut(TraceEntry)) {
    let buffers: Vec<_> = registry().buffers.lock().unwrap().clone();
    for buf in buffers {
        buf.drain_all(&mut sink);
    }
}

#[cfg(any(test, feature = "test-support"))]
pub(crate) fn reset_for_test() {
    let mut drained = Vec::new();
    flush_all(|e| drained.push(e));
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_entry(correlation_id: u64) -> TraceEntry {
        TraceEntry {
            domain: Domain::HostApi,
            op: 0,
            phase: Phase::Enter,
            correlation_id,
            thread_id: 1,
            process_id: 1,
            begin_ns: 0,
            end_ns: 0,
            external_id: None,
            args_blob: Vec::new(),
        }
    }

    #[test]
    fn emplace_then_flush_preserves_order() {
        reset_for_test();
        for i in 0..10 {
            emplace(sample_entry(i));
        }
        let mut seen = Vec::new();
        flush_all(|e| seen.push(e.correlation_id));
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn chunk_rotation_survives_many_entries() {
        reset_for_test();
        let n = (CHUNK_LEN * 3 + 7) as u64;
        for i in 0..n {
            emplace(sample_entry(i));
        }
        let mut seen = Vec::new();
        flush_all(|e| seen.push(e.correlation_id));
        assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }
}
