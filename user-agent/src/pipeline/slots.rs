//! Receive slot arena.
//!
//! All slots are allocated once, zeroed, in one boxed slice that never moves
//! or shrinks until the last [`SlotLease`] is gone. A lease is the only
//! handle to a slot: it is created once per slot, is not `Clone`, and is
//! moved into `begin_receive` and back out of the completion. Whoever holds
//! the lease owns the slot, so the memory handed to the OS and the memory
//! later reported complete are the same by construction.
//!
//! ```text
//!   ReceiveSlotPool (Arc)
//!   ┌──────────┬──────────┬─────┬──────────┐
//!   │ slot 0   │ slot 1   │  …  │ slot n-1 │   n = threads × requests
//!   │ desc|env │ desc|env │     │ desc|env │
//!   └──────────┴──────────┴─────┴──────────┘
//!      ▲ SlotLease { pool, index }
//! ```

use std::{
    cell::UnsafeCell,
    fmt, mem,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use shared::wire::ENVELOPE_WIRE_LEN;
use thiserror::Error;

/*────────────────────────── storage ─────────────────────────*/

/// Per-request OS bookkeeping (`OVERLAPPED` on Windows).
#[cfg(windows)]
pub type RawOverlapped = windows_sys::Win32::System::IO::OVERLAPPED;
#[cfg(not(windows))]
pub type RawOverlapped = [usize; 4];

/// Asynchronous-operation descriptor: pending/complete bookkeeping plus the
/// byte count of the last completion.
#[repr(C)]
pub struct AsyncDescriptor {
    pub raw: RawOverlapped,
    pub bytes_transferred: u32,
}

impl AsyncDescriptor {
    fn zeroed() -> Self {
        // SAFETY: OVERLAPPED (and the portable stand-in) is plain data for
        // which all-zero is the documented initial state.
        unsafe { mem::zeroed() }
    }
}

/// Envelope buffer; 8-byte aligned like the C message struct.
#[repr(C, align(8))]
struct EnvelopeBuffer([u8; ENVELOPE_WIRE_LEN]);

#[repr(C)]
struct SlotStorage {
    envelope: EnvelopeBuffer,
    descriptor: AsyncDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Idle = 0,
    AwaitingCompletion = 1,
    Completed = 2,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::AwaitingCompletion,
            2 => SlotState::Completed,
            _ => SlotState::Idle,
        }
    }
}

struct ReceiveSlot {
    storage: UnsafeCell<SlotStorage>,
    state: AtomicU8,
}

impl ReceiveSlot {
    fn new() -> Self {
        Self {
            storage: UnsafeCell::new(SlotStorage {
                envelope: EnvelopeBuffer([0; ENVELOPE_WIRE_LEN]),
                descriptor: AsyncDescriptor::zeroed(),
            }),
            state: AtomicU8::new(SlotState::Idle as u8),
        }
    }
}

/*────────────────────────── pool ────────────────────────────*/

#[derive(Debug, Error)]
#[error("cannot allocate {threads} x {requests} receive slots")]
pub struct AllocError {
    pub threads: u32,
    pub requests: u32,
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

pub struct ReceiveSlotPool {
    id: u64,
    slots: Box<[ReceiveSlot]>,
}

// SAFETY: slot contents are only reached through a `SlotLease`, and exactly
// one lease exists per slot; the raw OVERLAPPED pointers inside are never
// dereferenced by us.
unsafe impl Send for ReceiveSlotPool {}
unsafe impl Sync for ReceiveSlotPool {}

/// The pool plus the initial working set of each worker.
#[derive(Debug)]
pub struct SlotSets {
    pub pool: Arc<ReceiveSlotPool>,
    pub per_worker: Vec<Vec<SlotLease>>,
}

impl ReceiveSlotPool {
    /// Allocate and zero `thread_count × requests_per_thread` slots and split
    /// their leases into one set of `requests_per_thread` per worker.
    pub fn acquire_initial_slots(
        thread_count: u32,
        requests_per_thread: u32,
    ) -> Result<SlotSets, AllocError> {
        let oom = || AllocError { threads: thread_count, requests: requests_per_thread };

        let per = requests_per_thread as usize;
        let total = (thread_count as usize).checked_mul(per).ok_or_else(oom)?;
        total.checked_mul(mem::size_of::<ReceiveSlot>()).ok_or_else(oom)?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(total).map_err(|_| oom())?;
        slots.extend((0..total).map(|_| ReceiveSlot::new()));

        let pool = Arc::new(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots: slots.into_boxed_slice(),
        });

        let mut per_worker = Vec::new();
        per_worker.try_reserve_exact(thread_count as usize).map_err(|_| oom())?;
        for t in 0..thread_count as usize {
            let mut set = Vec::new();
            set.try_reserve_exact(per).map_err(|_| oom())?;
            set.extend((0..per).map(|r| SlotLease { pool: Arc::clone(&pool), index: t * per + r }));
            per_worker.push(set);
        }

        Ok(SlotSets { pool, per_worker })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|s| SlotState::from_u8(s.state.load(Ordering::Acquire)))
    }

    /// Number of slots with a receive in flight.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.load(Ordering::Acquire) == SlotState::AwaitingCompletion as u8)
            .count()
    }
}

impl fmt::Debug for ReceiveSlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveSlotPool")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/*────────────────────────── lease ───────────────────────────*/

/// Exclusive handle to one slot of a pool.
pub struct SlotLease {
    pool: Arc<ReceiveSlotPool>,
    index: usize,
}

impl SlotLease {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pool_id(&self) -> u64 {
        self.pool.id
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.slot().state.load(Ordering::Acquire))
    }

    fn slot(&self) -> &ReceiveSlot {
        &self.pool.slots[self.index]
    }

    fn storage(&self) -> &SlotStorage {
        // SAFETY: the lease is the only handle to this slot and `&self`
        // excludes a concurrent `&mut self`.
        unsafe { &*self.slot().storage.get() }
    }

    fn storage_mut(&mut self) -> &mut SlotStorage {
        // SAFETY: as above, with exclusive access through `&mut self`.
        unsafe { &mut *self.slot().storage.get() }
    }

    /// Re-zero the descriptor and mark the slot as awaiting completion.
    /// Must run before every submission.
    pub fn prepare_for_receive(&mut self) {
        self.storage_mut().descriptor = AsyncDescriptor::zeroed();
        self.slot().state.store(SlotState::AwaitingCompletion as u8, Ordering::Release);
    }

    pub fn mark_completed(&mut self, bytes_transferred: u32) {
        self.storage_mut().descriptor.bytes_transferred = bytes_transferred;
        self.slot().state.store(SlotState::Completed as u8, Ordering::Release);
    }

    /// The slot will not be resubmitted.
    pub fn mark_idle(&mut self) {
        self.slot().state.store(SlotState::Idle as u8, Ordering::Release);
    }

    pub fn bytes_transferred(&self) -> u32 {
        self.storage().descriptor.bytes_transferred
    }

    /// Whole envelope buffer.
    pub fn envelope_bytes(&self) -> &[u8] {
        &self.storage().envelope.0
    }

    pub fn envelope_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage_mut().envelope.0
    }

    /// The bytes of the last completion.
    pub fn received(&self) -> &[u8] {
        let len = (self.bytes_transferred() as usize).min(ENVELOPE_WIRE_LEN);
        &self.envelope_bytes()[..len]
    }

    /// Raw pointers for an OS-level asynchronous receive. Stable for the
    /// lifetime of the pool.
    pub fn raw_parts(&mut self) -> (*mut u8, *mut RawOverlapped) {
        let storage = self.storage_mut();
        (storage.envelope.0.as_mut_ptr(), &mut storage.descriptor.raw as *mut RawOverlapped)
    }

    /// Identifies the slot from the descriptor address a completion reports.
    pub fn descriptor_key(&self) -> usize {
        &self.storage().descriptor.raw as *const RawOverlapped as usize
    }
}

impl fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease")
            .field("pool", &self.pool.id)
            .field("index", &self.index)
            .field("state", &self.state())
            .finish()
    }
}
