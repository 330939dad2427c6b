//! Per-slot sequence core shared by the MPSC, SPMC, and MPMC rings.
//!
//! # Protocol
//!
//! Each slot carries an atomic sequence number. For a ring of capacity
//! `C`, the sequence walks through two states per ticket:
//!
//! ```text
//! seq == 2p          slot writable by the producer holding ticket p
//! seq == 2p + 1      published; readable by the consumer holding ticket p
//! seq == 2(p + C)    recycled; writable again on the next wrap
//! ```
//!
//! Tickets are claimed with `fetch_add` on the matching cursor, so every
//! ticket is claimed by exactly one endpoint and each slot has exactly
//! one writer and one reader per lap even under contention. The sequence
//! stores are the only publication edges; cursor RMWs merely hand out
//! tickets.
//!
//! The factor of two keeps the writable and published states distinct at
//! every capacity. With a plain `p`/`p + 1`/`p + C` walk, a capacity-1
//! ring collides: `published(p) == writable(p + 1)`, and a second
//! producer would overwrite an unconsumed value instead of waiting for
//! the recycle.
//!
//! Cursors are 64-bit and monotonic; they are never reduced modulo the
//! capacity, which sidesteps ABA on wrapped indices.
//!
//! # Closure
//!
//! Both spins poll the ring's closed flag. An endpoint that observes
//! closure while waiting abandons its ticket: the slot is left for the
//! destruction path and the matching endpoint on the other side also
//! unblocks via the same flag.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

use crate::hint::relax;

/// Sequence value for "writable by ticket `p`".
#[inline]
fn writable(ticket: u64) -> u64 {
    ticket * 2
}

/// Sequence value for "published by ticket `p`".
#[inline]
fn published(ticket: u64) -> u64 {
    ticket * 2 + 1
}

/// One ring slot: sequence word plus value storage, padded to a cache
/// line so neighboring slots never share one.
#[repr(align(64))]
struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Cursor/slot core for the sequence-discipline rings.
///
/// The embedding ring decides which cursor advances how and which
/// endpoint counts exist; the slot protocol itself is identical across
/// all three.
pub(crate) struct SeqRing<T> {
    /// Producer cursor: next ticket to hand to a sender.
    head: CachePadded<AtomicU64>,
    /// Consumer cursor: next ticket to hand to a receiver.
    tail: CachePadded<AtomicU64>,
    /// Sticky closed flag, polled by every spin.
    closed: AtomicBool,
    slots: Box<[Slot<T>]>,
}

// SAFETY: slot access is mediated by the sequence protocol; a slot is
// writable by exactly one ticket holder and readable by exactly one
// ticket holder per lap. T: Send suffices because values only move.
unsafe impl<T: Send> Send for SeqRing<T> {}
unsafe impl<T: Send> Sync for SeqRing<T> {}

impl<T> SeqRing<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");

        let slots = (0..capacity as u64)
            .map(|i| Slot {
                seq: AtomicU64::new(writable(i)),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            slots,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupancy snapshot. Consumer tickets can run ahead of published
    /// slots, so the difference saturates at zero.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.saturating_sub(tail) as usize
    }

    #[inline]
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Claims the next producer ticket.
    #[inline]
    pub(crate) fn claim_send(&self) -> u64 {
        self.head.fetch_add(1, Ordering::AcqRel)
    }

    /// Claims the next consumer ticket.
    #[inline]
    pub(crate) fn claim_recv(&self) -> u64 {
        self.tail.fetch_add(1, Ordering::AcqRel)
    }

    /// Writes `value` into the slot for `ticket`, spinning until the slot
    /// is writable. Returns the value back if the ring closes first.
    ///
    /// # Safety
    /// `ticket` must have been claimed from `claim_send` by this caller
    /// and not used for a prior produce.
    pub(crate) unsafe fn produce(&self, ticket: u64, value: T) -> Result<(), T> {
        let slot = &self.slots[(ticket % self.slots.len() as u64) as usize];

        while slot.seq.load(Ordering::Acquire) != writable(ticket) {
            if self.closed.load(Ordering::Acquire) {
                return Err(value);
            }
            relax();
        }

        // SAFETY: the previous lap's reader recycled this slot (or it is
        // untouched); no other thread holds this ticket, so we are the
        // unique writer until the publish below.
        unsafe { (*slot.value.get()).write(value) };

        slot.seq.store(published(ticket), Ordering::Release);
        Ok(())
    }

    /// Reads the slot for `ticket`, spinning until it is published.
    /// Returns `None` if the ring closes first (the ticket is abandoned).
    ///
    /// # Safety
    /// `ticket` must have been claimed from `claim_recv` by this caller
    /// and not used for a prior consume.
    pub(crate) unsafe fn consume(&self, ticket: u64) -> Option<T> {
        let capacity = self.slots.len() as u64;
        let slot = &self.slots[(ticket % capacity) as usize];

        while slot.seq.load(Ordering::Acquire) != published(ticket) {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            relax();
        }

        // SAFETY: the producer for this ticket published the value; we
        // are the unique reader for this lap.
        let value = unsafe { (*slot.value.get()).assume_init_read() };

        slot.seq.store(writable(ticket + capacity), Ordering::Release);
        Some(value)
    }

    /// Non-blocking single-consumer receive: takes the value at `tail` if
    /// it has been published, else reports empty. Used by the MPSC ring,
    /// whose lone consumer owns `tail` outright.
    ///
    /// An unready slot reports empty even when `head` has moved past it:
    /// the producer holding that ticket has claimed it but not yet
    /// published.
    ///
    /// # Safety
    /// Exactly one thread may call this at a time (single consumer).
    pub(crate) unsafe fn try_consume_next(&self) -> Option<T> {
        let capacity = self.slots.len() as u64;
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let slot = &self.slots[(tail % capacity) as usize];
        if slot.seq.load(Ordering::Acquire) != published(tail) {
            return None;
        }

        // SAFETY: the slot is published and we are the only consumer.
        let value = unsafe { (*slot.value.get()).assume_init_read() };

        slot.seq.store(writable(tail + capacity), Ordering::Release);
        // Sole writer of tail; the seq store above is the publication.
        self.tail.store(tail + 1, Ordering::Relaxed);
        Some(value)
    }
}

impl<T> Drop for SeqRing<T> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }

        // Exclusive access: drop published-but-unconsumed values. A
        // position whose producer abandoned its ticket on close never
        // published and is skipped by the seq check.
        let capacity = self.slots.len() as u64;
        let head = self.head.load(Ordering::Relaxed);
        let mut pos = self.tail.load(Ordering::Relaxed);
        while pos != head {
            let slot = &self.slots[(pos % capacity) as usize];
            if slot.seq.load(Ordering::Relaxed) == published(pos) {
                // SAFETY: published and never consumed; we have &mut self.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
            pos = pos.wrapping_add(1);
        }
    }
}
