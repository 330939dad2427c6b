//! Epoch-reset region arena.
//!
//! A segmented bump allocator for fixed-size records under concurrent
//! producers. Slots are claimed with a single `fetch_add` on a global
//! counter; slot `i` lives in region `i / R` at offset `i % R`, where `R`
//! is the per-region capacity. Regions are contiguous buffers allocated
//! lazily as the counter crosses their boundary, up to a hard cap.
//!
//! # Epoch reset
//!
//! [`RegionArena::reset`] advances a generation counter and zeroes the
//! slot count — O(1), the same trick the fixed-capacity dedupe sets use.
//! Regions are *not* cleared eagerly: the first producer to touch a
//! reused region in a new epoch zeroes its buffer and stamps it. All
//! pointers handed out before a reset are invalid by contract afterward.
//!
//! # Thread-safety contract
//!
//! - [`alloc`](RegionArena::alloc) / [`try_alloc`](RegionArena::try_alloc)
//!   / [`push`](RegionArena::push) are safe under any number of
//!   concurrent producers.
//! - [`get`](RegionArena::get) / [`get_last`](RegionArena::get_last) are
//!   read-only and `unsafe`: the caller must not race writers on those
//!   indices and must stay within the current epoch.
//! - [`reset`](RegionArena::reset) takes `&mut self`; quiescence is the
//!   caller's problem and the borrow checker enforces it here.
//! - Crossing the region cap aborts the process (fail-fast); `try_alloc`
//!   reports it as `None` instead for callers that can shed load.
//!
//! Records are never dropped — the arena refuses element types with drop
//! glue at construction.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::marker::PhantomData;
use std::mem;
use std::process;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crate::hint::relax;

/// Region cap when the caller passes zero.
pub const DEFAULT_MAX_REGIONS: usize = 1024;

/// One lazily allocated region.
struct Region<T> {
    /// Buffer of `region_capacity` records; null until allocated. The
    /// release store of this pointer publishes the descriptor.
    data: AtomicPtr<T>,
    /// Epoch claimed by the thread elected to zero a reused buffer.
    claimed_epoch: AtomicU64,
    /// Epoch for which the buffer is zeroed and writable. Producers wait
    /// on this, never on `claimed_epoch`.
    clean_epoch: AtomicU64,
}

/// Epoch-reset segmented bump allocator for records of type `T`.
pub struct RegionArena<T> {
    region_capacity: usize,
    regions: Box<[Region<T>]>,
    /// Regions with (at least claimed) descriptors; grows one at a time.
    regions_in_use: AtomicUsize,
    /// Next slot index across all regions.
    count: AtomicUsize,
    current_epoch: AtomicU64,
    _marker: PhantomData<T>,
}

impl<T> RegionArena<T> {
    /// Creates an arena of up to `max_regions` regions holding
    /// `region_capacity` records each. `max_regions == 0` selects
    /// [`DEFAULT_MAX_REGIONS`]. Region 0 is allocated eagerly.
    ///
    /// # Panics
    /// Panics if `region_capacity` is zero, if `T` is zero-sized, or if
    /// `T` has drop glue (records are never dropped).
    pub fn new(region_capacity: usize, max_regions: usize) -> Self {
        assert!(region_capacity > 0, "region capacity must be > 0");
        assert!(mem::size_of::<T>() > 0, "zero-sized records are not supported");
        assert!(
            !mem::needs_drop::<T>(),
            "arena records must not have drop glue"
        );

        let max_regions = if max_regions == 0 {
            DEFAULT_MAX_REGIONS
        } else {
            max_regions
        };

        let regions = (0..max_regions)
            .map(|_| Region {
                data: AtomicPtr::new(ptr::null_mut()),
                claimed_epoch: AtomicU64::new(0),
                clean_epoch: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let arena = Self {
            region_capacity,
            regions,
            regions_in_use: AtomicUsize::new(1),
            count: AtomicUsize::new(0),
            current_epoch: AtomicU64::new(0),
            _marker: PhantomData,
        };

        let buf = Self::alloc_region_buffer(region_capacity);
        arena.regions[0].data.store(buf, Ordering::Release);
        arena
    }

    fn region_layout(region_capacity: usize) -> Layout {
        Layout::array::<T>(region_capacity).expect("region layout overflows")
    }

    fn alloc_region_buffer(region_capacity: usize) -> *mut T {
        let layout = Self::region_layout(region_capacity);
        // SAFETY: layout has non-zero size (capacity > 0, T non-ZST).
        let buf = unsafe { alloc_zeroed(layout) };
        if buf.is_null() {
            handle_alloc_error(layout);
        }
        buf.cast()
    }

    /// Claims a slot and returns its address. The memory is zeroed on the
    /// region's first touch in the current epoch and is otherwise
    /// whatever the slot last held; callers overwrite it.
    ///
    /// Aborts the process when the slot would land past the region cap.
    pub fn alloc(&self) -> NonNull<T> {
        match self.try_alloc() {
            Some(slot) => slot,
            None => process::abort(),
        }
    }

    /// Claims a slot, reporting exhaustion as `None` instead of aborting.
    pub fn try_alloc(&self) -> Option<NonNull<T>> {
        let slot = self.count.fetch_add(1, Ordering::AcqRel);
        let region = slot / self.region_capacity;
        if region >= self.regions.len() {
            return None;
        }

        let data = self.ensure_region(region);
        // SAFETY: offset < region_capacity, inside the region buffer.
        let slot_ptr = unsafe { data.add(slot % self.region_capacity) };
        // SAFETY: region buffers are never null once published.
        Some(unsafe { NonNull::new_unchecked(slot_ptr) })
    }

    /// Claims a slot and moves `value` into it (the byte-copying `add` of
    /// the original interface).
    pub fn push(&self, value: T) {
        let slot = self.alloc();
        // SAFETY: freshly claimed slot; unique writer until published to
        // readers by whatever protocol the caller layers on top.
        unsafe { slot.as_ptr().write(value) };
    }

    /// Returns the buffer of `region`, allocating or epoch-clearing it
    /// first if this thread gets elected to.
    fn ensure_region(&self, region: usize) -> *mut T {
        let epoch = self.current_epoch.load(Ordering::Acquire);

        loop {
            let used = self.regions_in_use.load(Ordering::Acquire);
            if region < used {
                return self.ready_region(region, epoch);
            }

            // Regions grow one at a time; the CAS winner allocates
            // exactly the region it claimed, so no index can be stranded
            // without a buffer by a producer landing several regions
            // ahead.
            if self
                .regions_in_use
                .compare_exchange(used, used + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let buf = Self::alloc_region_buffer(self.region_capacity);
                let slot = &self.regions[used];
                slot.claimed_epoch.store(epoch, Ordering::Relaxed);
                slot.clean_epoch.store(epoch, Ordering::Relaxed);
                slot.data.store(buf, Ordering::Release);
            } else {
                relax();
            }
        }
    }

    /// Waits for `region`'s buffer to be published, then ensures it has
    /// been zeroed for `epoch` (clearing it here if this thread wins the
    /// claim).
    fn ready_region(&self, region: usize, epoch: u64) -> *mut T {
        let slot = &self.regions[region];

        let mut data = slot.data.load(Ordering::Acquire);
        while data.is_null() {
            relax();
            data = slot.data.load(Ordering::Acquire);
        }

        if slot.clean_epoch.load(Ordering::Acquire) != epoch {
            let claimed = slot.claimed_epoch.load(Ordering::Acquire);
            if claimed != epoch
                && slot
                    .claimed_epoch
                    .compare_exchange(claimed, epoch, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                // Elected: zero the reused buffer, then publish. Writers
                // in this epoch wait on clean_epoch, so no record write
                // can race the clear.
                let bytes = Self::region_layout(self.region_capacity).size();
                // SAFETY: buffer is region_capacity records long; no
                // writer proceeds until clean_epoch is published.
                unsafe { ptr::write_bytes(data.cast::<u8>(), 0, bytes) };
                slot.clean_epoch.store(epoch, Ordering::Release);
            } else {
                while slot.clean_epoch.load(Ordering::Acquire) != epoch {
                    relax();
                }
            }
        }

        data
    }

    /// Returns the record at `index`, if it is within the allocated
    /// range.
    ///
    /// # Safety
    /// The caller must ensure the index was initialized in the current
    /// epoch and that no writer races this read.
    pub unsafe fn get(&self, index: usize) -> Option<&T> {
        let count = self.count.load(Ordering::Acquire);
        if index >= count || index >= self.capacity() {
            return None;
        }

        let data = self.regions[index / self.region_capacity]
            .data
            .load(Ordering::Acquire);
        if data.is_null() {
            return None;
        }

        // SAFETY: in-bounds slot of a published region buffer; the
        // caller vouches for initialization and quiescence.
        Some(unsafe { &*data.add(index % self.region_capacity) })
    }

    /// Returns the most recently claimed record.
    ///
    /// # Safety
    /// Same contract as [`get`](Self::get).
    pub unsafe fn get_last(&self) -> Option<&T> {
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            return None;
        }
        // SAFETY: forwarded contract.
        unsafe { self.get(count - 1) }
    }

    /// Starts a new epoch: all previously returned pointers become
    /// invalid by contract, the slot counter rewinds, and reused regions
    /// are zeroed on first touch. O(1).
    pub fn reset(&mut self) {
        self.current_epoch.fetch_add(1, Ordering::AcqRel);
        self.count.store(0, Ordering::Release);
    }

    /// Slots claimed in the current epoch. Failed `try_alloc` calls past
    /// the cap inflate this until the next reset.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot capacity across all regions.
    pub fn capacity(&self) -> usize {
        self.region_capacity * self.regions.len()
    }

    pub fn region_capacity(&self) -> usize {
        self.region_capacity
    }

    pub fn regions_in_use(&self) -> usize {
        self.regions_in_use.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Acquire)
    }
}

impl<T> Drop for RegionArena<T> {
    fn drop(&mut self) {
        let layout = Self::region_layout(self.region_capacity);
        for region in self.regions.iter_mut() {
            let data = *region.data.get_mut();
            if !data.is_null() {
                // SAFETY: allocated with this exact layout; records have
                // no drop glue (asserted at construction).
                unsafe { dealloc(data.cast(), layout) };
            }
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn slot_to_region_mapping() {
        let arena = RegionArena::<u64>::new(4, 4);
        for i in 0..10u64 {
            arena.push(i);
        }
        assert_eq!(arena.len(), 10);
        assert_eq!(arena.regions_in_use(), 3);

        for i in 0..10u64 {
            // SAFETY: writes above are complete; no concurrent writers.
            let got = unsafe { arena.get(i as usize) };
            assert_eq!(got.copied(), Some(i));
        }
        assert_eq!(unsafe { arena.get_last() }.copied(), Some(9));
        assert!(unsafe { arena.get(10) }.is_none());
    }

    #[test]
    fn epoch_reuse_zeroes_on_first_touch() {
        let mut arena = RegionArena::<u64>::new(4, 2);

        // Fill both regions in epoch 0.
        for i in 0..8u64 {
            arena.push(i);
        }
        assert_eq!(arena.regions_in_use(), 2);

        arena.reset();
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.epoch(), 1);

        // First slot of the new epoch lands back in region 0, and the
        // reused region reads as zeroed before anything is written.
        let slot = arena.alloc();
        let base = slot.as_ptr();
        for slot_idx in 0..4 {
            // SAFETY: region 0's buffer; lazily zeroed for this epoch.
            let word = unsafe { ptr::read(base.add(slot_idx)) };
            assert_eq!(word, 0u64, "stale bytes in slot {}", slot_idx);
        }

        // Three more fill region 0; the next one crosses into region 1.
        for i in 0..3u64 {
            arena.push(i);
        }
        assert_eq!(arena.len(), 4);
        let ninth = arena.alloc();
        assert_eq!(arena.len(), 5);
        assert_ne!(ninth.as_ptr() as usize, base as usize);
        assert_eq!(arena.regions_in_use(), 2);
    }

    #[test]
    fn try_alloc_reports_exhaustion() {
        let arena = RegionArena::<u64>::new(4, 1);
        for _ in 0..4 {
            assert!(arena.try_alloc().is_some());
        }
        assert!(arena.try_alloc().is_none());
        assert!(arena.try_alloc().is_none());
    }

    #[test]
    fn reset_recovers_exhausted_arena() {
        let mut arena = RegionArena::<u64>::new(2, 1);
        arena.push(1);
        arena.push(2);
        assert!(arena.try_alloc().is_none());

        arena.reset();
        assert!(arena.try_alloc().is_some());
    }

    #[test]
    fn concurrent_producers_claim_distinct_slots() {
        let arena = Arc::new(RegionArena::<u64>::new(64, 8));
        let per_thread = 100u64;

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let arena = arena.clone();
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        arena.push(t * per_thread + i + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(arena.len(), 400);

        // Every claimed slot was written exactly once: all values
        // distinct and non-zero.
        let mut seen = std::collections::HashSet::new();
        for i in 0..400 {
            // SAFETY: all producers joined; quiescent.
            let v = *unsafe { arena.get(i) }.unwrap();
            assert_ne!(v, 0);
            assert!(seen.insert(v), "duplicate value {}", v);
        }
    }

    #[test]
    fn get_out_of_range_is_none() {
        let arena = RegionArena::<u64>::new(4, 2);
        assert!(unsafe { arena.get(0) }.is_none());
        assert!(unsafe { arena.get_last() }.is_none());
    }
}
