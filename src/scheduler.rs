//! Dependency-aware job scheduler.
//!
//! # Model
//!
//! Fire-and-forget jobs: a function pointer plus an opaque context,
//! recorded as a [`JobHandle`] in an epoch-reset [`RegionArena`] and
//! dispatched through an MPMC ring drained by a fixed worker pool. A job
//! may have at most one continuation; fan-out is composed by the caller
//! from multiple spawns and a wait group, fan-in by linking several
//! predecessors to one successor with separate [`Scheduler::then`] calls.
//!
//! # Readiness
//!
//! `unfinished` counts outstanding predecessors plus the job itself: a
//! fresh job sits at 1, every `then`/`chain` link bumps its successor,
//! and a job is ready exactly at 1. A handle dequeued early (its
//! predecessors still running) is dropped at dispatch; the last
//! predecessor to finish re-enqueues it — through the worker's own
//! sender, never the external dispatcher.
//!
//! # Epoch reset
//!
//! Completions are counted per epoch; when they near the arena's
//! absolute capacity, admission closes, and once no job is live the
//! arena resets in O(1) and admission reopens. Every [`JobRef`] from
//! before the reset is invalid by contract. Because a reset requires
//! zero live jobs, a handle you are still holding between `spawn` and
//! `then`/`wait` keeps itself valid; only handles of retired jobs go
//! stale.
//!
//! Link all predecessors of a fan-in before the first of them can
//! complete (or gate their bodies): a predecessor that retires before
//! the remaining links are made releases the successor early.
//!
//! # Lifecycle
//!
//! Build a [`SchedulerPool`], attach it with [`Scheduler::new`], submit
//! work, then [`Scheduler::shutdown`]. A process-wide singleton facade
//! ([`spawn_scheduler`] / [`shutdown_scheduler`] and the free-function
//! verbs) mirrors the original global API; its registry mutex guards
//! only lifecycle transitions and handle clones, never the job path.

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crossbeam_utils::CachePadded;

use crate::arena::RegionArena;
use crate::channel::mpmc;
use crate::hint::relax;
use crate::pool::{JobFn, WorkerPool};

/// Job records per arena region.
pub const REGION_CAPACITY: usize = 4096;
/// Region cap for the job arena.
pub const MAX_REGIONS: usize = 1024;
/// Absolute job capacity of one scheduler epoch.
pub const MAX_JOBS: usize = REGION_CAPACITY * MAX_REGIONS;

/// Completions short of `max_jobs` at which a reset is attempted.
const RESET_HEADROOM: usize = 20;

/// Job record: entry point, context, predecessor count, and at most one
/// successor. Lives in the scheduler's arena for exactly one epoch.
pub struct JobHandle {
    func: JobFn,
    ctx: *mut (),
    /// Outstanding predecessors plus self; ready at exactly 1.
    unfinished: AtomicUsize,
    /// Single successor, or null.
    continuation: AtomicPtr<JobHandle>,
}

// SAFETY: the spawn contract makes `ctx` safe to hand to any worker
// thread; all other fields are atomics or plain data.
unsafe impl Send for JobHandle {}
unsafe impl Sync for JobHandle {}

/// Copyable token for a job record.
///
/// Valid until the arena's next epoch reset; a token kept across a reset
/// refers to recycled storage and must not be scheduled again.
#[derive(Clone, Copy)]
pub struct JobRef(NonNull<JobHandle>);

// SAFETY: the token travels between threads through the dispatch ring;
// the record it points at is Sync.
unsafe impl Send for JobRef {}

/// Capacity knobs for a scheduler instance.
///
/// The defaults are the production constants; tests shrink them to make
/// the reset path reachable.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Job records per arena region.
    pub region_capacity: usize,
    /// Arena region cap.
    pub max_regions: usize,
}

impl SchedulerConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            region_capacity: REGION_CAPACITY,
            max_regions: MAX_REGIONS,
        }
    }

    /// Absolute job capacity of one epoch (and the dispatch ring size).
    pub fn max_jobs(&self) -> usize {
        self.region_capacity * self.max_regions
    }

    fn reset_threshold(&self) -> usize {
        self.max_jobs().saturating_sub(RESET_HEADROOM)
    }
}

/// Shared scheduler state reachable from every worker.
struct Core {
    /// Job records. Mutated through `&mut` only inside the reset, under
    /// the quiescence argument documented there.
    arena: UnsafeCell<RegionArena<JobHandle>>,
    /// Admission gate; closed for the duration of an epoch reset.
    accepting_jobs: AtomicBool,
    /// Handles allocated and not yet retired. The reset's drain barrier.
    active_jobs: CachePadded<AtomicUsize>,
    /// Completions since the last epoch reset.
    jobs_completed_epoch: CachePadded<AtomicUsize>,
    reset_threshold: usize,
}

// SAFETY: the arena cell is only mutably borrowed while the admission
// gate is closed and `active_jobs == 0`, which excludes every other
// arena access; the remaining fields are atomics.
unsafe impl Send for Core {}
unsafe impl Sync for Core {}

impl Core {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            arena: UnsafeCell::new(RegionArena::new(
                config.region_capacity,
                config.max_regions,
            )),
            accepting_jobs: AtomicBool::new(true),
            active_jobs: CachePadded::new(AtomicUsize::new(0)),
            jobs_completed_epoch: CachePadded::new(AtomicUsize::new(0)),
            reset_threshold: config.reset_threshold(),
        }
    }

    fn arena(&self) -> &RegionArena<JobHandle> {
        // SAFETY: shared borrows are excluded only during the reset,
        // which proves no caller can be here.
        unsafe { &*self.arena.get() }
    }

    /// Admission-gated handle allocation.
    fn spawn(&self, func: JobFn, ctx: *mut ()) -> Option<JobRef> {
        loop {
            while !self.accepting_jobs.load(Ordering::SeqCst) {
                relax();
            }
            self.active_jobs.fetch_add(1, Ordering::SeqCst);
            if self.accepting_jobs.load(Ordering::SeqCst) {
                break;
            }
            // A reset closed the gate between our check and increment;
            // withdraw so its drain barrier can reach zero, then retry.
            self.active_jobs.fetch_sub(1, Ordering::SeqCst);
        }

        let Some(slot) = self.arena().try_alloc() else {
            // Arena exhausted at this instant; the caller may retry.
            // Attempt the reset from here too: if everything already
            // retired, no future retirement exists to run the health
            // check on the caller's behalf.
            self.active_jobs.fetch_sub(1, Ordering::SeqCst);
            self.maybe_reset();
            return None;
        };

        // SAFETY: freshly claimed slot, unique until the token escapes.
        unsafe {
            slot.as_ptr().write(JobHandle {
                func,
                ctx,
                unfinished: AtomicUsize::new(1),
                continuation: AtomicPtr::new(ptr::null_mut()),
            });
        }
        Some(JobRef(slot))
    }

    /// Per-job worker body; `own_sender` is the worker's self-dispatch
    /// endpoint.
    fn run_job(&self, own_sender: &mpmc::Sender<JobRef>, job: JobRef) {
        // SAFETY: tokens in the ring address live arena storage; see the
        // module docs for the epoch argument.
        let handle = unsafe { job.0.as_ref() };

        // Claim the run: ready exactly at 1, and the claim must be
        // atomic — a handle can sit in the ring twice (direct submission
        // plus a predecessor's re-enqueue), and only one dequeue may win.
        // Handles with outstanding predecessors are dropped here and
        // re-enqueued by the last predecessor; retired duplicates just
        // fail the claim.
        if handle
            .unfinished
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        (handle.func)(handle.ctx);

        self.jobs_completed_epoch.fetch_add(1, Ordering::Relaxed);

        match NonNull::new(handle.continuation.load(Ordering::Acquire)) {
            Some(next) => {
                // SAFETY: same epoch as the finished predecessor.
                let next_handle = unsafe { next.as_ref() };
                if next_handle.unfinished.fetch_sub(1, Ordering::AcqRel) == 2 {
                    // Reached 1: ready. Self-dispatch, never the
                    // external dispatcher.
                    let _ = own_sender.send(JobRef(next));
                }
                self.retire();
            }
            None => {
                self.retire();
                self.maybe_reset();
            }
        }
    }

    fn retire(&self) {
        self.active_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    /// Arena health check: reset the epoch once completions near the
    /// arena cap *and* no job is live.
    ///
    /// The check never blocks. Waiting here for `active_jobs` to drain
    /// would wedge a single-worker pool (queued jobs could never run)
    /// and any pool whose running job spawns mid-reset; instead, a
    /// non-quiescent attempt reopens admission and the final retiring
    /// job performs the reset.
    fn maybe_reset(&self) {
        loop {
            if self.jobs_completed_epoch.load(Ordering::Relaxed) <= self.reset_threshold {
                return;
            }
            if self
                .accepting_jobs
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Another thread holds the gate. Its attempt may still
                // end non-quiescent with the threshold crossed, and if
                // this is the final retirement nobody else would retry;
                // gate holders never block, so spin and re-check.
                relax();
                continue;
            }
            if self.active_jobs.load(Ordering::SeqCst) != 0 {
                self.accepting_jobs.store(true, Ordering::SeqCst);
                return;
            }

            // Quiescent: gate closed and zero live handles. Spawners
            // re-check the gate after bumping active_jobs (both SeqCst),
            // so observing zero here excludes any allocation in flight.
            // SAFETY: that exclusion is exactly the arena's reset
            // contract.
            unsafe { (*self.arena.get()).reset() };

            self.jobs_completed_epoch.store(0, Ordering::SeqCst);
            self.accepting_jobs.store(true, Ordering::SeqCst);
            return;
        }
    }
}

/// Worker pool variant that runs the scheduler's per-job body.
///
/// Workers resolve the attached scheduler through a set-once cell, so the
/// pool can be built first and handed to [`Scheduler::new`] — the same
/// two-phase bring-up as the original, with double-attach rejected.
pub struct SchedulerPool {
    workers: WorkerPool<JobRef>,
    attach_cell: Arc<OnceLock<Arc<Core>>>,
    config: SchedulerConfig,
}

impl SchedulerPool {
    /// Scheduler-variant pool with the production constants: `threads`
    /// workers over a dispatch ring of [`MAX_JOBS`] tokens.
    ///
    /// The ring is sized so that every job record the arena can hold fits
    /// in it at once — a send can then never block on a full ring, which
    /// is what keeps worker self-dispatch deadlock-free.
    pub fn init(threads: usize) -> Self {
        Self::with_config(SchedulerConfig::new(threads))
    }

    /// Pool with explicit capacity knobs.
    pub fn with_config(config: SchedulerConfig) -> Self {
        let attach_cell: Arc<OnceLock<Arc<Core>>> = Arc::new(OnceLock::new());
        let cell = Arc::clone(&attach_cell);

        let workers = WorkerPool::with_worker_body(
            config.workers,
            config.max_jobs(),
            move |own_sender, job: JobRef| {
                // Jobs can only enter the ring through an attached
                // scheduler, so the cell is always set by now.
                let core = cell.get().expect("job dispatched before scheduler attach");
                core.run_job(own_sender, job);
            },
        );

        Self {
            workers,
            attach_cell,
            config,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.worker_count()
    }
}

/// A running scheduler instance.
pub struct Scheduler {
    core: Arc<Core>,
    pool: SchedulerPool,
}

impl Scheduler {
    /// Attaches `pool` and starts accepting jobs.
    ///
    /// # Panics
    /// Panics if the pool was already attached to another scheduler.
    pub fn new(pool: SchedulerPool) -> Self {
        let core = Arc::new(Core::new(&pool.config));
        assert!(
            pool.attach_cell.set(Arc::clone(&core)).is_ok(),
            "scheduler pool already attached"
        );
        Self { core, pool }
    }

    /// Allocates a job. The job is **not** yet submitted; hand it to
    /// [`then`](Self::then), [`chain`](Self::chain) or
    /// [`wait`](Self::wait).
    ///
    /// Spins while an epoch reset has admission closed. Returns `None`
    /// when the arena is exhausted at this precise moment; the caller
    /// may retry.
    ///
    /// # Safety
    /// `ctx` must be valid until the job has executed and safe to access
    /// from whichever worker thread runs it.
    pub unsafe fn spawn(&self, func: JobFn, ctx: *mut ()) -> Option<JobRef> {
        self.core.spawn(func, ctx)
    }

    /// Links `next` as `first`'s single continuation and submits
    /// `first`. `next` will not run until `first`'s body has returned.
    ///
    /// Calling `then` twice with the same `first` replaces the earlier
    /// continuation and strands its predecessor count; one continuation
    /// per job is the contract.
    pub fn then(&self, first: JobRef, next: JobRef) {
        Self::link(first, next);
        self.schedule(first);
    }

    /// Links `jobs[i] -> jobs[i+1]` pairwise and submits the first job.
    /// Covers both the variadic chain and the array form of the original
    /// interface.
    pub fn chain(&self, jobs: &[JobRef]) {
        let Some(&first) = jobs.first() else {
            return;
        };
        for pair in jobs.windows(2) {
            Self::link(pair[0], pair[1]);
        }
        self.schedule(first);
    }

    /// Submits `job` for execution. Despite the name this does **not**
    /// block; it is the scheduling verb of the original interface. Pair
    /// with a [`WaitGroup`](crate::wait_group::WaitGroup) to actually
    /// wait.
    pub fn wait(&self, job: JobRef) {
        self.schedule(job);
    }

    fn link(first: JobRef, next: JobRef) {
        // SAFETY: live tokens per the epoch contract.
        let (first_handle, next_handle) = unsafe { (first.0.as_ref(), next.0.as_ref()) };
        first_handle
            .continuation
            .store(next.0.as_ptr(), Ordering::Release);
        next_handle.unfinished.fetch_add(1, Ordering::Release);
    }

    fn schedule(&self, job: JobRef) {
        // SAFETY: live token per the epoch contract.
        let handle = unsafe { job.0.as_ref() };
        if handle.unfinished.load(Ordering::Acquire) == 0 {
            // Already retired; nothing to run.
            return;
        }
        let _ = self.pool.workers.dispatcher().send(job);
    }

    /// Handles allocated and not yet retired.
    pub fn active_jobs(&self) -> usize {
        self.core.active_jobs.load(Ordering::SeqCst)
    }

    /// Completions since the last epoch reset.
    pub fn jobs_completed_epoch(&self) -> usize {
        self.core.jobs_completed_epoch.load(Ordering::Relaxed)
    }

    /// Current arena epoch; bumps by one per reset.
    pub fn arena_epoch(&self) -> u64 {
        self.core.arena().epoch()
    }

    /// Spins until no job is live. Useful between test phases; real
    /// workloads compose wait groups instead.
    pub fn drain(&self) {
        while self.active_jobs() != 0 {
            relax();
        }
    }

    /// Stops the pool: closes the dispatch ring, joins the workers, and
    /// releases the job arena. Jobs still queued are abandoned.
    pub fn shutdown(self) {
        self.pool.workers.shutdown();
    }
}

// ============================================================================
// Process-wide singleton facade
// ============================================================================

fn registry() -> &'static Mutex<Option<Arc<Scheduler>>> {
    static REGISTRY: OnceLock<Mutex<Option<Arc<Scheduler>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(None))
}

fn current() -> Arc<Scheduler> {
    registry()
        .lock()
        .expect("scheduler registry poisoned")
        .as_ref()
        .expect("no scheduler running")
        .clone()
}

/// Installs the process-wide scheduler.
///
/// # Panics
/// Panics if one is already running.
pub fn spawn_scheduler(pool: SchedulerPool) {
    let mut slot = registry().lock().expect("scheduler registry poisoned");
    assert!(slot.is_none(), "scheduler already running");
    *slot = Some(Arc::new(Scheduler::new(pool)));
}

/// Tears down the process-wide scheduler: waits out transient users,
/// then shuts the instance down.
///
/// # Panics
/// Panics if none is running.
pub fn shutdown_scheduler() {
    let taken = registry()
        .lock()
        .expect("scheduler registry poisoned")
        .take()
        .expect("no scheduler running");

    // Free-function callers hold their clone only for the duration of
    // one verb; wait them out.
    let mut scheduler = taken;
    loop {
        match Arc::try_unwrap(scheduler) {
            Ok(instance) => {
                instance.shutdown();
                return;
            }
            Err(still_shared) => {
                scheduler = still_shared;
                relax();
            }
        }
    }
}

/// [`Scheduler::spawn`] on the process-wide instance.
///
/// # Safety
/// Same contract as [`Scheduler::spawn`].
pub unsafe fn spawn(func: JobFn, ctx: *mut ()) -> Option<JobRef> {
    // SAFETY: forwarded contract.
    unsafe { current().spawn(func, ctx) }
}

/// [`Scheduler::then`] on the process-wide instance.
pub fn then(first: JobRef, next: JobRef) {
    current().then(first, next);
}

/// [`Scheduler::chain`] on the process-wide instance.
pub fn chain(jobs: &[JobRef]) {
    current().chain(jobs);
}

/// [`Scheduler::wait`] on the process-wide instance.
pub fn wait(job: JobRef) {
    current().wait(job);
}
