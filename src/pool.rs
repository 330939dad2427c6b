//! Fixed worker pool over an MPMC ring.
//!
//! # Architecture
//!
//! ```text
//!  external producers ──► dispatcher Sender ──► ┌────────────────────┐
//!                                               │     MPMC ring      │
//!                                               └────────────────────┘
//!                                                 ▲     ▲        │
//!                                worker Senders ──┘     │        ▼
//!                                (self-dispatch)     worker Receivers
//!                                                        │
//!                                                   N worker threads
//! ```
//!
//! Every worker owns a receiver *and* a sender against the same ring. The
//! per-worker sender is load-bearing: a worker that needs to enqueue
//! follow-up work (the job scheduler's continuations) must not funnel it
//! through the external dispatcher, or all workers could end up blocked
//! producing into a full ring that only they can drain.
//!
//! Workers run until the ring is closed and their next receive fails,
//! then close both of their endpoints. [`WorkerPool::shutdown`] closes
//! the dispatcher and the ring, joins the threads, and runs the ring's
//! destruction barrier, which by then has nothing left to wait for.

use std::sync::Arc;
use std::thread;

use crate::channel::mpmc;
use crate::channel::SendError;

/// Job entry point: an opaque context pointer in, nothing out.
pub type JobFn = fn(*mut ());

/// A unit of work for the general pool: function pointer plus context.
///
/// The pool never touches the context; ownership stays with the caller
/// and nothing is freed when the job retires.
#[derive(Clone, Copy)]
pub struct Job {
    func: JobFn,
    ctx: *mut (),
}

impl Job {
    fn run(self) {
        (self.func)(self.ctx);
    }
}

// SAFETY: the `execute` contract makes the context safe to move across
// threads; the function pointer is plain data.
unsafe impl Send for Job {}

/// Fixed set of worker threads draining one MPMC ring of `T`.
///
/// The general pool ([`WorkerPool::init`]) carries [`Job`] elements; the
/// job scheduler instantiates the same loop over its own element type.
pub struct WorkerPool<T: Send + 'static> {
    channel: mpmc::Channel<T>,
    dispatcher: mpmc::Sender<T>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `threads` workers over a fresh ring of `capacity`. Each
    /// worker runs `body(own_sender, item)` per received item.
    ///
    /// # Panics
    /// Panics if `threads` is zero or a worker thread cannot be spawned.
    pub(crate) fn with_worker_body<F>(threads: usize, capacity: usize, body: F) -> Self
    where
        F: Fn(&mpmc::Sender<T>, T) + Send + Sync + 'static,
    {
        assert!(threads > 0, "worker pool needs at least one thread");

        let channel = mpmc::Channel::<T>::with_capacity(capacity);
        let dispatcher = channel.sender();
        let body = Arc::new(body);

        let workers = (0..threads)
            .map(|i| {
                let receiver = channel.receiver();
                let own_sender = channel.sender();
                let body = Arc::clone(&body);
                thread::Builder::new()
                    .name(format!("seak-worker-{i}"))
                    .spawn(move || {
                        while let Ok(item) = receiver.recv() {
                            body(&own_sender, item);
                        }
                        // Ring closed and drained past our ticket: leave
                        // the destruction barrier.
                        own_sender.close();
                        receiver.close();
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            channel,
            dispatcher,
            workers,
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The external dispatcher endpoint.
    pub(crate) fn dispatcher(&self) -> &mpmc::Sender<T> {
        &self.dispatcher
    }

    /// Closes the dispatcher and the ring, joins every worker, and runs
    /// the ring's destruction barrier.
    ///
    /// Items still queued when the ring closes are drained by workers on
    /// their way out; items behind an abandoned ticket are dropped with
    /// the ring.
    pub fn shutdown(self) {
        drop(self);
    }

    fn shutdown_in_place(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.dispatcher.close();
        self.channel.close();
        for worker in self.workers.drain(..) {
            worker.join().expect("worker thread panicked");
        }
        self.channel.destroy();
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown_in_place();
    }
}

impl WorkerPool<Job> {
    /// General-purpose pool: `threads` workers over a ring of `4 *
    /// threads` jobs.
    pub fn init(threads: usize) -> Self {
        Self::with_worker_body(threads, threads.saturating_mul(4), |_own_sender, job: Job| {
            job.run();
        })
    }

    /// Submits a job, spinning while the ring is at capacity. Fails once
    /// the pool is shutting down.
    ///
    /// # Safety
    /// `ctx` must be valid until the job has executed and safe to access
    /// from whichever worker thread runs it.
    pub unsafe fn execute(&self, func: JobFn, ctx: *mut ()) -> Result<(), SendError<Job>> {
        self.dispatcher.send(Job { func, ctx })
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bump(ctx: *mut ()) {
        // SAFETY: tests pass a pointer to a live AtomicUsize.
        let counter = unsafe { &*(ctx as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn runs_every_submitted_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::init(4);

        for _ in 0..100 {
            let ctx = Arc::as_ptr(&counter) as *mut ();
            // SAFETY: counter outlives the pool; AtomicUsize is Sync.
            unsafe { pool.execute(bump, ctx) }.unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn single_worker_drains_in_order_of_intake() {
        // One worker, one consumer ticket stream: strict FIFO.
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pool = {
            let log = log.clone();
            WorkerPool::<u64>::with_worker_body(1, 4, move |_tx, v| {
                log.lock().unwrap().push(v);
            })
        };

        for v in 0..50u64 {
            pool.dispatcher().send(v).unwrap();
        }
        pool.shutdown();

        assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn worker_self_dispatch_runs_follow_ups() {
        // Each seed job re-enqueues a follow-up through the worker's own
        // sender. The ring must be sized for the outstanding total; a
        // worker blocked producing is also a consumer that isn't
        // consuming.
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = {
            let counter = counter.clone();
            WorkerPool::<u64>::with_worker_body(2, 256, move |own_sender, v| {
                if v < 1_000 {
                    // Follow-up; send may fail only at shutdown.
                    let _ = own_sender.send(v + 1_000);
                }
                counter.fetch_add(1, Ordering::Relaxed);
            })
        };

        for v in 0..100u64 {
            pool.dispatcher().send(v).unwrap();
        }

        while counter.load(Ordering::Relaxed) < 200 {
            std::hint::spin_loop();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn execute_fails_after_dispatcher_close() {
        let pool = WorkerPool::init(1);
        pool.dispatcher().close();

        let counter = AtomicUsize::new(0);
        let ctx = &counter as *const AtomicUsize as *mut ();
        // SAFETY: counter outlives the call.
        assert!(unsafe { pool.execute(bump, ctx) }.is_err());
        pool.shutdown();
    }
}
