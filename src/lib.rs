//! Low-level concurrency and memory primitives for composing job graphs,
//! pipelines, and engine subsystems.
//!
//! # Scope
//! Small, self-contained building blocks tuned for predictable memory use
//! and spin-based latency rather than general-purpose ergonomics. All
//! capacities are fixed up front; nothing resizes, nothing waits in the
//! kernel.
//!
//! # Module map
//! - [`channel`]: four bounded lock-free rings (SPSC, MPSC, SPMC, MPMC)
//!   over cache-padded monotonic cursors; the multi-endpoint variants
//!   synchronize through per-slot sequence numbers.
//! - [`arena`]: epoch-reset region arena — a segmented bump allocator
//!   safe under concurrent producers, with O(1) generation reset.
//! - [`wait_group`]: atomic-counter phase barrier with spin wait.
//! - [`pool`]: fixed worker pool draining one MPMC ring, with a
//!   self-dispatch sender per worker.
//! - [`scheduler`]: dependency-aware job scheduler — arena-backed job
//!   records, single-successor continuations, health-checked epoch
//!   resets.
//!
//! # Design themes
//! - Every wait is a spin with a CPU relax hint, polling a closed flag;
//!   closing a ring is the one way to unblock its endpoints.
//! - Hot cursors and counters sit alone on cache lines.
//! - Tight invariants enable `unsafe` fast paths, documented per type;
//!   read the module docs before extending the internals.

pub mod arena;
pub mod channel;
pub mod pool;
pub mod scheduler;
pub mod wait_group;

mod hint;

pub use arena::RegionArena;
pub use pool::{Job, JobFn, WorkerPool};
pub use scheduler::{JobRef, Scheduler, SchedulerConfig, SchedulerPool};
pub use wait_group::WaitGroup;
