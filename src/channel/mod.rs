//! Bounded lock-free message-passing rings.
//!
//! Four topologies share one data model: a fixed slot array indexed by
//! `cursor % capacity`, two monotonic 64-bit cursors (`head` for
//! producers, `tail` for consumers) each isolated on its own cache line,
//! and a sticky closed flag. Capacity is any non-zero count; it is fixed
//! at construction and never resized.
//!
//! # Module map
//! - [`spsc`]: single producer, single consumer. No per-slot metadata;
//!   occupancy is derived purely from `head - tail`. Both operations are
//!   non-blocking.
//! - [`mpsc`]: many producers, one consumer. Producers block on a
//!   per-slot sequence; the consumer receive is non-blocking.
//! - [`spmc`]: one producer, many consumers. Consumers block on the
//!   per-slot sequence.
//! - [`mpmc`]: many producers, many consumers. Both sides block.
//!
//! The three multi-endpoint rings share the sequence protocol in the
//! private `seq` module: a slot is writable at ticket `p` iff its
//! sequence equals `p`, publishes as `p + 1`, is readable at ticket `c`
//! iff the sequence equals `c + 1`, and recycles as `c + capacity`. The
//! sequence is the sole synchronizer between contending endpoints; the
//! `fetch_add` on a cursor only hands out tickets.
//!
//! # Closure and shutdown
//! `close` is sticky. Producers fail fast (or abandon a mid-spin wait)
//! once the ring is closed; consumers drain what was published. Rings
//! that hand out multiple endpoints of a role count them, and `destroy`
//! spins until every tracked handle has been closed or dropped; the
//! storage itself is freed when the last owner goes away.
//!
//! # Waits
//! Every wait is a spin with a CPU relax hint, polling the closed flag.
//! There are no kernel waits on any path.

use std::error::Error;
use std::fmt;

pub mod mpmc;
pub mod mpsc;
pub mod spmc;
pub mod spsc;

mod seq;

/// Error from a non-blocking send. The rejected value is handed back.
pub enum TrySendError<T> {
    /// The ring is at capacity; retry is reasonable.
    Full(T),
    /// The ring (or this endpoint) is closed; terminal.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// Returns `true` if the send failed because the ring was full.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns `true` if the send failed because of closure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("sending on a full ring"),
            Self::Closed(_) => f.write_str("sending on a closed ring"),
        }
    }
}

impl<T> Error for TrySendError<T> {}

/// Error from a blocking send: the ring (or this endpoint) is closed.
/// The rejected value is handed back.
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed ring")
    }
}

impl<T> Error for SendError<T> {}

/// Error from a non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing published yet; retry is reasonable.
    Empty,
    /// This endpoint is closed; terminal.
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("receiving on an empty ring"),
            Self::Closed => f.write_str("receiving on a closed ring"),
        }
    }
}

impl Error for TryRecvError {}

/// Error from a blocking receive: the ring (or this endpoint) is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("receiving on a closed ring")
    }
}

impl Error for RecvError {}
