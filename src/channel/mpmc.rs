//! Multi-producer multi-consumer bounded ring.
//!
//! Both roles claim tickets with `fetch_add` and block on the per-slot
//! sequence. Every message is delivered to exactly one consumer; between
//! consumers the order is the order in which they win tickets. A
//! capacity-1 ring degenerates into a rendezvous that still delivers
//! exactly once.
//!
//! Both roles are counted. [`Channel::destroy`] closes the ring and spins
//! until every sender *and* receiver handle has been closed or dropped —
//! the worker pool leans on this as its shutdown barrier, with each
//! worker closing its own pair of handles on exit.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use std::sync::Arc;

use super::seq::SeqRing;
use super::{RecvError, SendError};
use crate::hint::relax;

struct Shared<T> {
    ring: SeqRing<T>,
    /// Senders minted and not yet closed.
    producers_alive: AtomicUsize,
    /// Receivers minted and not yet closed.
    consumers_alive: AtomicUsize,
}

/// MPMC ring handle: mints endpoints and controls closure.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> Channel<T> {
    /// Creates a ring holding up to `capacity` values.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                ring: SeqRing::with_capacity(capacity),
                producers_alive: AtomicUsize::new(0),
                consumers_alive: AtomicUsize::new(0),
            }),
        }
    }

    /// Mints a producer endpoint and registers it with the drain barrier.
    pub fn sender(&self) -> Sender<T> {
        self.shared.producers_alive.fetch_add(1, Ordering::Release);
        Sender {
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Mints a consumer endpoint and registers it with the drain barrier.
    pub fn receiver(&self) -> Receiver<T> {
        self.shared.consumers_alive.fetch_add(1, Ordering::Release);
        Receiver {
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Closes the ring. Sticky; everything blocked on a slot unblocks
    /// with an error within a bounded number of spin cycles.
    pub fn close(&self) {
        self.shared.ring.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ring.is_closed()
    }

    /// Closes the ring and spins until every endpoint of both roles has
    /// been closed or dropped. Storage is freed when the last owner goes
    /// away.
    pub fn destroy(&self) {
        self.close();
        while self.shared.producers_alive.load(Ordering::Acquire) != 0
            || self.shared.consumers_alive.load(Ordering::Acquire) != 0
        {
            relax();
        }
    }

    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

/// Producer endpoint. Shareable across threads; contention is resolved
/// per slot by the sequence protocol.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
    /// Endpoint-local closed flag; a closed sender refuses to send even
    /// while the ring stays open.
    closed: AtomicBool,
}

impl<T: Send> Sender<T> {
    /// Publishes `value`, spinning while its slot is occupied by the
    /// previous lap.
    ///
    /// Fails if this endpoint or the ring is closed — including closure
    /// that lands mid-spin, in which case the claimed ticket is
    /// abandoned.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.closed.load(Ordering::Acquire) || self.shared.ring.is_closed() {
            return Err(SendError(value));
        }

        let ticket = self.shared.ring.claim_send();
        // SAFETY: ticket freshly claimed from this ring's head cursor.
        unsafe { self.shared.ring.produce(ticket, value) }.map_err(SendError)
    }
}

impl<T> Sender<T> {
    /// Deregisters this endpoint from the drain barrier and marks it
    /// closed. Idempotent; also performed on drop.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.producers_alive.fetch_sub(1, Ordering::Release);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.ring.is_closed()
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer endpoint. Shareable across threads; contention is resolved
/// per slot by the sequence protocol.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    /// Endpoint-local closed flag; a closed receiver refuses to receive
    /// even while the ring still holds messages.
    closed: AtomicBool,
}

impl<T: Send> Receiver<T> {
    /// Takes the next ticket and spins until its slot is published.
    ///
    /// Fails if this endpoint is closed, or if the ring closes while the
    /// slot is still unpublished (the ticket is abandoned).
    pub fn recv(&self) -> Result<T, RecvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecvError);
        }

        let ticket = self.shared.ring.claim_recv();
        // SAFETY: ticket freshly claimed from this ring's tail cursor.
        unsafe { self.shared.ring.consume(ticket) }.ok_or(RecvError)
    }
}

impl<T> Receiver<T> {
    /// Deregisters this endpoint from the drain barrier and marks it
    /// closed. Idempotent; also performed on drop.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.consumers_alive.fetch_sub(1, Ordering::Release);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.ring.is_closed()
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(all(test, feature = "prop-tests", not(loom)))]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    /// Operations name which of the minted endpoints they go through.
    #[derive(Debug, Clone)]
    enum Op {
        Send(u8, u64),
        Recv(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..2u8, any::<u64>()).prop_map(|(which, v)| Op::Send(which, v)),
            (0..2u8).prop_map(Op::Recv),
        ]
    }

    proptest! {
        /// Any single-thread interleaving over two senders and two
        /// receivers matches a VecDeque model. Both operations block in
        /// this ring, so each is skipped when the model says it would
        /// spin with no second thread to make progress (send on full,
        /// recv on empty). Tickets serialize across handles, so the
        /// consumption order is total FIFO regardless of which endpoint
        /// wins each value.
        #[test]
        fn matches_deque_model(ops in proptest::collection::vec(op_strategy(), 0..400)) {
            let ring = Channel::<u64>::with_capacity(8);
            let senders = [ring.sender(), ring.sender()];
            let receivers = [ring.receiver(), ring.receiver()];
            let mut model = std::collections::VecDeque::new();

            for op in &ops {
                match op {
                    Op::Send(which, v) if model.len() < 8 => {
                        prop_assert!(senders[*which as usize].send(*v).is_ok());
                        model.push_back(*v);
                    }
                    Op::Send(..) => {}
                    Op::Recv(which) => {
                        if let Some(expected) = model.pop_front() {
                            prop_assert_eq!(receivers[*which as usize].recv(), Ok(expected));
                        }
                    }
                }
            }

            prop_assert_eq!(ring.len(), model.len());
        }
    }
}
