//! Single-producer multi-consumer bounded ring.
//!
//! Consumers contend on the tail cursor and block on the slot sequence;
//! each message goes to exactly one consumer, in the order consumers win
//! their tickets. The producer also advances `head` with `fetch_add` —
//! the cursor RMW is not what makes it single-producer; the take-once
//! mint of [`Channel::sender`] is.
//!
//! Consumers are counted for the destruction barrier; see
//! [`Channel::destroy`].

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
    /// Receivers minted and not yet closed.
    consumers_alive: AtomicUsize,
    sender_taken: AtomicBool,
}

/// SPMC ring handle: mints endpoints and controls closure.
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
                consumers_alive: AtomicUsize::new(0),
                sender_taken: AtomicBool::new(false),
            }),
        }
    }

    /// Mints the producer endpoint.
    ///
    /// # Panics
    /// Panics if the sender was already minted: the ring supports exactly
    /// one producer.
    pub fn sender(&self) -> Sender<T> {
        assert!(
            !self.shared.sender_taken.swap(true, Ordering::AcqRel),
            "spmc sender already minted"
        );
        Sender {
            shared: self.shared.clone(),
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

    /// Closes the ring. Sticky; blocked consumers and producers unblock
    /// with an error.
    pub fn close(&self) {
        self.shared.ring.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ring.is_closed()
    }

    /// Closes the ring and spins until every receiver has been closed or
    /// dropped. Storage is freed when the last owner goes away.
    pub fn destroy(&self) {
        self.close();
        while self.shared.consumers_alive.load(Ordering::Acquire) != 0 {
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

/// Producer endpoint. Exactly one exists.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> Sender<T> {
    /// Publishes `value`, spinning while its slot is occupied by the
    /// previous lap (all consumers one full wrap behind).
    ///
    /// Fails if the ring is closed, including closure mid-spin.
    pub fn send(&mut self, value: T) -> Result<(), SendError<T>> {
        if self.shared.ring.is_closed() {
            return Err(SendError(value));
        }

        let ticket = self.shared.ring.claim_send();
        // SAFETY: ticket freshly claimed from this ring's head cursor.
        unsafe { self.shared.ring.produce(ticket, value) }.map_err(SendError)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ring.is_closed()
    }
}

/// Consumer endpoint. Counted; shareable across threads, though each
/// worker normally holds its own.
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

    #[derive(Debug, Clone)]
    enum Op {
        Send(u64),
        Recv,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u64>().prop_map(Op::Send), Just(Op::Recv)]
    }

    proptest! {
        /// Any single-thread interleaving matches a VecDeque model.
        /// Both operations block in this ring, so each is skipped when
        /// the model says it would spin with no second thread to make
        /// progress (send on full, recv on empty). A lone consumer's
        /// tickets are sequential, so delivery is FIFO against the model.
        #[test]
        fn matches_deque_model(ops in proptest::collection::vec(op_strategy(), 0..400)) {
            let ring = Channel::<u64>::with_capacity(8);
            let mut tx = ring.sender();
            let rx = ring.receiver();
            let mut model = std::collections::VecDeque::new();

            for op in &ops {
                match op {
                    Op::Send(v) if model.len() < 8 => {
                        prop_assert!(tx.send(*v).is_ok());
                        model.push_back(*v);
                    }
                    Op::Send(_) => {}
                    Op::Recv => {
                        if let Some(expected) = model.pop_front() {
                            prop_assert_eq!(rx.recv(), Ok(expected));
                        }
                    }
                }
            }

            prop_assert_eq!(ring.len(), model.len());
        }
    }
}
