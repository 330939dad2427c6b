//! Multi-producer single-consumer bounded ring.
//!
//! Producers contend on the head cursor (`fetch_add` tickets) and block
//! on the slot sequence; the lone consumer is non-blocking. An unready
//! slot at `tail` reports [`TryRecvError::Empty`] even when producers
//! have claimed tickets past it — a claim is not a publication.
//!
//! Producers are counted: each minted [`Sender`] bumps `producers_alive`
//! and releases it on [`Sender::close`] or drop. [`Channel::destroy`]
//! closes the ring and then spins until that count reaches zero, which is
//! the drain barrier the worker pool relies on at shutdown.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use std::sync::Arc;

use super::seq::SeqRing;
use super::{SendError, TryRecvError};
use crate::hint::relax;

struct Shared<T> {
    ring: SeqRing<T>,
    /// Senders minted and not yet closed.
    producers_alive: AtomicUsize,
    receiver_taken: AtomicBool,
}

/// MPSC ring handle: mints endpoints and controls closure.
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
                receiver_taken: AtomicBool::new(false),
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

    /// Mints the consumer endpoint.
    ///
    /// # Panics
    /// Panics if the receiver was already minted: the ring supports
    /// exactly one consumer.
    pub fn receiver(&self) -> Receiver<T> {
        assert!(
            !self.shared.receiver_taken.swap(true, Ordering::AcqRel),
            "mpsc receiver already minted"
        );
        Receiver {
            shared: self.shared.clone(),
            closed: false,
        }
    }

    /// Closes the ring. Sticky; blocked producers unblock with an error,
    /// the consumer keeps draining published slots.
    pub fn close(&self) {
        self.shared.ring.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ring.is_closed()
    }

    /// Closes the ring and spins until every sender has been closed or
    /// dropped. Storage is freed when the last owner goes away.
    pub fn destroy(&self) {
        self.close();
        while self.shared.producers_alive.load(Ordering::Acquire) != 0 {
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

/// Producer endpoint. Shareable across threads; the ring serializes
/// contending producers through per-slot sequences.
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

/// Consumer endpoint. Exactly one exists; receive never blocks.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    closed: bool,
}

impl<T: Send> Receiver<T> {
    /// Takes the value at `tail` if it has been published.
    ///
    /// Returns [`TryRecvError::Empty`] when the ring is empty or the next
    /// slot is claimed but not yet published; closure of the ring does
    /// not stop the drain.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if self.closed {
            return Err(TryRecvError::Closed);
        }
        // SAFETY: the take-once mint makes this the single consumer.
        unsafe { self.shared.ring.try_consume_next() }.ok_or(TryRecvError::Empty)
    }

    /// Marks this endpoint closed; subsequent receives fail even if the
    /// ring still holds messages.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.shared.ring.is_closed()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn single_thread_fifo() {
        let ring = Channel::<u64>::with_capacity(4);
        let tx = ring.sender();
        let mut rx = ring.receiver();

        for i in 0..4 {
            tx.send(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(rx.try_recv(), Ok(i));
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn closed_sender_refuses_while_ring_open() {
        let ring = Channel::<u64>::with_capacity(4);
        let tx = ring.sender();
        let other = ring.sender();

        tx.close();
        assert!(tx.send(1).is_err());
        assert!(!ring.is_closed());
        // Another sender still works.
        other.send(2).unwrap();
    }

    #[test]
    fn closed_receiver_refuses_despite_messages() {
        let ring = Channel::<u64>::with_capacity(4);
        let tx = ring.sender();
        let mut rx = ring.receiver();

        tx.send(5).unwrap();
        rx.close();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn drain_continues_after_ring_close() {
        let ring = Channel::<u64>::with_capacity(4);
        let tx = ring.sender();
        let mut rx = ring.receiver();

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        ring.close();
        assert!(tx.send(3).is_err());

        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn destroy_waits_for_senders() {
        let ring = Channel::<u64>::with_capacity(4);
        let tx = ring.sender();

        let barrier = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = barrier.clone();
        let handle = std::thread::spawn(move || {
            // Hold the sender briefly so destroy has to wait.
            while !flag.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            drop(tx);
        });

        barrier.store(true, Ordering::Release);
        ring.destroy();
        handle.join().unwrap();
        assert!(ring.is_closed());
    }

    #[test]
    fn empty_on_unready_slot() {
        // A claimed-but-unpublished ticket must read as Empty, not block.
        let ring = Channel::<u64>::with_capacity(4);
        let tx = ring.sender();
        let mut rx = ring.receiver();

        // Claim a ticket by hand without publishing.
        let _ticket = ring.shared.ring.claim_send();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        // A later publish on the next ticket does not reorder past it.
        tx.send(9).unwrap();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    /// Two producers, one consumer: every value arrives exactly once.
    #[test]
    fn loom_two_producers_exactly_once() {
        loom::model(|| {
            let ring = Channel::<u64>::with_capacity(2);
            let mut rx = ring.receiver();

            let handles: Vec<_> = (0..2u64)
                .map(|p| {
                    let tx = ring.sender();
                    thread::spawn(move || {
                        tx.send(p).unwrap();
                    })
                })
                .collect();

            let mut seen = Vec::new();
            while seen.len() < 2 {
                match rx.try_recv() {
                    Ok(v) => seen.push(v),
                    Err(_) => loom::thread::yield_now(),
                }
            }

            for h in handles {
                h.join().unwrap();
            }

            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1]);
        });
    }
}
