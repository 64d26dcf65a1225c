//! Two-phase single-producer/single-consumer event queue
//!
//! A thin layer over `rtrb` that adds staged writes: the producer stages
//! events with [`EventProducer::try_write`] and publishes them with
//! [`EventProducer::commit`]. Until then the consumer sees nothing, so a
//! producer that runs out of room halfway through a multi-event update can
//! [`abort`](EventProducer::abort) and leave the queue untouched.
//!
//! ```text
//! ┌──────────────┐  try_write  ┌──────────┐  commit  ┌────────────┐  read  ┌──────────────┐
//! │   Producer   │────────────►│  staged  │─────────►│  rtrb ring │───────►│   Consumer   │
//! │ (one thread) │             │ (inline) │          │ (lock-free)│        │ (one thread) │
//! └──────────────┘             └──────────┘          └────────────┘        └──────────────┘
//! ```
//!
//! Staging lives in an inline array, so neither side allocates after
//! construction.

use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;

/// Maximum number of writes that can be staged before a commit
///
/// Large enough for a five-rank mixture plus its bookkeeping events.
pub const MAX_STAGED: usize = 16;

/// Returned by [`EventProducer::try_write`] when the event was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue full")]
pub struct QueueFull;

/// Create a queue able to hold `capacity` committed events
pub fn event_queue<T: Copy + Default>(capacity: usize) -> (EventProducer<T>, EventConsumer<T>) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        EventProducer {
            producer,
            staged: [T::default(); MAX_STAGED],
            staged_len: 0,
        },
        EventConsumer { consumer },
    )
}

/// Writing half, owned by exactly one thread
pub struct EventProducer<T> {
    producer: Producer<T>,
    staged: [T; MAX_STAGED],
    staged_len: usize,
}

impl<T: Copy> EventProducer<T> {
    /// Stage one event
    ///
    /// Fails without side effects if the ring cannot take it once all
    /// currently staged events are committed.
    pub fn try_write(&mut self, event: T) -> Result<(), QueueFull> {
        if self.staged_len == MAX_STAGED || self.producer.slots() <= self.staged_len {
            return Err(QueueFull);
        }
        self.staged[self.staged_len] = event;
        self.staged_len += 1;
        Ok(())
    }

    /// Publish the oldest `n` staged events to the consumer in one step
    ///
    /// `n` is clamped to the number of staged events. Returns how many
    /// events became visible.
    pub fn commit(&mut self, n: usize) -> usize {
        let n = n.min(self.staged_len);
        if n == 0 {
            return 0;
        }
        let written = match self.producer.write_chunk_uninit(n) {
            Ok(chunk) => chunk.fill_from_iter(self.staged[..n].iter().copied()),
            // try_write reserved the room, so only a foreign producer could cause this
            Err(_) => 0,
        };
        self.staged.copy_within(n..self.staged_len, 0);
        self.staged_len -= n;
        written
    }

    /// Publish everything staged so far
    pub fn commit_all(&mut self) -> usize {
        self.commit(self.staged_len)
    }

    /// Discard staged events that were never committed
    pub fn abort(&mut self) {
        self.staged_len = 0;
    }

    /// Events staged but not yet committed
    pub fn pending(&self) -> usize {
        self.staged_len
    }

    /// Free slots for new writes
    pub fn available_to_write(&self) -> usize {
        self.producer
            .slots()
            .saturating_sub(self.staged_len)
            .min(MAX_STAGED - self.staged_len)
    }

    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }

    /// Stage a group of events and commit them together, or none of them
    pub fn write_all(&mut self, events: &[T]) -> Result<(), QueueFull> {
        let base = self.staged_len;
        for &event in events {
            if let Err(e) = self.try_write(event) {
                self.staged_len = base;
                return Err(e);
            }
        }
        self.commit_all();
        Ok(())
    }
}

/// Reading half, owned by exactly one thread
pub struct EventConsumer<T> {
    consumer: Consumer<T>,
}

impl<T> EventConsumer<T> {
    /// Number of committed events waiting to be read
    pub fn available_to_read(&self) -> usize {
        self.consumer.slots()
    }

    /// Take the oldest committed event
    pub fn read(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    /// Read every event committed at the time of the call
    ///
    /// Bounded so a producer that keeps writing cannot starve the caller.
    pub fn drain(&mut self, mut f: impl FnMut(T)) -> usize {
        let count = self.consumer.slots();
        for _ in 0..count {
            match self.consumer.pop() {
                Ok(event) => f(event),
                Err(_) => return count,
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let (mut tx, mut rx) = event_queue::<u32>(8);
        tx.try_write(1).unwrap();
        tx.try_write(2).unwrap();
        assert_eq!(rx.available_to_read(), 0);
        assert_eq!(rx.read(), None);

        assert_eq!(tx.commit(2), 2);
        assert_eq!(rx.available_to_read(), 2);
        assert_eq!(rx.read(), Some(1));
        assert_eq!(rx.read(), Some(2));
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn test_partial_commit_keeps_remainder_staged() {
        let (mut tx, mut rx) = event_queue::<u32>(8);
        for v in 10..13 {
            tx.try_write(v).unwrap();
        }
        assert_eq!(tx.commit(1), 1);
        assert_eq!(tx.pending(), 2);
        assert_eq!(rx.read(), Some(10));
        assert_eq!(rx.read(), None);
        assert_eq!(tx.commit(5), 2);
        assert_eq!(rx.read(), Some(11));
        assert_eq!(rx.read(), Some(12));
    }

    #[test]
    fn test_abort_discards_staged() {
        let (mut tx, mut rx) = event_queue::<u8>(8);
        tx.try_write(0xB0).unwrap();
        tx.try_write(98).unwrap();
        tx.abort();
        assert_eq!(tx.commit_all(), 0);
        assert_eq!(rx.available_to_read(), 0);
    }

    #[test]
    fn test_full_queue_rejects_without_side_effects() {
        let (mut tx, mut rx) = event_queue::<u32>(2);
        tx.try_write(1).unwrap();
        tx.try_write(2).unwrap();
        assert_eq!(tx.try_write(3), Err(QueueFull));
        tx.commit_all();
        assert_eq!(tx.try_write(4), Err(QueueFull));

        assert_eq!(rx.read(), Some(1));
        tx.try_write(5).unwrap();
        tx.commit_all();
        assert_eq!(rx.read(), Some(2));
        assert_eq!(rx.read(), Some(5));
        assert_eq!(rx.read(), None);
    }

    #[test]
    fn test_write_all_is_all_or_nothing() {
        let (mut tx, mut rx) = event_queue::<u32>(3);
        tx.write_all(&[1, 2]).unwrap();
        assert_eq!(tx.write_all(&[3, 4]), Err(QueueFull));
        assert_eq!(tx.pending(), 0);
        assert_eq!(rx.available_to_read(), 2);
        let mut seen = Vec::new();
        rx.drain(|v| seen.push(v));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_spsc_threads_see_each_committed_event_once() {
        const COUNT: u32 = 20_000;
        let (mut tx, mut rx) = event_queue::<u32>(64);

        let producer = thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                // Stage in groups of three, commit two, abort the rest
                let mut staged = 0;
                for offset in 0..3.min(COUNT - next) {
                    if tx.try_write(next + offset).is_err() {
                        break;
                    }
                    staged += 1;
                }
                let committed = tx.commit(staged.min(2)) as u32;
                tx.abort();
                next += committed;
                if committed == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match rx.read() {
                Some(v) => {
                    assert_eq!(v, expected, "out of order or duplicated event");
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert_eq!(rx.read(), None);
    }
}
