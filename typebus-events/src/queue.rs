//! Pending event queue

use crate::error::{BusError, BusResult, HandlerError};
use crate::handler::Subscriber;
use crate::key::{Qualifier, TypeKey};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A queued event with its type erased.
pub(crate) trait PendingEvent: Send {
    /// Bucket this event is delivered to
    fn key(&self) -> TypeKey;

    /// Publish order, for diagnostics
    fn sequence(&self) -> u64;

    /// Call one subscriber with the event. `None` on a type mismatch.
    fn invoke(&mut self, subscriber: &Subscriber) -> Option<Result<(), HandlerError>>;
}

struct Queued<E> {
    key: TypeKey,
    sequence: u64,
    event: E,
}

impl<E: Send + 'static> PendingEvent for Queued<E> {
    fn key(&self) -> TypeKey {
        self.key
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn invoke(&mut self, subscriber: &Subscriber) -> Option<Result<(), HandlerError>> {
        subscriber.invoke(&mut self.event)
    }
}

pub(crate) type Batch = VecDeque<Box<dyn PendingEvent>>;

/// FIFO of published, not yet delivered events.
///
/// Producers may run on any thread; the mutex is held only to append or
/// to swap out the whole queue, never while handlers run. `closed` is only
/// written with the mutex held, so a push either lands before `close`
/// returns or fails.
pub(crate) struct EventQueue {
    pending: Mutex<Batch>,
    next_sequence: AtomicU64,
    closed: AtomicBool,
    max_pending: Option<usize>,
}

impl EventQueue {
    pub(crate) fn new(max_pending: Option<usize>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            next_sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            max_pending,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Batch> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event; returns its sequence number.
    pub(crate) fn push<E: Send + 'static>(&self, qualifier: Qualifier, event: E) -> BusResult<u64> {
        let mut pending = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Stopped);
        }
        if let Some(limit) = self.max_pending {
            if pending.len() >= limit {
                return Err(BusError::CapacityExceeded {
                    resource: "pending events",
                    limit,
                });
            }
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        pending.push_back(Box::new(Queued {
            key: TypeKey::of::<E>(qualifier),
            sequence,
            event,
        }));
        Ok(sequence)
    }

    /// Refuse further pushes. Events already queued stay queued.
    pub(crate) fn close(&self) {
        let _pending = self.lock();
        self.closed.store(true, Ordering::Release);
    }

    /// Take everything queued so far, leaving the queue empty.
    pub(crate) fn take_all(&self) -> Batch {
        std::mem::take(&mut *self.lock())
    }

    /// Put undelivered events back ahead of anything published since.
    pub(crate) fn requeue_front(&self, mut events: Batch) {
        if events.is_empty() {
            return;
        }
        let mut pending = self.lock();
        events.append(&mut *pending);
        *pending = events;
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_sequences() {
        let queue = EventQueue::new(None);
        assert_eq!(queue.push(Qualifier::Value, 1i32).unwrap(), 0);
        assert_eq!(queue.push(Qualifier::Ref, "two").unwrap(), 1);
        assert_eq!(queue.len(), 2);

        let batch = queue.take_all();
        assert_eq!(queue.len(), 0);

        let keys: Vec<_> = batch.iter().map(|e| e.key()).collect();
        assert_eq!(
            keys,
            vec![
                TypeKey::of::<i32>(Qualifier::Value),
                TypeKey::of::<&str>(Qualifier::Ref)
            ]
        );
    }

    #[test]
    fn test_requeue_front_keeps_order() {
        let queue = EventQueue::new(None);
        queue.push(Qualifier::Value, 1u8).unwrap();
        queue.push(Qualifier::Value, 2u8).unwrap();
        let batch = queue.take_all();

        queue.push(Qualifier::Value, 3u8).unwrap();
        queue.requeue_front(batch);

        let sequences: Vec<_> = queue.take_all().iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_closed_queue_rejects_pushes() {
        let queue = EventQueue::new(None);
        queue.push(Qualifier::Value, 1u8).unwrap();
        queue.close();

        assert!(matches!(
            queue.push(Qualifier::Value, 2u8),
            Err(BusError::Stopped)
        ));
        assert_eq!(queue.len(), 1);

        // undelivered events can still go back
        let batch = queue.take_all();
        queue.requeue_front(batch);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let queue = EventQueue::new(Some(1));
        queue.push(Qualifier::Value, ()).unwrap();
        assert!(matches!(
            queue.push(Qualifier::Value, ()),
            Err(BusError::CapacityExceeded { limit: 1, .. })
        ));

        queue.take_all();
        assert!(queue.push(Qualifier::Value, ()).is_ok());
    }
}
