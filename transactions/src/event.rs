//! Stack notifications and the thread-safe event queue.
//!
//! A [`TransactionStack`](crate::TransactionStack) reports every change of its
//! history to the registered [`StackObserver`]s. Observers run synchronously
//! on the caller's thread, right after the change is applied.
//!
//! [`EventQueue`] is a ready-made observer for UIs that run on another thread
//! or refresh once per frame: the stack pushes into it, the UI drains it and
//! re-queries `can_undo` / `can_redo` to enable or disable its menu items.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transaction::TransactionId;

/// Why a transaction left the stack without being undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// Removed from the redo side because a new transaction was committed.
    Truncated,
    /// Removed from the oldest end of the history to respect the capacity.
    Evicted,
    /// Ended with [`EndAction::Discard`](crate::EndAction::Discard) and rolled back.
    RolledBack,
}

/// A change of the stack's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// A root transaction entered the history.
    Committed {
        transaction: TransactionId,
        description: String,
    },
    /// The transaction behind the cursor was undone.
    Undone { transaction: TransactionId },
    /// The transaction ahead of the cursor was redone.
    Redone { transaction: TransactionId },
    /// A transaction was dropped and its operations disposed.
    Discarded {
        transaction: TransactionId,
        reason: DiscardReason,
    },
    /// All transactions were disposed.
    Cleared,
    /// The capacity bound changed.
    CapacityChanged { capacity: usize },
}

/// Receives [`StackEvent`]s from a stack it is subscribed to.
pub trait StackObserver: Send {
    fn on_event(&mut self, event: &StackEvent);
}

impl<F> StackObserver for F
where
    F: FnMut(&StackEvent) + Send,
{
    fn on_event(&mut self, event: &StackEvent) {
        self(event)
    }
}

/// Identifier returned by [`TransactionStack::subscribe`](crate::TransactionStack::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// A thread-safe queue of [`StackEvent`]s.
///
/// Because the inner storage is wrapped in a [`Mutex`], the queue can be
/// shared through an [`Arc`]: [`observer`](Self::observer) is subscribed to
/// the stack, the UI drains the queue.
///
/// # Example
///
/// ```ignore
/// let events = Arc::new(EventQueue::new());
/// stack.subscribe(events.observer());
///
/// // Once per frame:
/// for event in events.drain() {
///     history_panel.refresh(&event);
/// }
/// ```
pub struct EventQueue {
    queue: Mutex<Vec<StackEvent>>,
}

impl EventQueue {
    /// Creates a new empty event queue.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues an event. Callable from `&self` thanks to interior mutability.
    pub fn push(&self, event: StackEvent) {
        self.queue.lock().push(event);
    }

    /// Drains all queued events, returning them in emission order.
    pub fn drain(&self) -> Vec<StackEvent> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Returns `true` if there are no queued events.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns an observer that forwards every event into this queue.
    pub fn observer(self: &Arc<Self>) -> impl StackObserver + use<> {
        let queue = Arc::clone(self);
        move |event: &StackEvent| queue.push(event.clone())
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.queue.lock().len();
        f.debug_struct("EventQueue").field("pending", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn undone(id: u64) -> StackEvent {
        StackEvent::Undone {
            transaction: TransactionId(id),
        }
    }

    #[test]
    fn push_and_drain() {
        let queue = EventQueue::new();
        queue.push(undone(1));
        queue.push(StackEvent::Cleared);

        let events = queue.drain();
        assert_eq!(events, vec![undone(1), StackEvent::Cleared]);
    }

    #[test]
    fn drain_empties_queue() {
        let queue = EventQueue::new();
        queue.push(StackEvent::Cleared);
        let _ = queue.drain();
        assert!(queue.is_empty());
        assert_eq!(queue.drain().len(), 0);
    }

    #[test]
    fn is_empty_reflects_state() {
        let queue = EventQueue::new();
        assert!(queue.is_empty());
        queue.push(StackEvent::Cleared);
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);
        let _ = queue.drain();
        assert!(queue.is_empty());
    }

    #[test]
    fn shared_queue_observes_events() {
        let queue = Arc::new(EventQueue::new());
        let mut observer = queue.observer();
        observer.on_event(&undone(3));
        observer.on_event(&StackEvent::CapacityChanged { capacity: 8 });

        assert_eq!(
            queue.drain(),
            vec![undone(3), StackEvent::CapacityChanged { capacity: 8 }]
        );
    }

    #[test]
    fn closures_are_observers() {
        let mut seen = Vec::new();
        {
            let mut observer = |event: &StackEvent| seen.push(event.clone());
            StackObserver::on_event(&mut observer, &StackEvent::Cleared);
        }
        assert_eq!(seen, vec![StackEvent::Cleared]);
    }

    #[test]
    fn queue_is_drained_from_another_thread() {
        let queue = Arc::new(EventQueue::new());
        let producer = queue.clone();
        std::thread::spawn(move || {
            for id in 0..4 {
                producer.push(undone(id));
            }
        })
        .join()
        .unwrap();

        assert_eq!(queue.drain().len(), 4);
    }

    #[test]
    fn debug_impl() {
        let queue = EventQueue::new();
        queue.push(StackEvent::Cleared);
        let debug = format!("{queue:?}");
        assert!(debug.contains("EventQueue"));
        assert!(debug.contains("pending"));
    }
}
