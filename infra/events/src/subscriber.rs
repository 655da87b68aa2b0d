use crate::filter::{Filter, matches_all};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Unique identity of a subscription within a bus.
///
/// Two subscriptions with identical filters still get distinct ids; the
/// registry is keyed by this token, never by the filters themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of a single non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Filters rejected the event.
    Skipped,
    Delivered,
    /// The output queue is full; the consumer is treated as unresponsive.
    Saturated,
    /// The consumer dropped its receiving half or its scope already fired.
    Disconnected,
}

/// Engine-owned half of a subscription.
///
/// Dropping it drops the only sender of the output queue, which is how the
/// consumer observes end-of-stream.
pub(crate) struct Subscriber<T> {
    id: SubscriberId,
    sender: mpsc::Sender<Arc<T>>,
    filters: Vec<Filter<T>>,
    alive: CancellationToken,
}

impl<T> Subscriber<T> {
    pub(crate) const fn new(
        id: SubscriberId,
        sender: mpsc::Sender<Arc<T>>,
        filters: Vec<Filter<T>>,
        alive: CancellationToken,
    ) -> Self {
        Self { id, sender, filters, alive }
    }

    pub(crate) const fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.alive.is_cancelled()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Evaluates the filters and, on a full match, enqueues without waiting.
    pub(crate) fn deliver(&self, event: &Arc<T>) -> Delivery {
        if self.alive.is_cancelled() {
            return Delivery::Disconnected;
        }
        if !matches_all(&self.filters, &**event) {
            return Delivery::Skipped;
        }
        match self.sender.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Saturated,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }

    /// Marks the subscriber dead and closes its output queue.
    ///
    /// Consumes `self` so the queue can only be closed once.
    pub(crate) fn retire(self) {
        self.alive.cancel();
        drop(self.sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(
        capacity: usize,
        filters: Vec<Filter<i64>>,
    ) -> (Subscriber<i64>, mpsc::Receiver<Arc<i64>>) {
        let counter = AtomicU64::new(0);
        let (tx, rx) = mpsc::channel(capacity);
        (Subscriber::new(SubscriberId::next(&counter), tx, filters, CancellationToken::new()), rx)
    }

    #[test]
    fn test_ids_are_unique() {
        let counter = AtomicU64::new(7);
        let a = SubscriberId::next(&counter);
        let b = SubscriberId::next(&counter);

        assert_ne!(a, b);
        assert_eq!(a.get(), 7);
        assert_eq!(b.to_string(), "sub-8");
    }

    #[test]
    fn test_deliver_outcomes() {
        let (sub, mut rx) = subscriber(1, vec![Filter::new(|n: &i64| *n > 0)]);

        assert_eq!(sub.deliver(&Arc::new(-1)), Delivery::Skipped);
        assert_eq!(sub.deliver(&Arc::new(1)), Delivery::Delivered);
        assert_eq!(sub.deliver(&Arc::new(2)), Delivery::Saturated);

        assert_eq!(rx.try_recv().ok().as_deref(), Some(&1));
        drop(rx);
        assert_eq!(sub.deliver(&Arc::new(3)), Delivery::Disconnected);
    }

    #[test]
    fn test_cancelled_scope_stops_delivery() {
        let (sub, mut rx) = subscriber(4, Vec::new());
        sub.alive.cancel();

        assert_eq!(sub.deliver(&Arc::new(1)), Delivery::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_retire_closes_queue() {
        let (sub, mut rx) = subscriber(4, Vec::new());
        let alive = sub.alive.clone();
        assert!(sub.is_alive());
        assert_eq!(sub.capacity(), 4);

        sub.retire();

        assert!(alive.is_cancelled());
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }
}
