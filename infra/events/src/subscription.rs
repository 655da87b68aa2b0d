use crate::error::BusError;
use crate::subscriber::SubscriberId;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// Consumer-side handle of a subscription.
///
/// Yields matching events in the order they were accepted by the bus and ends
/// (returns `None`) once the subscription is closed: its scope was cancelled,
/// the queue overflowed and the subscriber was evicted, or the bus shut down.
/// Events already buffered when the queue closes are still delivered.
///
/// Dropping the handle unsubscribes.
pub struct Subscription<T> {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<T>>,
    alive: CancellationToken,
}

impl<T> Subscription<T> {
    pub(crate) const fn new(
        id: SubscriberId,
        receiver: mpsc::Receiver<Arc<T>>,
        alive: CancellationToken,
    ) -> Self {
        Self { id, receiver, alive }
    }

    /// Identity of this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receives the next event, returning `None` when the subscription is closed.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.receiver.recv().await
    }

    /// Receives the next event without waiting.
    ///
    /// Returns `Ok(None)` when no event is buffered yet.
    ///
    /// # Errors
    /// Returns [`BusError::SubscriptionClosed`] once the queue is closed and drained.
    pub fn try_recv(&mut self) -> Result<Option<Arc<T>>, BusError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(BusError::SubscriptionClosed {
                message: self.id.to_string().into(),
                context: None,
            }),
        }
    }

    /// Number of events buffered and not yet received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` once the subscriber has been removed from the bus.
    ///
    /// Buffered events may still be pending; see [`Subscription::len`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.alive.is_cancelled() || self.receiver.is_closed()
    }

    /// Requests removal from the bus.
    ///
    /// Removal is asynchronous: the queue is closed once the dispatch engine
    /// processes the request, after which [`Subscription::recv`] drains the
    /// remaining buffered events and returns `None`.
    pub fn unsubscribe(&self) {
        self.alive.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Arc<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.alive.cancel();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("buffered", &self.receiver.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
