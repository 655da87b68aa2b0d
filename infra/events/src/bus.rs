use crate::config::{BusConfig, validate_capacity};
use crate::engine::{BusStats, Command, Engine, EngineState};
use crate::error::{BusError, BusErrorExt};
use crate::filter::Filter;
use crate::subscriber::{Subscriber, SubscriberId};
use crate::subscription::Subscription;
use private::Sealed;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::sync::{Semaphore, TryAcquireError, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Marker trait for types that can be sent across a [`Bus`].
///
/// Any type that is `Send + Sync + 'static` automatically implements this trait.
pub trait Event: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Event for T {}

struct BusInner<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    inbound: Arc<Semaphore>,
    scope: CancellationToken,
    state: watch::Receiver<EngineState>,
    config: BusConfig,
    next_id: AtomicU64,
}

/// Producer and consumer handle of a publish/subscribe bus for events of type `T`.
///
/// Cloning is cheap; all clones talk to the same dispatch engine. The engine
/// lives until the bus scope is cancelled or the last handle is dropped.
///
/// # Examples
/// ```rust
/// use fanout_events::{Bus, CancellationToken, Filter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fanout_events::BusError> {
/// let scope = CancellationToken::new();
/// let bus = Bus::<u32>::new(&scope);
///
/// let mut large = bus.subscribe(&scope, [Filter::new(|n: &u32| *n > 5)])?;
/// bus.emit_all([1, 6, 3, 9]).await?;
///
/// assert_eq!(large.recv().await.as_deref(), Some(&6));
/// assert_eq!(large.recv().await.as_deref(), Some(&9));
///
/// scope.cancel();
/// bus.terminated().await;
/// assert!(bus.emit(10).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct Bus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T: Event> Bus<T> {
    /// Creates a bus with the default [`BusConfig`] bound to `scope`.
    ///
    /// Cancelling `scope` (or any of its parents) shuts the bus down.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime; the dispatch engine is spawned as a task.
    #[must_use]
    pub fn new(scope: &CancellationToken) -> Self {
        Self::start(scope, BusConfig::default())
    }

    /// Returns a [`BusBuilder`] to customize queue capacities.
    #[must_use = "The builder must be configured before it can be used to create a bus."]
    pub const fn builder() -> BusBuilder<T> {
        BusBuilder::new()
    }

    fn start(scope: &CancellationToken, config: BusConfig) -> Self {
        let scope = scope.child_token();
        let (commands, receiver) = mpsc::unbounded_channel();
        let inbound = Arc::new(Semaphore::new(config.inbound_capacity));
        let (state_tx, state) = watch::channel(EngineState::Running);

        let engine = Engine::new(receiver, Arc::clone(&inbound), scope.clone(), state_tx);
        tokio::spawn(engine.run());

        debug!(
            event = std::any::type_name::<T>(),
            inbound_capacity = config.inbound_capacity,
            subscriber_capacity = config.subscriber_capacity,
            "Bus created"
        );

        Self {
            inner: Arc::new(BusInner {
                commands,
                inbound,
                scope,
                state,
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Emits an event to every matching subscriber.
    ///
    /// Suspends while `inbound_capacity` events are already waiting for the
    /// dispatch engine; this is the only point where a producer is throttled.
    /// Delivery to individual subscribers never blocks.
    ///
    /// `Ok` means the event was accepted by the bus. If the bus shuts down
    /// before the engine reaches it, the event is discarded with the rest of
    /// the pending work and no subscriber sees it.
    ///
    /// # Errors
    /// Returns [`BusError::Terminated`] if the bus has shut down, including
    /// when it shuts down while this call is waiting for capacity.
    pub async fn emit(&self, event: T) -> Result<(), BusError> {
        self.ensure_running("emit")?;

        let inbound = Arc::clone(&self.inner.inbound);
        let permit = tokio::select! {
            biased;
            () = self.inner.scope.cancelled() => return Err(BusError::terminated("emit")),
            permit = inbound.acquire_owned() => {
                permit.map_err(|_| BusError::terminated("emit"))?
            },
        };

        // The scope may have fired while the permit was being granted.
        self.ensure_running("emit")?;
        self.send(Command::Dispatch { event, permit }, "emit")
    }

    /// Emits an event without waiting for inbound capacity.
    ///
    /// # Errors
    /// Returns [`BusError::InboundFull`] if the inbound queue is saturated and
    /// [`BusError::Terminated`] if the bus has shut down.
    pub fn try_emit(&self, event: T) -> Result<(), BusError> {
        self.ensure_running("emit")?;

        let permit = Arc::clone(&self.inner.inbound).try_acquire_owned().map_err(|e| match e {
            TryAcquireError::NoPermits => BusError::InboundFull {
                message: format!("{} events pending", self.inner.config.inbound_capacity).into(),
                context: Some(std::any::type_name::<T>().into()),
            },
            TryAcquireError::Closed => BusError::terminated("emit"),
        })?;

        self.send(Command::Dispatch { event, permit }, "emit")
    }

    /// Emits every event in iteration order and returns how many were accepted.
    ///
    /// # Errors
    /// Stops at the first failure and returns [`BusError::Terminated`] with the
    /// number of events already accepted as context.
    pub async fn emit_all(&self, events: impl IntoIterator<Item = T>) -> Result<usize, BusError> {
        let mut accepted = 0usize;
        for event in events {
            self.emit(event).await.context(format!("{accepted} events accepted"))?;
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Subscribes with the bus default queue capacity.
    ///
    /// See [`Bus::subscribe_with_capacity`].
    ///
    /// # Errors
    /// Returns [`BusError::Terminated`] if the bus has shut down.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime; a task is spawned to watch `scope`.
    pub fn subscribe(
        &self,
        scope: &CancellationToken,
        filters: impl IntoIterator<Item = Filter<T>>,
    ) -> Result<Subscription<T>, BusError> {
        self.subscribe_with_capacity(scope, self.inner.config.subscriber_capacity, filters)
    }

    /// Subscribes to every event accepted by all `filters` (logical AND).
    ///
    /// Returns immediately. The registration is ordered before any event
    /// emitted after this call returns, so such events are never missed.
    /// Cancelling `scope` eventually closes the subscription; if the queue
    /// holds `capacity` undelivered events when another one matches, the
    /// subscription is evicted and closed as well.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] if `capacity` is zero or above
    /// Tokio's permit limit, and
    /// [`BusError::Terminated`] if the bus has shut down.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime; a task is spawned to watch `scope`.
    pub fn subscribe_with_capacity(
        &self,
        scope: &CancellationToken,
        capacity: usize,
        filters: impl IntoIterator<Item = Filter<T>>,
    ) -> Result<Subscription<T>, BusError> {
        let capacity = validate_capacity(capacity)?;
        self.ensure_running("subscribe")?;

        let id = SubscriberId::next(&self.inner.next_id);
        let alive = scope.child_token();
        let (sender, receiver) = mpsc::channel(capacity);
        let subscriber = Subscriber::new(id, sender, filters.into_iter().collect(), alive.clone());

        self.send(Command::Register(subscriber), "subscribe")?;
        self.watch_scope(id, alive.clone());

        trace!(subscriber = %id, capacity, "Subscription requested");
        Ok(Subscription::new(id, receiver, alive))
    }

    /// Runs `action` for every matching event until `scope` is cancelled.
    ///
    /// The action runs on its own task, outside the dispatch engine, and is
    /// subject to the same saturation-eviction as any other subscriber.
    ///
    /// # Errors
    /// Returns [`BusError::Terminated`] if the bus has shut down.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime; the action runs on a spawned task.
    pub fn on_emit<F>(
        &self,
        scope: &CancellationToken,
        action: F,
        filters: impl IntoIterator<Item = Filter<T>>,
    ) -> Result<JoinHandle<()>, BusError>
    where
        F: Fn(&T) + Send + 'static,
    {
        let mut subscription = self.subscribe(scope, filters)?;
        Ok(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                action(&event);
            }
            trace!(subscriber = %subscription.id(), "Callback subscription finished");
        }))
    }

    /// Asks the dispatch engine for its current counters.
    ///
    /// The reply is ordered after every command sent before this call, which
    /// makes it a convenient barrier: all previously emitted events have been
    /// fanned out once it returns.
    ///
    /// # Errors
    /// Returns [`BusError::Terminated`] if the bus has shut down.
    pub async fn stats(&self) -> Result<BusStats, BusError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats(reply), "query stats")?;
        response.await.map_err(|_| BusError::terminated("query stats"))
    }

    /// Forwards cancellation of a subscription's scope to the engine.
    ///
    /// Holds only a weak sender so a forgotten subscription never keeps the engine alive.
    fn watch_scope(&self, id: SubscriberId, alive: CancellationToken) {
        let commands = self.inner.commands.downgrade();
        let bus_scope = self.inner.scope.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = alive.cancelled() => {
                    if let Some(commands) = commands.upgrade() {
                        let _ = commands.send(Command::Unregister(id));
                    }
                },
                () = bus_scope.cancelled() => {},
            }
        });
    }
}

impl<T> Bus<T> {
    /// Cancels the bus scope. Equivalent to cancelling the scope passed at construction,
    /// without affecting that scope's other children.
    pub fn shutdown(&self) {
        self.inner.scope.cancel();
    }

    /// Current lifecycle state of the dispatch engine.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Returns `true` once the dispatch engine has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == EngineState::Terminated
    }

    /// Waits until the dispatch engine has closed every subscription and exited.
    pub async fn terminated(&self) {
        let mut state = self.inner.state.clone();
        let _ = state.wait_for(|s| *s == EngineState::Terminated).await;
    }

    /// The configuration this bus was built with.
    #[must_use]
    pub fn config(&self) -> BusConfig {
        self.inner.config
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), BusError> {
        if self.inner.scope.is_cancelled() {
            return Err(BusError::terminated(operation));
        }
        Ok(())
    }

    fn send(&self, command: Command<T>, operation: &'static str) -> Result<(), BusError> {
        self.inner.commands.send(command).map_err(|_| BusError::terminated(operation))
    }
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Bus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("event", &std::any::type_name::<T>())
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("available_permits", &self.inner.inbound.available_permits())
            .finish()
    }
}

#[derive(Debug)]
pub struct NoScope;
#[derive(Debug)]
pub struct WithScope(CancellationToken);

mod private {
    pub(super) trait Sealed {}
}
impl Sealed for NoScope {}
impl Sealed for WithScope {}

/// A builder for configuring and starting a [`Bus`].
///
/// A scope is required before [`BusBuilder::build`] becomes available.
///
/// # Examples
/// ```rust
/// use fanout_events::{Bus, CancellationToken};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fanout_events::BusError> {
/// let scope = CancellationToken::new();
/// let bus = Bus::<String>::builder()
///     .inbound_capacity(1024)
///     .subscriber_capacity(64)
///     .scope(&scope)
///     .build()?;
///
/// assert_eq!(bus.config().inbound_capacity, 1024);
/// # Ok(())
/// # }
/// ```
#[allow(private_bounds)]
pub struct BusBuilder<T, S: Sealed = NoScope> {
    config: BusConfig,
    scope: S,
    event: PhantomData<fn() -> T>,
}

impl<T> BusBuilder<T, NoScope> {
    const fn new() -> Self {
        Self {
            config: BusConfig {
                inbound_capacity: crate::config::DEFAULT_INBOUND_CAPACITY,
                subscriber_capacity: crate::config::DEFAULT_SUBSCRIBER_CAPACITY,
            },
            scope: NoScope,
            event: PhantomData,
        }
    }

    /// Binds the bus lifetime to `scope`.
    pub fn scope(self, scope: &CancellationToken) -> BusBuilder<T, WithScope> {
        BusBuilder { config: self.config, scope: WithScope(scope.clone()), event: PhantomData }
    }
}

#[allow(private_bounds)]
impl<T, S: Sealed> BusBuilder<T, S> {
    /// Replaces all capacities with `config`.
    #[must_use = "The builder must be configured before it can be used to create a bus."]
    pub const fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of emitted events waiting for the dispatch engine.
    #[must_use = "The builder must be configured before it can be used to create a bus."]
    pub const fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Default output queue capacity for new subscriptions.
    #[must_use = "The builder must be configured before it can be used to create a bus."]
    pub const fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.config.subscriber_capacity = capacity;
        self
    }
}

impl<T: Event> BusBuilder<T, WithScope> {
    /// Validates the configuration and spawns the dispatch engine.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidCapacity`] if either capacity is zero or above
    /// Tokio's permit limit.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn build(self) -> Result<Bus<T>, BusError> {
        self.config.validate()?;
        Ok(Bus::start(&self.scope.0, self.config))
    }
}

#[allow(private_bounds)]
impl<T, S: Sealed + fmt::Debug> fmt::Debug for BusBuilder<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusBuilder")
            .field("event", &std::any::type_name::<T>())
            .field("config", &self.config)
            .field("scope", &self.scope)
            .finish()
    }
}
