//! # Dispatch engine
//!
//! The single owner of the subscriber registry. Every registry mutation and
//! every fan-out runs inside [`Engine::run`], one command at a time, in the
//! order commands were accepted on the control channel.
//!
//! ```text
//!  subscribe() ──► Register(sub) ──┐
//!  scope fired ──► Unregister(id) ─┼──► [control channel] ──► Engine::run ──► registry
//!  emit()      ──► Dispatch(ev) ───┤     (unbounded FIFO)          │
//!  stats()     ──► Stats(reply) ───┘                               ├──► try_send ──► [queue 1]
//!                                                                  ├──► try_send ──► [queue 2]
//!                                                                  └──► try_send ──► [queue N]
//! ```
//!
//! ## Rules
//! - **Non-blocking fan-out**: delivery uses `try_send`; a full queue evicts
//!   its subscriber and the event is not redelivered to it.
//! - **Back-pressure**: each pending `Dispatch` holds one inbound permit until
//!   the fan-out is finished, so at most `inbound_capacity` events wait here.
//! - **Idempotent removal**: unregistering an absent subscriber is a no-op.
//! - **Shutdown**: closes every live queue, the inbound semaphore and the
//!   control channel, then publishes [`EngineState::Terminated`].

use crate::bus::Event;
use crate::subscriber::{Delivery, Subscriber, SubscriberId};
use fxhash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Lifecycle of the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Accepting and processing commands.
    Running,
    /// The bus scope fired; live subscribers are being closed.
    ShuttingDown,
    /// All queues are closed and the loop has exited.
    Terminated,
}

/// Point-in-time counters reported by the dispatch engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Subscribers currently registered.
    pub subscribers: usize,
    /// Events fanned out since the bus started.
    pub dispatched: u64,
    /// Subscribers dropped because their queue was full.
    pub evicted: u64,
}

pub(crate) enum Command<T> {
    Register(Subscriber<T>),
    Unregister(SubscriberId),
    Dispatch { event: T, permit: OwnedSemaphorePermit },
    Stats(oneshot::Sender<BusStats>),
}

pub(crate) struct Engine<T> {
    registry: FxHashMap<SubscriberId, Subscriber<T>>,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    inbound: Arc<Semaphore>,
    scope: CancellationToken,
    state: watch::Sender<EngineState>,
    stats: BusStats,
}

impl<T: Event> Engine<T> {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<Command<T>>,
        inbound: Arc<Semaphore>,
        scope: CancellationToken,
        state: watch::Sender<EngineState>,
    ) -> Self {
        Self {
            registry: FxHashMap::default(),
            commands,
            inbound,
            scope,
            state,
            stats: BusStats::default(),
        }
    }

    /// Drives the engine until the bus scope fires or every bus handle is dropped.
    pub(crate) async fn run(mut self) {
        info!(event = std::any::type_name::<T>(), "Dispatch engine started");

        loop {
            let command = tokio::select! {
                biased;
                () = self.scope.cancelled() => break,
                command = self.commands.recv() => command,
            };

            let Some(command) = command else {
                debug!(event = std::any::type_name::<T>(), "All bus handles dropped");
                break;
            };
            self.handle(command);
        }

        self.shutdown();
    }

    fn handle(&mut self, command: Command<T>) {
        match command {
            Command::Register(subscriber) => self.register(subscriber),
            Command::Unregister(id) => self.unregister(id),
            Command::Dispatch { event, permit } => {
                self.dispatch(event);
                drop(permit);
            },
            Command::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            },
        }
    }

    fn register(&mut self, subscriber: Subscriber<T>) {
        let id = subscriber.id();

        if !subscriber.is_alive() {
            trace!(subscriber = %id, "Subscriber cancelled before registration; closing");
            subscriber.retire();
            return;
        }

        debug!(subscriber = %id, capacity = subscriber.capacity(), "Subscriber registered");
        if let Some(previous) = self.registry.insert(id, subscriber) {
            warn!(subscriber = %id, "Subscriber registered twice; closing the previous entry");
            previous.retire();
        }
    }

    fn unregister(&mut self, id: SubscriberId) {
        match self.registry.remove(&id) {
            Some(subscriber) => {
                subscriber.retire();
                debug!(subscriber = %id, remaining = self.registry.len(), "Subscriber unregistered");
            },
            None => trace!(subscriber = %id, "Subscriber already removed"),
        }
    }

    fn dispatch(&mut self, event: T) {
        let event = Arc::new(event);
        let mut delivered = 0usize;
        let mut dropped = Vec::new();

        for (id, subscriber) in &self.registry {
            match subscriber.deliver(&event) {
                Delivery::Delivered => delivered += 1,
                Delivery::Skipped => {},
                outcome @ (Delivery::Saturated | Delivery::Disconnected) => {
                    dropped.push((*id, outcome));
                },
            }
        }

        for (id, outcome) in dropped {
            let Some(subscriber) = self.registry.remove(&id) else { continue };
            if outcome == Delivery::Saturated {
                self.stats.evicted += 1;
                warn!(
                    subscriber = %id,
                    capacity = subscriber.capacity(),
                    "Evicting unresponsive subscriber: output queue full"
                );
            } else {
                debug!(subscriber = %id, "Removing disconnected subscriber");
            }
            subscriber.retire();
        }

        self.stats.dispatched += 1;
        trace!(
            event = std::any::type_name::<T>(),
            delivered,
            subscribers = self.registry.len(),
            "Event dispatched"
        );
    }

    fn snapshot(&self) -> BusStats {
        BusStats { subscribers: self.registry.len(), ..self.stats }
    }

    fn shutdown(&mut self) {
        self.state.send_replace(EngineState::ShuttingDown);

        self.inbound.close();
        self.commands.close();

        let closed = self.registry.len();
        for (_, subscriber) in self.registry.drain() {
            subscriber.retire();
        }

        // Commands accepted before the channel closed are discarded; pending
        // registrations still have their queues closed.
        let mut discarded = 0usize;
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Register(subscriber) = command {
                subscriber.retire();
            }
            discarded += 1;
        }

        self.state.send_replace(EngineState::Terminated);
        info!(
            event = std::any::type_name::<T>(),
            closed,
            discarded,
            dispatched = self.stats.dispatched,
            evicted = self.stats.evicted,
            "Dispatch engine terminated"
        );
    }
}
