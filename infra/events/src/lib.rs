//! # Fanout Events
//!
//! An in-process, type-generic publish/subscribe bus built around a single
//! dispatch engine.
//!
//! ## Overview
//!
//! One [`Bus`] handle is shared by producers ([`Bus::emit`]) and consumers
//! ([`Bus::subscribe`]). Every request is turned into a message for the
//! dispatch engine, a single Tokio task that exclusively owns the subscriber
//! registry. Nothing else ever reads or writes that registry, so no locks
//! guard it.
//!
//! ```text
//!  producers ──► emit ──┐                              ┌──► [queue] ──► Subscription A
//!                       ├──► control channel ──► engine├──► [queue] ──► Subscription B
//!  consumers ──► subscribe ┘   (FIFO)          (filters)└──► [queue] ──► on_emit task
//! ```
//!
//! ## Features
//!
//! * **Filtered fan-out**: each subscription carries [`Filter`]s combined with AND.
//! * **Lossy back-pressure**: a subscriber whose bounded queue is full is
//!   evicted instead of slowing down the engine, other subscribers or producers.
//! * **Scoped lifetimes**: subscriptions and the bus itself are bound to a
//!   [`CancellationToken`]; cancelling it closes the corresponding queues.
//! * **Explicit shutdown errors**: [`Bus::emit`] and [`Bus::subscribe`] fail
//!   with [`BusError::Terminated`] once the bus scope has fired.
//!
//! # Example
//!
//! ```rust
//! use fanout_events::{Bus, BusError, CancellationToken, Filter};
//!
//! #[derive(Debug, PartialEq)]
//! struct OrderPlaced { id: u64, total: u64 }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BusError> {
//!     let app = CancellationToken::new();
//!     let bus = Bus::new(&app);
//!
//!     let mut everything = bus.subscribe(&app, [])?;
//!     let mut large = bus.subscribe(&app, [Filter::new(|o: &OrderPlaced| o.total > 100)])?;
//!
//!     bus.emit(OrderPlaced { id: 1, total: 50 }).await?;
//!     bus.emit(OrderPlaced { id: 2, total: 500 }).await?;
//!
//!     assert_eq!(everything.recv().await.map(|o| o.id), Some(1));
//!     assert_eq!(everything.recv().await.map(|o| o.id), Some(2));
//!     assert_eq!(large.recv().await.map(|o| o.id), Some(2));
//!
//!     app.cancel();
//!     assert!(large.recv().await.is_none());
//!     Ok(())
//! }
//! ```

mod bus;
mod config;
mod engine;
mod error;
mod filter;
mod subscriber;
mod subscription;

pub use bus::{Bus, BusBuilder, Event, NoScope, WithScope};
pub use config::{BusConfig, DEFAULT_INBOUND_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY};
pub use engine::{BusStats, EngineState};
pub use error::{BusError, BusErrorExt};
pub use filter::Filter;
pub use subscriber::SubscriberId;
pub use subscription::Subscription;
pub use tokio_util::sync::CancellationToken;
