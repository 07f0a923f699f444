//! Scheduler events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the worker pool, the
//! timeout controller and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `WorkerPool` (submit, dispatch, workers, shutdown),
//!   `TimeoutController` (expiry), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the pool's subscriber listener, which fans out to the
//!   [`SubscriberSet`](crate::SubscriberSet).
//!
//! See `core/mod.rs` for the system-level wiring diagram.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
