//! Per-task deadlines and cancellation.
//!
//! ## Contents
//! - [`TimeoutController`] arms one deadline per in-flight identity and cancels
//!   the attempt's token when it elapses
//! - [`TimeoutState`] diagnostic view of one identity

mod controller;

pub use controller::{TimeoutController, TimeoutState};
