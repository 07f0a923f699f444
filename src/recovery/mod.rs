//! Task-state persistence across process restarts.
//!
//! ## Contents
//! - [`RecoveryStore`] async storage contract (`save` / `load` / `recover`)
//! - [`JsonFileStore`] whole-map JSON snapshot at `<dir>/task_states.json`
//! - [`TaskState`] last known state label of an identity, with timestamp
//! - [`StateRecorder`] subscriber that saves lifecycle states to a store
//!
//! ```text
//! WorkerPool ──► Bus ──► SubscriberSet ──► StateRecorder ──► RecoveryStore::save
//! WorkerPool::start ──► RecoveryStore::load ──► WorkerPool::recovered()
//! ```

mod recorder;
mod store;

pub use recorder::StateRecorder;
pub use store::{JsonFileStore, RecoveryStore, TaskState};
