//! # Deadline controller for in-flight tasks.
//!
//! [`TimeoutController`] keeps at most one armed deadline per task identity.
//! Each deadline owns a [`CancellationToken`] that the worker passes into the
//! script runner, so expiry reaches the running process instead of being
//! merely recorded.
//!
//! ## State machine (per identity)
//! ```text
//!            arm()                 clear()
//!   Unset ──────────► Armed ──────────────────► Cleared  (token released, not fired)
//!                       │  ▲
//!                       │  └── arm() again: previous deadline dropped, new one armed
//!                       │
//!                       └──────────────────────► Expired  (token cancelled, TimeoutHit)
//!                          on_expire() / watch
//! ```
//! `Cleared` and `Expired` drop the record, so afterwards the identity reads as
//! `Unset` and every operation but `arm` fails with `NoTimeoutSet`.
//!
//! ## Rules
//! - Re-arming replaces, never stacks: the old watch is aborted and a
//!   generation check stops a watch that already woke up from firing
//! - `on_expire` fires at most once per arm; a second call fails with `NoTimeoutSet`
//! - Each deadline has its own watch task, so one slow task never delays the
//!   expiry of another
//! - The record map lock is never held while cancelling tokens or publishing events

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TimeoutError;
use crate::events::{Bus, Event, EventKind};

/// Diagnostic view of one identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutState {
    /// Nothing armed (never armed, cleared, or expired).
    Unset,
    /// A deadline is armed.
    Armed {
        /// Time left until the deadline (zero once it has passed).
        remaining: Duration,
    },
}

/// One armed deadline.
struct TimeoutRecord {
    deadline: Instant,
    budget: Duration,
    token: CancellationToken,
    generation: u64,
    watch: Option<JoinHandle<()>>,
}

struct Inner {
    records: RwLock<HashMap<String, TimeoutRecord>>,
    generation: AtomicU64,
    active_watch: bool,
    bus: Option<Bus>,
}

/// Shared handle to the deadline table of one pool.
///
/// Cloning is cheap; all clones share the same records.
#[derive(Clone)]
pub struct TimeoutController {
    inner: Arc<Inner>,
}

impl TimeoutController {
    /// Creates a controller with an active background watch per deadline.
    ///
    /// Expiry publishes [`EventKind::TimeoutHit`] to `bus` when one is given.
    pub fn new(bus: Option<Bus>) -> Self {
        Self::build(true, bus)
    }

    /// Creates a controller without background watches.
    ///
    /// Deadlines only fire through [`on_expire`](Self::on_expire) or
    /// [`poll_expired`](Self::poll_expired).
    pub fn polled() -> Self {
        Self::build(false, None)
    }

    fn build(active_watch: bool, bus: Option<Bus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                active_watch,
                bus,
            }),
        }
    }

    /// Arms a deadline `now + duration` for `id` with a fresh cancellation token.
    ///
    /// An existing deadline for `id` is dropped first (its watch never fires).
    pub async fn arm(&self, id: &str, duration: Duration) -> CancellationToken {
        self.arm_child(id, duration, &CancellationToken::new()).await
    }

    /// Like [`arm`](Self::arm), but the token is a child of `parent`, so
    /// cancelling `parent` (explicit cancel, shutdown) reaches the same token.
    pub async fn arm_child(
        &self,
        id: &str,
        duration: Duration,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let token = parent.child_token();
        let deadline = Instant::now() + duration;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        // The watch is spawned under the write lock: it cannot look the record
        // up before the record exists.
        let previous = {
            let mut records = self.inner.records.write().await;
            let watch = self.inner.active_watch.then(|| {
                spawn_watch(Arc::downgrade(&self.inner), id.to_string(), generation, deadline)
            });
            records.insert(
                id.to_string(),
                TimeoutRecord {
                    deadline,
                    budget: duration,
                    token: token.clone(),
                    generation,
                    watch,
                },
            )
        };
        if let Some(prev) = previous {
            debug!(task = %id, "re-armed deadline; previous deadline dropped");
            if let Some(w) = prev.watch {
                w.abort();
            }
        }
        token
    }

    /// Returns whether the deadline for `id` has passed. No side effects.
    pub async fn is_expired(&self, id: &str) -> Result<bool, TimeoutError> {
        let records = self.inner.records.read().await;
        let record = records.get(id).ok_or_else(|| no_timeout(id))?;
        Ok(Instant::now() >= record.deadline)
    }

    /// Fires the deadline for `id`: cancels its token, drops the record and
    /// publishes `TimeoutHit`.
    ///
    /// Fails with `NoTimeoutSet` if nothing is armed, which makes repeated
    /// calls harmless.
    pub async fn on_expire(&self, id: &str) -> Result<(), TimeoutError> {
        let record = {
            let mut records = self.inner.records.write().await;
            records.remove(id).ok_or_else(|| no_timeout(id))?
        };
        if let Some(w) = &record.watch {
            w.abort();
        }
        self.inner.fire(id, record);
        Ok(())
    }

    /// Releases the deadline for `id` without cancelling its token.
    pub async fn clear(&self, id: &str) -> Result<(), TimeoutError> {
        let record = {
            let mut records = self.inner.records.write().await;
            records.remove(id).ok_or_else(|| no_timeout(id))?
        };
        if let Some(w) = record.watch {
            w.abort();
        }
        Ok(())
    }

    /// Fires every deadline that has passed; returns the identities fired.
    pub async fn poll_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let due: Vec<String> = {
            let records = self.inner.records.read().await;
            records
                .iter()
                .filter(|(_, r)| now >= r.deadline)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut fired = Vec::with_capacity(due.len());
        for id in due {
            if self.on_expire(&id).await.is_ok() {
                fired.push(id);
            }
        }
        fired
    }

    /// Diagnostic state of `id`.
    pub async fn state(&self, id: &str) -> TimeoutState {
        let records = self.inner.records.read().await;
        match records.get(id) {
            Some(r) => TimeoutState::Armed {
                remaining: r.deadline.saturating_duration_since(Instant::now()),
            },
            None => TimeoutState::Unset,
        }
    }

    /// Number of armed deadlines.
    pub async fn armed(&self) -> usize {
        self.inner.records.read().await.len()
    }
}

impl Inner {
    /// Fires a record already removed from the map.
    fn fire(&self, id: &str, record: TimeoutRecord) {
        record.token.cancel();
        debug!(task = %id, budget = ?record.budget, "deadline expired");
        if let Some(bus) = &self.bus {
            bus.publish(
                Event::new(EventKind::TimeoutHit)
                    .with_task(id)
                    .with_timeout(record.budget),
            );
        }
    }

    /// Fires `id` only if the armed record is still the one with `generation`.
    async fn expire_generation(&self, id: &str, generation: u64) {
        let record = {
            let mut records = self.records.write().await;
            match records.get(id) {
                Some(r) if r.generation == generation => records.remove(id),
                _ => None,
            }
        };
        if let Some(record) = record {
            self.fire(id, record);
        }
    }
}

fn spawn_watch(
    inner: Weak<Inner>,
    id: String,
    generation: u64,
    deadline: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        time::sleep_until(deadline).await;
        if let Some(inner) = inner.upgrade() {
            inner.expire_generation(&id, generation).await;
        }
    })
}

fn no_timeout(id: &str) -> TimeoutError {
    TimeoutError::NoTimeoutSet { id: id.to_string() }
}
