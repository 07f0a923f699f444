//! # Recovery subscriber.
//!
//! [`StateRecorder`] maps lifecycle events to state labels and saves them to a
//! [`RecoveryStore`]. Saving is best-effort: failures are logged.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use crate::tasks::Outcome;

use super::store::RecoveryStore;

/// Subscriber persisting the latest state of each identity.
pub struct StateRecorder {
    store: Arc<dyn RecoveryStore>,
}

impl StateRecorder {
    pub fn new(store: Arc<dyn RecoveryStore>) -> Self {
        Self { store }
    }
}

fn state_label(ev: &Event) -> Option<&'static str> {
    match ev.kind {
        EventKind::TaskSubmitted => Some("queued"),
        EventKind::TaskStarting => Some("running"),
        EventKind::RetryScheduled => Some("retrying"),
        EventKind::TaskCompleted => Some(match ev.outcome {
            Some(Outcome::Succeeded) => "succeeded",
            Some(Outcome::Canceled) => "canceled",
            _ => "failed",
        }),
        _ => None,
    }
}

#[async_trait]
impl Subscribe for StateRecorder {
    async fn on_event(&self, ev: &Event) {
        let (Some(id), Some(state)) = (ev.task.as_deref(), state_label(ev)) else {
            return;
        };
        if let Err(e) = self.store.save(id, state).await {
            warn!(task = %id, state, error = %e, "failed to save task state");
        }
    }

    fn name(&self) -> &'static str {
        "state-recorder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::JsonFileStore;

    #[tokio::test]
    async fn records_terminal_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let recorder = StateRecorder::new(store.clone());

        recorder
            .on_event(&Event::new(EventKind::TaskStarting).with_task("a"))
            .await;
        assert_eq!(store.recover("a").await.unwrap().state, "running");

        recorder
            .on_event(
                &Event::new(EventKind::TaskCompleted)
                    .with_task("a")
                    .with_outcome(Outcome::Exhausted),
            )
            .await;
        assert_eq!(store.recover("a").await.unwrap().state, "failed");

        recorder
            .on_event(&Event::new(EventKind::TimeoutHit).with_task("a"))
            .await;
        assert_eq!(store.recover("a").await.unwrap().state, "failed");
    }
}
