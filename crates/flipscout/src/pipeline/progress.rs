use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::job_repo::JobCounts;
use crate::model::{Classification, ItemState};

/// Events emitted by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ItemStarted {
        job_id: String,
        identifier: String,
    },
    ItemFinished {
        job_id: String,
        identifier: String,
        state: ItemState,
        classification: Option<Classification>,
    },
    JobFinished {
        job_id: String,
        counts: JobCounts,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and the CLI's quiet paths.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events to a broadcast channel. Having no subscribers is not an
/// error; the event is simply dropped.
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(sender: Arc<broadcast::Sender<ProgressEvent>>) -> Self {
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_delivers_to_subscriber() {
        let (tx, _) = broadcast::channel(8);
        let progress = BroadcastProgress::new(Arc::new(tx));
        let mut rx = progress.subscribe();

        progress.report(ProgressEvent::ItemStarted {
            job_id: "job".to_string(),
            identifier: "B000000001".to_string(),
        });

        match rx.try_recv().unwrap() {
            ProgressEvent::ItemStarted { identifier, .. } => assert_eq!(identifier, "B000000001"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let progress = BroadcastProgress::new(Arc::new(tx));
        progress.report(ProgressEvent::JobFinished {
            job_id: "job".to_string(),
            counts: JobCounts::default(),
        });
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProgressEvent::ItemFinished {
            job_id: "job".to_string(),
            identifier: "B000000001".to_string(),
            state: ItemState::Success,
            classification: Some(Classification::Pass),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "item_finished");
        assert_eq!(json["state"], "SUCCESS");
        assert_eq!(json["classification"], "PASS");
    }
}
