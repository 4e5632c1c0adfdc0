//! One-slot result mailbox. A newer batch overwrites an unread one, so the
//! consumer only ever sees the latest, and publishing never waits on it.

use std::sync::Arc;

use sightline_vision::DetectionBatchOutput;
use tokio::sync::watch;

pub type SharedBatch = Arc<DetectionBatchOutput>;

pub fn mailbox() -> (BatchPublisher, BatchReceiver) {
    let (tx, rx) = watch::channel(None);
    (
        BatchPublisher { tx },
        BatchReceiver { rx, last_seen: None },
    )
}

#[derive(Debug)]
pub struct BatchPublisher {
    tx: watch::Sender<Option<SharedBatch>>,
}

impl BatchPublisher {
    /// Overwrite the slot. Succeeds whether or not anyone is listening.
    pub fn publish(&self, batch: DetectionBatchOutput) {
        self.tx.send_replace(Some(Arc::new(batch)));
    }
}

#[derive(Debug, Clone)]
pub struct BatchReceiver {
    rx: watch::Receiver<Option<SharedBatch>>,
    last_seen: Option<u64>,
}

impl BatchReceiver {
    /// Wait for a batch newer than the last one returned. `None` once the
    /// pipeline has stopped and the final batch was already taken.
    pub async fn next(&mut self) -> Option<SharedBatch> {
        loop {
            if let Some(batch) = self.unseen() {
                return Some(batch);
            }
            if self.rx.changed().await.is_err() {
                return self.unseen();
            }
        }
    }

    /// The latest batch, if it has not been returned before.
    pub fn try_latest(&mut self) -> Option<SharedBatch> {
        self.unseen()
    }

    fn unseen(&mut self) -> Option<SharedBatch> {
        let current = self.rx.borrow_and_update().clone()?;
        if self.last_seen == Some(current.sequence) {
            return None;
        }
        self.last_seen = Some(current.sequence);
        Some(current)
    }
}
