use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

/// Progress of a running task, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin {
        id: ProgressId,
        title: String,
        jobs: usize,
    },
    Report {
        id: ProgressId,
        percentage: u32,
    },
    End {
        id: ProgressId,
        status: TaskStatus,
    },
}

impl ProgressEvent {
    pub fn id(&self) -> ProgressId {
        match self {
            ProgressEvent::Begin { id, .. }
            | ProgressEvent::Report { id, .. }
            | ProgressEvent::End { id, .. } => *id,
        }
    }
}

pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

#[derive(Clone)]
pub(crate) struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
    next_id: Arc<AtomicU64>,
}

impl ProgressSender {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    pub(crate) fn start(&self, title: &str, jobs: usize) -> TaskProgress {
        let id = ProgressId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // No subscribers is fine.
        let _ = self.tx.send(ProgressEvent::Begin {
            id,
            title: title.to_owned(),
            jobs,
        });
        TaskProgress {
            id,
            tx: self.tx.clone(),
            last: None,
        }
    }
}

/// Per-task progress publisher; repeated percentages are not re-sent.
pub(crate) struct TaskProgress {
    id: ProgressId,
    tx: broadcast::Sender<ProgressEvent>,
    last: Option<u32>,
}

impl TaskProgress {
    /// Publishes `percentage`; returns `false` when it did not change.
    pub(crate) fn report(&mut self, percentage: u32) -> bool {
        if self.last == Some(percentage) {
            return false;
        }
        self.last = Some(percentage);
        let _ = self.tx.send(ProgressEvent::Report {
            id: self.id,
            percentage,
        });
        true
    }

    pub(crate) fn finish(self, status: TaskStatus) {
        let _ = self.tx.send(ProgressEvent::End {
            id: self.id,
            status,
        });
    }
}
