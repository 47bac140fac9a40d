use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::status::QueueStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    Created,
    StatusChanged,
    Requeued,
    Deleted,
    SignalProcessed,
}

/// Change notification pushed to every registered observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub kind: QueueEventKind,
    pub entry_id: Option<Uuid>,
    pub signal_id: Option<Uuid>,
    pub from: Option<QueueStatus>,
    pub to: Option<QueueStatus>,
    pub retry_count: Option<u32>,
    pub at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(kind: QueueEventKind) -> Self {
        Self {
            kind,
            entry_id: None,
            signal_id: None,
            from: None,
            to: None,
            retry_count: None,
            at: Utc::now(),
        }
    }

    pub fn for_entry(mut self, entry_id: Uuid) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    pub fn for_signal(mut self, signal_id: Option<Uuid>) -> Self {
        self.signal_id = signal_id;
        self
    }

    pub fn transition(mut self, from: Option<QueueStatus>, to: QueueStatus) -> Self {
        self.from = from;
        self.to = Some(to);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }
}
