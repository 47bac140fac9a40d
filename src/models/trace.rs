use serde::Serialize;

use crate::models::{
    hook::{NotificationHook, SkippedHook},
    queue::QueueEntry,
    signal::Signal,
    template::NotificationTemplate,
};

/// Coarse state of a signal's delivery chain, as shown in the trace view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TraceState {
    NoHooksMatched,
    AwaitingDelivery,
    Sent,
    FailedAfterRetries { retries: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedEntry {
    pub entry: QueueEntry,
    /// `None` when the referenced template no longer exists.
    pub template: Option<NotificationTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalTrace {
    pub signal: Signal,
    /// Hooks whose template is currently usable for dispatch.
    pub matched_hooks: Vec<NotificationHook>,
    /// Hooks for the signal type that are matched but not queued, because
    /// their template is inactive or missing.
    pub skipped_hooks: Vec<SkippedHook>,
    pub queue_entries: Vec<TracedEntry>,
    /// Template of the first queue entry, if it still resolves.
    pub template: Option<NotificationTemplate>,
    pub state: TraceState,
}
