use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{DispatchError, DispatchResult},
    models::{
        queue::{QueueEntry, QueueFilter},
        retry::RetryConfig,
        status::{FailureKind, QueueStatus},
    },
    pipeline::{
        dispatcher::ChannelDispatcher,
        queue::{QueueManager, StatusChange},
    },
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub retry: RetryConfig,
    /// `PENDING` entries older than this are failed as expired.
    pub expire_after: chrono::Duration,
    /// `RETRYING` entries untouched for this long are treated as a timed out
    /// attempt (the worker died mid-flight).
    pub in_flight_timeout: chrono::Duration,
    pub worker_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retry: RetryConfig::default(),
            expire_after: chrono::Duration::hours(24),
            in_flight_timeout: chrono::Duration::minutes(5),
            worker_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub recovered: usize,
    pub expired: usize,
    pub retried: usize,
    pub dispatched: usize,
    pub sent: usize,
    pub failed: usize,
    /// `FAILED` entries the scheduler will not touch again.
    pub needs_attention: Vec<Uuid>,
}

/// Periodic owner of retries and expiry.
pub struct RetryScheduler {
    queue: QueueManager,
    dispatcher: Arc<ChannelDispatcher>,
    config: SchedulerConfig,
}

impl RetryScheduler {
    pub fn new(
        queue: QueueManager,
        dispatcher: Arc<ChannelDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// True when the scheduler will never retry `entry` again.
    pub fn needs_attention(retry: &RetryConfig, entry: &QueueEntry) -> bool {
        entry.status == QueueStatus::Failed
            && (entry.retry_count >= retry.max_attempts
                || !entry.error_kind.is_some_and(|kind| kind.is_retryable()))
    }

    pub async fn sweep(&self) -> DispatchResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One pass over the queue as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> DispatchResult<SweepReport> {
        let mut report = SweepReport::default();

        for entry in self.queue.list(&QueueFilter::with_status(QueueStatus::Retrying)).await? {
            if entry.updated_at + self.config.in_flight_timeout > now {
                continue;
            }
            let change = StatusChange::failed(FailureKind::Transport, "delivery attempt timed out");
            if self.settle(&entry, change).await {
                report.recovered += 1;
            }
        }

        for entry in self.queue.list(&QueueFilter::with_status(QueueStatus::Pending)).await? {
            let since = entry.scheduled_at.unwrap_or(entry.created_at);
            if since + self.config.expire_after > now {
                continue;
            }
            let change = StatusChange::failed(FailureKind::Expired, "expired before delivery");
            if self.settle(&entry, change).await {
                report.expired += 1;
            }
        }

        for entry in self.queue.list(&QueueFilter::with_status(QueueStatus::Failed)).await? {
            if Self::needs_attention(&self.config.retry, &entry) {
                report.needs_attention.push(entry.id);
                continue;
            }
            if entry.updated_at + self.config.retry.delay_for(entry.retry_count) > now {
                continue;
            }
            if self.settle(&entry, StatusChange::to(QueueStatus::Pending)).await {
                report.retried += 1;
            }
        }

        let due: Vec<QueueEntry> = self
            .queue
            .list(&QueueFilter::with_status(QueueStatus::Pending))
            .await?
            .into_iter()
            .filter(|entry| entry.is_due(now))
            .collect();

        let results: Vec<DispatchResult<QueueEntry>> = stream::iter(due)
            .map(|entry| self.dispatcher.dispatch_entry(entry))
            .buffer_unordered(self.config.worker_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(entry) => {
                    report.dispatched += 1;
                    match entry.status {
                        QueueStatus::Sent => report.sent += 1,
                        QueueStatus::Failed => report.failed += 1,
                        _ => {}
                    }
                }
                Err(DispatchError::ConcurrentUpdate(id)) => {
                    debug!(entry_id = %id, "Entry claimed by another worker");
                }
                Err(e) => error!(error = %e, "Dispatch attempt could not be recorded"),
            }
        }

        if !report.needs_attention.is_empty() {
            warn!(
                count = report.needs_attention.len(),
                "Failed entries need manual intervention"
            );
        }
        info!(
            recovered = report.recovered,
            expired = report.expired,
            retried = report.retried,
            dispatched = report.dispatched,
            sent = report.sent,
            failed = report.failed,
            "Scheduler sweep finished"
        );

        Ok(report)
    }

    async fn settle(&self, entry: &QueueEntry, change: StatusChange) -> bool {
        match self.queue.apply(entry, change).await {
            Ok(_) => true,
            Err(DispatchError::ConcurrentUpdate(id)) => {
                debug!(entry_id = %id, "Entry changed during sweep, skipping");
                false
            }
            Err(e) => {
                error!(entry_id = %entry.id, error = %e, "Scheduler transition failed");
                false
            }
        }
    }

    /// Sweeps every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_retries = self.config.retry.max_attempts,
            "Retry scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Scheduler sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Retry scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::payload::Payload;

    fn failed_entry(retry_count: u32, kind: Option<FailureKind>) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: Uuid::new_v4(),
            event_type: "estimate_request".into(),
            signal_id: None,
            template_id: "T1".into(),
            payload: Payload::Null,
            recipient_ids: vec![],
            cc_ids: vec![],
            bcc_ids: vec![],
            channels: Default::default(),
            status: QueueStatus::Failed,
            retry_count,
            error_message: Some("boom".into()),
            error_kind: kind,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            sent_at: None,
            owner: "system".into(),
            requeued_from: None,
            version: 1,
        }
    }

    #[test]
    fn exhausted_and_permanent_failures_need_attention() {
        let retry = RetryConfig::default();

        assert!(!RetryScheduler::needs_attention(
            &retry,
            &failed_entry(2, Some(FailureKind::Transport))
        ));
        assert!(RetryScheduler::needs_attention(
            &retry,
            &failed_entry(3, Some(FailureKind::Transport))
        ));
        assert!(RetryScheduler::needs_attention(
            &retry,
            &failed_entry(0, Some(FailureKind::TemplateInactive))
        ));
        assert!(RetryScheduler::needs_attention(&retry, &failed_entry(0, None)));
    }
}
