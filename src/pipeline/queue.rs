use std::{collections::BTreeSet, sync::Arc};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::{
        audit::{AuditAction, AuditRecord},
        event::{QueueEvent, QueueEventKind},
        hook::NotificationHook,
        queue::{BulkFailure, BulkResult, NewQueueEntry, QueueEntry, QueueFilter},
        signal::Signal,
        status::{FailureKind, QueueStatus},
    },
    pipeline::observer::Observers,
};

/// A requested status change plus the failure details that go with `FAILED`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub to: QueueStatus,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
}

impl StatusChange {
    pub fn to(status: QueueStatus) -> Self {
        Self {
            to: status,
            error_message: None,
            error_kind: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            to: QueueStatus::Failed,
            error_message: Some(message.into()),
            error_kind: Some(kind),
        }
    }
}

/// Owns every mutation of queue entries. All status changes go through the
/// transition table and a version compare-and-set.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn NotificationStore>,
    observers: Observers,
}

impl QueueManager {
    pub fn new(store: Arc<dyn NotificationStore>, observers: Observers) -> Self {
        Self { store, observers }
    }

    /// Builds a `PENDING` entry for one matched hook.
    pub async fn enqueue(
        &self,
        hook: &NotificationHook,
        signal: &Signal,
    ) -> DispatchResult<QueueEntry> {
        let new = NewQueueEntry {
            event_type: signal.signal_type.clone(),
            signal_id: Some(signal.id),
            template_id: hook.template_id.clone(),
            payload: signal.payload.clone(),
            recipient_ids: hook.recipient_resolver.resolve(&signal.payload),
            cc_ids: hook.cc_ids.clone(),
            bcc_ids: hook.bcc_ids.clone(),
            channels: BTreeSet::from([hook.channel.clone()]),
            scheduled_at: None,
            owner: signal.emitted_by.clone(),
        };

        self.create(new).await
    }

    /// Creates an entry directly, without a signal.
    pub async fn create(&self, new: NewQueueEntry) -> DispatchResult<QueueEntry> {
        if new.event_type.trim().is_empty() {
            return Err(DispatchError::Validation(
                "eventType must not be empty".to_string(),
            ));
        }
        if new.template_id.trim().is_empty() {
            return Err(DispatchError::Validation(
                "templateId must not be empty".to_string(),
            ));
        }
        if new.channels.is_empty() {
            return Err(DispatchError::Validation(
                "at least one channel is required".to_string(),
            ));
        }

        let entry = QueueEntry::from_new(new, Utc::now());
        self.insert(entry).await
    }

    async fn insert(&self, entry: QueueEntry) -> DispatchResult<QueueEntry> {
        self.store.insert_entry(&entry).await?;

        info!(
            entry_id = %entry.id,
            event_type = %entry.event_type,
            template_id = %entry.template_id,
            recipients = entry.recipient_ids.len(),
            "Queue entry created"
        );

        self.observers.publish(
            QueueEvent::new(QueueEventKind::Created)
                .for_entry(entry.id)
                .for_signal(entry.signal_id)
                .transition(None, entry.status)
                .with_retry_count(entry.retry_count),
        );

        Ok(entry)
    }

    pub async fn get(&self, id: Uuid) -> DispatchResult<QueueEntry> {
        self.store
            .get_entry(id)
            .await?
            .ok_or(DispatchError::EntryNotFound(id))
    }

    pub async fn list(&self, filter: &QueueFilter) -> DispatchResult<Vec<QueueEntry>> {
        self.store.list_entries(filter).await
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: QueueStatus,
        error_message: Option<String>,
    ) -> DispatchResult<QueueEntry> {
        let current = self.get(id).await?;

        let change = match status {
            QueueStatus::Failed => StatusChange::failed(
                FailureKind::Operator,
                error_message.unwrap_or_else(|| "marked failed".to_string()),
            ),
            other => StatusChange::to(other),
        };

        self.apply(&current, change).await
    }

    /// Applies `change` to the entry as it was read in `current`. Fails with
    /// `ConcurrentUpdate` if anyone else wrote the entry since.
    pub async fn apply(
        &self,
        current: &QueueEntry,
        change: StatusChange,
    ) -> DispatchResult<QueueEntry> {
        let next = Self::transition(current, change)?;

        if !self.store.update_entry(&next, current.version).await? {
            warn!(entry_id = %current.id, "Lost optimistic lock on queue entry");
            return Err(DispatchError::ConcurrentUpdate(current.id));
        }

        info!(
            entry_id = %next.id,
            from = %current.status,
            to = %next.status,
            retry_count = next.retry_count,
            error = next.error_message.as_deref().unwrap_or(""),
            "Queue entry transitioned"
        );

        self.observers.publish(
            QueueEvent::new(QueueEventKind::StatusChanged)
                .for_entry(next.id)
                .for_signal(next.signal_id)
                .transition(Some(current.status), next.status)
                .with_retry_count(next.retry_count),
        );

        Ok(next)
    }

    fn transition(current: &QueueEntry, change: StatusChange) -> DispatchResult<QueueEntry> {
        if !current.status.can_transition_to(change.to) {
            warn!(
                entry_id = %current.id,
                from = %current.status,
                to = %change.to,
                "Rejected invalid queue transition"
            );
            return Err(DispatchError::InvalidTransition {
                id: current.id,
                from: current.status,
                to: change.to,
            });
        }

        let now = Utc::now();
        let mut next = current.clone();
        next.status = change.to;
        next.updated_at = now;
        next.version = current.version + 1;

        match change.to {
            QueueStatus::Sent => {
                next.sent_at = Some(current.sent_at.unwrap_or(now));
                next.error_message = None;
                next.error_kind = None;
            }
            QueueStatus::Failed => {
                next.error_message = change
                    .error_message
                    .or_else(|| Some("delivery failed".to_string()));
                next.error_kind = change.error_kind.or(Some(FailureKind::Operator));
            }
            QueueStatus::Pending => {
                // Only reachable from FAILED: this is a retry.
                next.retry_count = current.retry_count + 1;
                next.error_message = None;
                next.error_kind = None;
            }
            QueueStatus::Retrying => {}
        }

        Ok(next)
    }

    /// Applies `status` to every id independently. Entries already in that
    /// status are reported as unchanged, never as failures.
    pub async fn bulk_update(
        &self,
        ids: &[Uuid],
        status: QueueStatus,
        actor: &str,
    ) -> BulkResult {
        let mut result = BulkResult::default();

        for &id in ids {
            let current = match self.store.get_entry(id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    result.failed.push(BulkFailure {
                        id,
                        reason: DispatchError::EntryNotFound(id).to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    result.failed.push(BulkFailure {
                        id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if current.status == status {
                result.unchanged.push(id);
                continue;
            }

            let change = match status {
                QueueStatus::Failed => StatusChange::failed(
                    FailureKind::Operator,
                    format!("marked failed by {}", actor),
                ),
                other => StatusChange::to(other),
            };

            match self.apply(&current, change).await {
                Ok(_) => {
                    let record = AuditRecord::new(id, AuditAction::BulkUpdated, actor)
                        .with_detail(format!("{} -> {}", current.status, status))
                        .with_snapshot(serde_json::to_value(&current).unwrap_or_default());
                    if let Err(e) = self.store.insert_audit(&record).await {
                        warn!(error = %e, entry_id = %id, "Failed to write audit log");
                    }
                    result.succeeded.push(id);
                }
                Err(e) => result.failed.push(BulkFailure {
                    id,
                    reason: e.to_string(),
                }),
            }
        }

        info!(
            requested = ids.len(),
            succeeded = result.succeeded.len(),
            unchanged = result.unchanged.len(),
            failed = result.failed.len(),
            status = %status,
            actor,
            "Bulk status update finished"
        );

        result
    }

    /// Repeats an entry's delivery intent as a brand new `PENDING` entry.
    /// The original, including its `sentAt`, is left untouched.
    pub async fn requeue(&self, id: Uuid, actor: &str) -> DispatchResult<QueueEntry> {
        let original = self.get(id).await?;
        let snapshot = serde_json::to_value(&original)?;

        let mut entry = QueueEntry::from_new(
            NewQueueEntry {
                event_type: original.event_type.clone(),
                signal_id: original.signal_id,
                template_id: original.template_id.clone(),
                payload: original.payload.clone(),
                recipient_ids: original.recipient_ids.clone(),
                cc_ids: original.cc_ids.clone(),
                bcc_ids: original.bcc_ids.clone(),
                channels: original.channels.clone(),
                scheduled_at: None,
                owner: original.owner.clone(),
            },
            Utc::now(),
        );
        entry.requeued_from = Some(original.id);

        let entry = self.insert(entry).await?;

        let record = AuditRecord::new(original.id, AuditAction::Requeued, actor)
            .with_snapshot(snapshot)
            .with_detail(format!("requeued as {}", entry.id));
        self.store.insert_audit(&record).await?;

        self.observers.publish(
            QueueEvent::new(QueueEventKind::Requeued)
                .for_entry(original.id)
                .for_signal(original.signal_id),
        );

        info!(original_id = %original.id, entry_id = %entry.id, actor, "Queue entry requeued");
        Ok(entry)
    }

    /// Deletes an entry after recording its full state in the audit log. If
    /// the audit write fails the entry is kept.
    pub async fn delete(&self, id: Uuid, actor: &str) -> DispatchResult<AuditRecord> {
        let entry = self.get(id).await?;

        let record = AuditRecord::new(entry.id, AuditAction::Deleted, actor)
            .with_detail(format!("deleted while {}", entry.status))
            .with_snapshot(serde_json::to_value(&entry)?);
        self.store.insert_audit(&record).await?;

        if !self.store.delete_entry(id).await? {
            return Err(DispatchError::EntryNotFound(id));
        }

        self.observers.publish(
            QueueEvent::new(QueueEventKind::Deleted)
                .for_entry(id)
                .for_signal(entry.signal_id),
        );

        info!(entry_id = %id, actor, "Queue entry deleted");
        Ok(record)
    }

    /// Deletes each id independently; ids that no longer exist are unchanged.
    pub async fn bulk_delete(&self, ids: &[Uuid], actor: &str) -> BulkResult {
        let mut result = BulkResult::default();

        for &id in ids {
            match self.delete(id, actor).await {
                Ok(_) => result.succeeded.push(id),
                Err(DispatchError::EntryNotFound(_)) => result.unchanged.push(id),
                Err(e) => result.failed.push(BulkFailure {
                    id,
                    reason: e.to_string(),
                }),
            }
        }

        result
    }

    pub async fn audit_trail(&self, id: Uuid) -> DispatchResult<Vec<AuditRecord>> {
        self.store.audit_for_entry(id).await
    }
}
