use std::{collections::HashMap, sync::Arc};

use tracing::debug;
use uuid::Uuid;

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::{
        audit::AuditRecord,
        queue::{QueueEntry, QueueFilter, SortField, SortOrder, sort_entries},
        retry::RetryConfig,
        status::QueueStatus,
        template::NotificationTemplate,
        trace::{SignalTrace, TraceState, TracedEntry},
    },
    pipeline::{matcher::HookMatcher, scheduler::RetryScheduler},
};

/// Read-only views for the admin surface. Nothing here writes.
#[derive(Clone)]
pub struct TraceReader {
    store: Arc<dyn NotificationStore>,
    matcher: HookMatcher,
}

impl TraceReader {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            matcher: HookMatcher::new(store.clone()),
            store,
        }
    }

    pub async fn list_queue_entries(
        &self,
        filter: &QueueFilter,
        sort: SortField,
        order: SortOrder,
    ) -> DispatchResult<Vec<QueueEntry>> {
        let mut entries = self.store.list_entries(filter).await?;
        sort_entries(&mut entries, sort, order);
        Ok(entries)
    }

    /// Signal, matched hooks, resulting entries and their templates. A template
    /// that no longer exists shows up as `None` instead of failing the trace.
    pub async fn trace_signal(&self, signal_id: Uuid) -> DispatchResult<SignalTrace> {
        let signal = self
            .store
            .get_signal(signal_id)
            .await?
            .ok_or(DispatchError::SignalNotFound(signal_id))?;

        let selection = self.matcher.match_hooks(&signal.signal_type).await?;

        let mut entries = self.store.list_entries(&QueueFilter::for_signal(signal_id)).await?;
        sort_entries(&mut entries, SortField::CreatedAt, SortOrder::Asc);

        let mut templates: HashMap<String, Option<NotificationTemplate>> = HashMap::new();
        let mut queue_entries = Vec::with_capacity(entries.len());
        for entry in entries {
            if !templates.contains_key(&entry.template_id) {
                let template = self.store.get_template(&entry.template_id).await?;
                if template.is_none() {
                    debug!(
                        template_id = %entry.template_id,
                        "Traced entry references a missing template"
                    );
                }
                templates.insert(entry.template_id.clone(), template);
            }
            let template = templates.get(&entry.template_id).cloned().flatten();
            queue_entries.push(TracedEntry { entry, template });
        }

        let state = trace_state(selection.selected.is_empty(), &queue_entries);
        let template = queue_entries.first().and_then(|t| t.template.clone());

        Ok(SignalTrace {
            signal,
            matched_hooks: selection.selected,
            skipped_hooks: selection.skipped,
            queue_entries,
            template,
            state,
        })
    }

    /// `FAILED` entries the scheduler has given up on, oldest first.
    pub async fn needs_attention(&self, retry: &RetryConfig) -> DispatchResult<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .store
            .list_entries(&QueueFilter::with_status(QueueStatus::Failed))
            .await?
            .into_iter()
            .filter(|entry| RetryScheduler::needs_attention(retry, entry))
            .collect();
        sort_entries(&mut entries, SortField::UpdatedAt, SortOrder::Asc);
        Ok(entries)
    }

    pub async fn audit_for_entry(&self, entry_id: Uuid) -> DispatchResult<Vec<AuditRecord>> {
        self.store.audit_for_entry(entry_id).await
    }
}

/// Collapses a signal's entries into one of the four operator-facing states.
/// Hooks that were skipped for an unusable template do not count as matched.
/// Any live entry means delivery is still pending; otherwise a failure wins
/// over a success.
fn trace_state(no_hooks: bool, entries: &[TracedEntry]) -> TraceState {
    if entries.is_empty() {
        return if no_hooks {
            TraceState::NoHooksMatched
        } else {
            TraceState::AwaitingDelivery
        };
    }

    let in_progress = entries.iter().any(|t| {
        matches!(t.entry.status, QueueStatus::Pending | QueueStatus::Retrying)
    });
    if in_progress {
        return TraceState::AwaitingDelivery;
    }

    let failed_retries = entries
        .iter()
        .filter(|t| t.entry.status == QueueStatus::Failed)
        .map(|t| t.entry.retry_count)
        .max();

    match failed_retries {
        Some(retries) => TraceState::FailedAfterRetries { retries },
        None => TraceState::Sent,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::payload::Payload;

    fn traced(status: QueueStatus, retry_count: u32) -> TracedEntry {
        let now = Utc::now();
        TracedEntry {
            entry: QueueEntry {
                id: Uuid::new_v4(),
                event_type: "estimate_request".into(),
                signal_id: None,
                template_id: "T1".into(),
                payload: Payload::Null,
                recipient_ids: vec![],
                cc_ids: vec![],
                bcc_ids: vec![],
                channels: Default::default(),
                status,
                retry_count,
                error_message: None,
                error_kind: None,
                created_at: now,
                updated_at: now,
                scheduled_at: None,
                sent_at: None,
                owner: "system".into(),
                requeued_from: None,
                version: 0,
            },
            template: None,
        }
    }

    #[test]
    fn four_states_are_distinguished() {
        assert_eq!(trace_state(true, &[]), TraceState::NoHooksMatched);
        assert_eq!(
            trace_state(false, &[traced(QueueStatus::Pending, 0)]),
            TraceState::AwaitingDelivery
        );
        assert_eq!(
            trace_state(false, &[traced(QueueStatus::Sent, 0)]),
            TraceState::Sent
        );
        assert_eq!(
            trace_state(
                false,
                &[traced(QueueStatus::Sent, 0), traced(QueueStatus::Failed, 3)]
            ),
            TraceState::FailedAfterRetries { retries: 3 }
        );
    }

    #[test]
    fn retrying_counts_as_awaiting_delivery() {
        assert_eq!(
            trace_state(
                false,
                &[traced(QueueStatus::Retrying, 1), traced(QueueStatus::Failed, 0)]
            ),
            TraceState::AwaitingDelivery
        );
    }
}
