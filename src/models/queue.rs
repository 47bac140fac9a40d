use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    channel::Channel,
    payload::Payload,
    status::{FailureKind, QueueStatus},
};

/// A unit of notification work.
///
/// Fields are only mutated through the queue manager, which enforces the
/// status transition table and bumps `version` on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub event_type: String,
    pub signal_id: Option<Uuid>,
    pub template_id: String,
    pub payload: Payload,
    pub recipient_ids: Vec<String>,
    /// Copy recipients, used on email only.
    #[serde(default)]
    pub cc_ids: Vec<String>,
    #[serde(default)]
    pub bcc_ids: Vec<String>,
    pub channels: BTreeSet<Channel>,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub owner: String,
    /// Set on entries created by a requeue.
    pub requeued_from: Option<Uuid>,
    pub version: u64,
}

/// Input for a queue entry, either built from a hook + signal or supplied
/// directly by an operator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueEntry {
    pub event_type: String,
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    pub template_id: String,
    #[serde(default)]
    pub payload: Payload,
    pub recipient_ids: Vec<String>,
    #[serde(default)]
    pub cc_ids: Vec<String>,
    #[serde(default)]
    pub bcc_ids: Vec<String>,
    pub channels: BTreeSet<Channel>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_owner() -> String {
    "system".to_string()
}

impl QueueEntry {
    pub fn from_new(new: NewQueueEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: new.event_type,
            signal_id: new.signal_id,
            template_id: new.template_id,
            payload: new.payload,
            recipient_ids: new.recipient_ids,
            cc_ids: new.cc_ids,
            bcc_ids: new.bcc_ids,
            channels: new.channels,
            status: QueueStatus::Pending,
            retry_count: 0,
            error_message: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
            scheduled_at: new.scheduled_at,
            sent_at: None,
            owner: new.owner,
            requeued_from: None,
            version: 0,
        }
    }

    /// True once the entry is due for dispatch.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    fn search_haystack(&self) -> String {
        let mut haystack = vec![
            self.id.to_string(),
            self.event_type.clone(),
            self.template_id.clone(),
            self.owner.clone(),
            self.status.to_string(),
        ];
        haystack.extend(self.recipient_ids.iter().cloned());
        haystack.extend(self.channels.iter().map(|c| c.to_string()));
        if let Some(error) = &self.error_message {
            haystack.push(error.clone());
        }
        if let Some(signal_id) = self.signal_id {
            haystack.push(signal_id.to_string());
        }
        haystack.push(self.payload.to_json().to_string());

        haystack.join("\n").to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub channel: Option<Channel>,
    pub event_type: Option<String>,
    pub signal_id: Option<Uuid>,
    /// Applied to `createdAt`.
    pub date_range: Option<DateRange>,
    pub search_text: Option<String>,
}

impl QueueFilter {
    pub fn with_status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn for_signal(signal_id: Uuid) -> Self {
        Self {
            signal_id: Some(signal_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &QueueEntry) -> bool {
        if self.status.is_some_and(|s| s != entry.status) {
            return false;
        }
        if self
            .channel
            .as_ref()
            .is_some_and(|c| !entry.channels.contains(c))
        {
            return false;
        }
        if self
            .event_type
            .as_ref()
            .is_some_and(|t| t != &entry.event_type)
        {
            return false;
        }
        if self.signal_id.is_some() && self.signal_id != entry.signal_id {
            return false;
        }
        if self
            .date_range
            .is_some_and(|range| !range.contains(entry.created_at))
        {
            return false;
        }
        match self.search_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                entry.search_haystack().contains(&text.to_lowercase())
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    ScheduledAt,
    SentAt,
    Status,
    EventType,
    RetryCount,
    TemplateId,
    Owner,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Stable sort by any entry field, ties broken by id.
pub fn sort_entries(entries: &mut [QueueEntry], field: SortField, order: SortOrder) {
    entries.sort_by(|a, b| {
        let ordering = match field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::ScheduledAt => a.scheduled_at.cmp(&b.scheduled_at),
            SortField::SentAt => a.sent_at.cmp(&b.sent_at),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::EventType => a.event_type.cmp(&b.event_type),
            SortField::RetryCount => a.retry_count.cmp(&b.retry_count),
            SortField::TemplateId => a.template_id.cmp(&b.template_id),
            SortField::Owner => a.owner.cmp(&b.owner),
        }
        .then_with(|| a.id.cmp(&b.id));

        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub id: Uuid,
    pub reason: String,
}

/// Per-id result of a bulk status change. Entries already in the requested
/// status land in `unchanged`, so re-issuing a bulk action is harmless.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub succeeded: Vec<Uuid>,
    pub unchanged: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

impl BulkResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.unchanged.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn entry(event_type: &str, minutes_ago: i64) -> QueueEntry {
        let now = Utc::now() - Duration::minutes(minutes_ago);
        QueueEntry::from_new(
            NewQueueEntry {
                event_type: event_type.to_string(),
                signal_id: None,
                template_id: "T1".to_string(),
                payload: Payload::from("Jane Doe"),
                recipient_ids: vec!["contact-7".to_string()],
                cc_ids: Vec::new(),
                bcc_ids: Vec::new(),
                channels: BTreeSet::from([Channel::Email]),
                scheduled_at: None,
                owner: "ops".to_string(),
            },
            now,
        )
    }

    #[test]
    fn filter_combines_all_criteria() {
        let e = entry("estimate_request", 10);

        assert!(QueueFilter::default().matches(&e));
        assert!(QueueFilter::with_status(QueueStatus::Pending).matches(&e));
        assert!(!QueueFilter::with_status(QueueStatus::Sent).matches(&e));

        let by_channel = QueueFilter {
            channel: Some(Channel::Sms),
            ..Default::default()
        };
        assert!(!by_channel.matches(&e));

        let by_text = QueueFilter {
            search_text: Some("jane".into()),
            ..Default::default()
        };
        assert!(by_text.matches(&e));

        let by_range = QueueFilter {
            date_range: Some(DateRange {
                from: Some(Utc::now() - Duration::minutes(5)),
                to: None,
            }),
            ..Default::default()
        };
        assert!(!by_range.matches(&e));
    }

    #[test]
    fn sorts_by_requested_field() {
        let mut entries = vec![entry("b", 1), entry("a", 30), entry("c", 10)];

        sort_entries(&mut entries, SortField::CreatedAt, SortOrder::Asc);
        let types: Vec<_> = entries.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["a", "c", "b"]);

        sort_entries(&mut entries, SortField::EventType, SortOrder::Desc);
        let types: Vec<_> = entries.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["c", "b", "a"]);
    }
}
