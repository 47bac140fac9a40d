use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Deleted,
    Requeued,
    BulkUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Deleted => "deleted",
            AuditAction::Requeued => "requeued",
            AuditAction::BulkUpdated => "bulk_updated",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deleted" => Ok(AuditAction::Deleted),
            "requeued" => Ok(AuditAction::Requeued),
            "bulk_updated" => Ok(AuditAction::BulkUpdated),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

/// Operator action against a queue entry. `snapshot` holds the full entry as
/// it was immediately before the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub detail: Option<String>,
    pub snapshot: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(entry_id: Uuid, action: AuditAction, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            action,
            actor: actor.into(),
            detail: None,
            snapshot: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: JsonValue) -> Self {
        self.snapshot = snapshot;
        self
    }
}
