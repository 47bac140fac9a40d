use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{channel::Channel, payload::Payload};

/// Static rule: a signal of `signal_type` renders `template_id` for
/// `channel` and delivers it to whoever `recipient_resolver` yields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationHook {
    pub id: Uuid,
    pub signal_type: String,
    pub channel: Channel,
    pub template_id: String,
    pub recipient_resolver: RecipientResolver,
    /// Contact ids copied on email deliveries.
    #[serde(default)]
    pub cc_ids: Vec<String>,
    #[serde(default)]
    pub bcc_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHook {
    pub signal_type: String,
    pub channel: Channel,
    pub template_id: String,
    pub recipient_resolver: RecipientResolver,
    #[serde(default)]
    pub cc_ids: Vec<String>,
    #[serde(default)]
    pub bcc_ids: Vec<String>,
}

/// Hooks registered for one signal type, split by whether their template can
/// be used for new dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSelection {
    pub selected: Vec<NotificationHook>,
    pub skipped: Vec<SkippedHook>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedHook {
    pub hook: NotificationHook,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TemplateInactive,
    TemplateNotFound,
}

/// Where a hook's recipient ids come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecipientResolver {
    /// Always the same contacts, e.g. the office staff.
    Fixed(Vec<String>),
    /// A string or list of strings found at a dotted path in the signal payload.
    PayloadPath(String),
}

impl RecipientResolver {
    /// Produces recipient ids in a stable order, dropping blanks and duplicates.
    pub fn resolve(&self, payload: &Payload) -> Vec<String> {
        let raw: Vec<String> = match self {
            RecipientResolver::Fixed(ids) => ids.clone(),
            RecipientResolver::PayloadPath(path) => match payload.get_path(path) {
                Some(Payload::String(id)) => vec![id.clone()],
                Some(Payload::Number(n)) => vec![n.to_string()],
                Some(Payload::List(items)) => items
                    .iter()
                    .filter_map(|item| match item {
                        Payload::String(id) => Some(id.clone()),
                        Payload::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
        };

        normalize_ids(raw)
    }
}

/// Trims ids and drops blanks and repeats, keeping first-seen order.
pub fn normalize_ids(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw {
        let id = id.trim().to_string();
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
