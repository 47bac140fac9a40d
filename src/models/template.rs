use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::channel::Channel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub id: String,
    pub name: String,
    pub channel: Channel,
    pub email_subject: Option<String>,
    pub email_body_html: Option<String>,
    pub sms_body: Option<String>,
    pub is_active: bool,
    /// Payload paths the template is expected to substitute.
    #[serde(default)]
    pub variables: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator input for `createTemplate`/`updateTemplate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInput {
    pub id: String,
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub email_subject: Option<String>,
    #[serde(default)]
    pub email_body_html: Option<String>,
    #[serde(default)]
    pub sms_body: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub variables: BTreeSet<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedContent {
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    /// Plain-text alternative sent alongside an HTML email body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
}
