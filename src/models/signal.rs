use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::payload::Payload;

/// Immutable record of a business event. Only `processed` changes after
/// creation, and signals are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: Uuid,
    pub signal_type: String,
    pub payload: Payload,
    pub emitted_at: DateTime<Utc>,
    pub emitted_by: String,
    pub source: String,
    pub processed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSignal {
    pub signal_type: String,
    #[serde(default)]
    pub payload: Payload,
    pub source: String,
    #[serde(default = "default_emitter")]
    pub emitted_by: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_emitter() -> String {
    "system".to_string()
}

impl NewSignal {
    pub fn new(
        signal_type: impl Into<String>,
        payload: Payload,
        source: impl Into<String>,
    ) -> Self {
        Self {
            signal_type: signal_type.into(),
            payload,
            source: source.into(),
            emitted_by: default_emitter(),
            idempotency_key: None,
        }
    }

    pub fn emitted_by(mut self, emitter: impl Into<String>) -> Self {
        self.emitted_by = emitter.into();
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
