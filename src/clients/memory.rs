use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::{
        audit::AuditRecord,
        hook::NotificationHook,
        queue::{QueueEntry, QueueFilter},
        signal::Signal,
        template::NotificationTemplate,
    },
};

#[derive(Default)]
struct Tables {
    signals: HashMap<Uuid, Signal>,
    hooks: Vec<NotificationHook>,
    templates: HashMap<String, NotificationTemplate>,
    entries: HashMap<Uuid, QueueEntry>,
    audit: Vec<AuditRecord>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert_signal(&self, signal: &Signal) -> DispatchResult<()> {
        let mut tables = self.tables.write().await;
        if tables.signals.contains_key(&signal.id) {
            return Err(DispatchError::storage(format!(
                "signal {} already exists",
                signal.id
            )));
        }
        tables.signals.insert(signal.id, signal.clone());
        Ok(())
    }

    async fn get_signal(&self, id: Uuid) -> DispatchResult<Option<Signal>> {
        Ok(self.tables.read().await.signals.get(&id).cloned())
    }

    async fn mark_signal_processed(&self, id: Uuid) -> DispatchResult<()> {
        let mut tables = self.tables.write().await;
        match tables.signals.get_mut(&id) {
            Some(signal) => {
                signal.processed = true;
                Ok(())
            }
            None => Err(DispatchError::SignalNotFound(id)),
        }
    }

    async fn insert_hook(&self, hook: &NotificationHook) -> DispatchResult<()> {
        self.tables.write().await.hooks.push(hook.clone());
        Ok(())
    }

    async fn hooks_for_signal_type(
        &self,
        signal_type: &str,
    ) -> DispatchResult<Vec<NotificationHook>> {
        Ok(self
            .tables
            .read()
            .await
            .hooks
            .iter()
            .filter(|hook| hook.signal_type == signal_type)
            .cloned()
            .collect())
    }

    async fn list_hooks(&self) -> DispatchResult<Vec<NotificationHook>> {
        Ok(self.tables.read().await.hooks.clone())
    }

    async fn insert_template(&self, template: &NotificationTemplate) -> DispatchResult<()> {
        let mut tables = self.tables.write().await;
        if tables.templates.contains_key(&template.id) {
            return Err(DispatchError::Validation(format!(
                "template '{}' already exists",
                template.id
            )));
        }
        tables
            .templates
            .insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn update_template(&self, template: &NotificationTemplate) -> DispatchResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.templates.get_mut(&template.id) {
            Some(existing) => {
                *existing = template.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_template(&self, id: &str) -> DispatchResult<Option<NotificationTemplate>> {
        Ok(self.tables.read().await.templates.get(id).cloned())
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> DispatchResult<()> {
        self.tables
            .write()
            .await
            .entries
            .insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> DispatchResult<Option<QueueEntry>> {
        Ok(self.tables.read().await.entries.get(&id).cloned())
    }

    async fn update_entry(
        &self,
        entry: &QueueEntry,
        expected_version: u64,
    ) -> DispatchResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.entries.get_mut(&entry.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = entry.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DispatchError::EntryNotFound(entry.id)),
        }
    }

    async fn list_entries(&self, filter: &QueueFilter) -> DispatchResult<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .tables
            .read()
            .await
            .entries
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn delete_entry(&self, id: Uuid) -> DispatchResult<bool> {
        Ok(self.tables.write().await.entries.remove(&id).is_some())
    }

    async fn insert_audit(&self, record: &AuditRecord) -> DispatchResult<()> {
        self.tables.write().await.audit.push(record.clone());
        Ok(())
    }

    async fn audit_for_entry(&self, entry_id: Uuid) -> DispatchResult<Vec<AuditRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .audit
            .iter()
            .filter(|record| record.entry_id == entry_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> DispatchResult<()> {
        Ok(())
    }
}
