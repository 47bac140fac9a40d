use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::DispatchResult,
    models::{
        audit::AuditRecord,
        hook::NotificationHook,
        queue::{QueueEntry, QueueFilter},
        signal::Signal,
        template::NotificationTemplate,
    },
};

/// Persistence for every collection the pipeline touches.
///
/// Implementations must make `update_entry` a compare-and-set on
/// `QueueEntry::version`: the write only lands when the stored version equals
/// `expected_version`, and the stored version becomes `entry.version`.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_signal(&self, signal: &Signal) -> DispatchResult<()>;
    async fn get_signal(&self, id: Uuid) -> DispatchResult<Option<Signal>>;
    async fn mark_signal_processed(&self, id: Uuid) -> DispatchResult<()>;

    async fn insert_hook(&self, hook: &NotificationHook) -> DispatchResult<()>;
    /// Hooks for `signal_type` in registration order.
    async fn hooks_for_signal_type(&self, signal_type: &str)
    -> DispatchResult<Vec<NotificationHook>>;
    async fn list_hooks(&self) -> DispatchResult<Vec<NotificationHook>>;

    async fn insert_template(&self, template: &NotificationTemplate) -> DispatchResult<()>;
    /// Returns `false` when no template with that id exists.
    async fn update_template(&self, template: &NotificationTemplate) -> DispatchResult<bool>;
    async fn get_template(&self, id: &str) -> DispatchResult<Option<NotificationTemplate>>;

    async fn insert_entry(&self, entry: &QueueEntry) -> DispatchResult<()>;
    async fn get_entry(&self, id: Uuid) -> DispatchResult<Option<QueueEntry>>;
    /// Returns `false` when the stored version no longer matches.
    async fn update_entry(&self, entry: &QueueEntry, expected_version: u64)
    -> DispatchResult<bool>;
    async fn list_entries(&self, filter: &QueueFilter) -> DispatchResult<Vec<QueueEntry>>;
    async fn delete_entry(&self, id: Uuid) -> DispatchResult<bool>;

    async fn insert_audit(&self, record: &AuditRecord) -> DispatchResult<()>;
    async fn audit_for_entry(&self, entry_id: Uuid) -> DispatchResult<Vec<AuditRecord>>;

    async fn health_check(&self) -> DispatchResult<()>;
}
