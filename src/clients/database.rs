use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_postgres::{Client, NoTls, Row, types::ToSql};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::{
        audit::AuditRecord,
        channel::Channel,
        hook::NotificationHook,
        payload::Payload,
        queue::{QueueEntry, QueueFilter},
        signal::Signal,
        template::NotificationTemplate,
    },
    utils::{decode_string_list, encode_string_list},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id UUID PRIMARY KEY,
    signal_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    emitted_at TIMESTAMPTZ NOT NULL,
    emitted_by TEXT NOT NULL,
    source TEXT NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS notification_hooks (
    seq BIGSERIAL,
    id UUID PRIMARY KEY,
    signal_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    template_id TEXT NOT NULL,
    recipient_resolver JSONB NOT NULL,
    cc_ids TEXT NOT NULL DEFAULT '[]',
    bcc_ids TEXT NOT NULL DEFAULT '[]',
    created_at TIMESTAMPTZ NOT NULL
);
ALTER TABLE notification_hooks ADD COLUMN IF NOT EXISTS cc_ids TEXT NOT NULL DEFAULT '[]';
ALTER TABLE notification_hooks ADD COLUMN IF NOT EXISTS bcc_ids TEXT NOT NULL DEFAULT '[]';
CREATE INDEX IF NOT EXISTS idx_notification_hooks_signal_type
    ON notification_hooks (signal_type, seq);

CREATE TABLE IF NOT EXISTS notification_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    channel TEXT NOT NULL,
    email_subject TEXT,
    email_body_html TEXT,
    sms_body TEXT,
    is_active BOOLEAN NOT NULL,
    variables TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_queue (
    id UUID PRIMARY KEY,
    event_type TEXT NOT NULL,
    signal_id UUID,
    template_id TEXT NOT NULL,
    payload JSONB NOT NULL,
    recipient_ids TEXT NOT NULL,
    cc_ids TEXT NOT NULL DEFAULT '[]',
    bcc_ids TEXT NOT NULL DEFAULT '[]',
    channels TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    error_kind TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    scheduled_at TIMESTAMPTZ,
    sent_at TIMESTAMPTZ,
    owner TEXT NOT NULL,
    requeued_from UUID,
    version BIGINT NOT NULL DEFAULT 0
);
ALTER TABLE notification_queue ADD COLUMN IF NOT EXISTS cc_ids TEXT NOT NULL DEFAULT '[]';
ALTER TABLE notification_queue ADD COLUMN IF NOT EXISTS bcc_ids TEXT NOT NULL DEFAULT '[]';
CREATE INDEX IF NOT EXISTS idx_notification_queue_status ON notification_queue (status);
CREATE INDEX IF NOT EXISTS idx_notification_queue_signal ON notification_queue (signal_id);

CREATE TABLE IF NOT EXISTS audit_logs (
    id UUID PRIMARY KEY,
    entry_id UUID NOT NULL,
    action TEXT NOT NULL,
    actor TEXT NOT NULL,
    detail TEXT,
    snapshot JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_entry ON audit_logs (entry_id);
"#;

const ENTRY_COLUMNS: &str = "id, event_type, signal_id, template_id, payload, recipient_ids, \
     cc_ids, bcc_ids, channels, status, retry_count, error_message, error_kind, created_at, \
     updated_at, scheduled_at, sent_at, owner, requeued_from, version";

const TEMPLATE_COLUMNS: &str = "id, name, channel, email_subject, email_body_html, sms_body, \
     is_active, variables, created_at, updated_at";

const HOOK_COLUMNS: &str =
    "id, signal_type, channel, template_id, recipient_resolver, cc_ids, bcc_ids, created_at";

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> DispatchResult<Self> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| DispatchError::storage(format!("Failed to connect to database: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn migrate(&self) -> DispatchResult<()> {
        self.client.batch_execute(SCHEMA).await?;
        info!("Database schema is up to date");
        Ok(())
    }

    fn signal_from_row(row: &Row) -> DispatchResult<Signal> {
        Ok(Signal {
            id: row.try_get("id")?,
            signal_type: row.try_get("signal_type")?,
            payload: Payload::from(row.try_get::<_, JsonValue>("payload")?),
            emitted_at: row.try_get("emitted_at")?,
            emitted_by: row.try_get("emitted_by")?,
            source: row.try_get("source")?,
            processed: row.try_get("processed")?,
        })
    }

    fn hook_from_row(row: &Row) -> DispatchResult<NotificationHook> {
        Ok(NotificationHook {
            id: row.try_get("id")?,
            signal_type: row.try_get("signal_type")?,
            channel: Channel::from(row.try_get::<_, String>("channel")?),
            template_id: row.try_get("template_id")?,
            recipient_resolver: serde_json::from_value(row.try_get("recipient_resolver")?)?,
            cc_ids: decode_string_list(&row.try_get::<_, String>("cc_ids")?),
            bcc_ids: decode_string_list(&row.try_get::<_, String>("bcc_ids")?),
            created_at: row.try_get("created_at")?,
        })
    }

    fn template_from_row(row: &Row) -> DispatchResult<NotificationTemplate> {
        Ok(NotificationTemplate {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            channel: Channel::from(row.try_get::<_, String>("channel")?),
            email_subject: row.try_get("email_subject")?,
            email_body_html: row.try_get("email_body_html")?,
            sms_body: row.try_get("sms_body")?,
            is_active: row.try_get("is_active")?,
            variables: decode_string_list(&row.try_get::<_, String>("variables")?)
                .into_iter()
                .collect(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn entry_from_row(row: &Row) -> DispatchResult<QueueEntry> {
        let status: String = row.try_get("status")?;
        let error_kind: Option<String> = row.try_get("error_kind")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        let version: i64 = row.try_get("version")?;

        Ok(QueueEntry {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            signal_id: row.try_get("signal_id")?,
            template_id: row.try_get("template_id")?,
            payload: Payload::from(row.try_get::<_, JsonValue>("payload")?),
            recipient_ids: decode_string_list(&row.try_get::<_, String>("recipient_ids")?),
            cc_ids: decode_string_list(&row.try_get::<_, String>("cc_ids")?),
            bcc_ids: decode_string_list(&row.try_get::<_, String>("bcc_ids")?),
            channels: decode_string_list(&row.try_get::<_, String>("channels")?)
                .into_iter()
                .map(Channel::from)
                .collect(),
            status: status.parse().map_err(DispatchError::Storage)?,
            retry_count: u32::try_from(retry_count).unwrap_or_default(),
            error_message: row.try_get("error_message")?,
            error_kind: error_kind.and_then(|k| k.parse().ok()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            sent_at: row.try_get("sent_at")?,
            owner: row.try_get("owner")?,
            requeued_from: row.try_get("requeued_from")?,
            version: u64::try_from(version).unwrap_or_default(),
        })
    }

    fn audit_from_row(row: &Row) -> DispatchResult<AuditRecord> {
        let action: String = row.try_get("action")?;

        Ok(AuditRecord {
            id: row.try_get("id")?,
            entry_id: row.try_get("entry_id")?,
            action: action.parse().map_err(DispatchError::Storage)?,
            actor: row.try_get("actor")?,
            detail: row.try_get("detail")?,
            snapshot: row.try_get("snapshot")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_signal(&self, signal: &Signal) -> DispatchResult<()> {
        self.client
            .execute(
                "INSERT INTO signals
                     (id, signal_type, payload, emitted_at, emitted_by, source, processed)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &signal.id,
                    &signal.signal_type,
                    &signal.payload.to_json(),
                    &signal.emitted_at,
                    &signal.emitted_by,
                    &signal.source,
                    &signal.processed,
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, signal_id = %signal.id, "Failed to write signal");
                DispatchError::from(e)
            })?;

        debug!(signal_id = %signal.id, "Signal written to database");
        Ok(())
    }

    async fn get_signal(&self, id: Uuid) -> DispatchResult<Option<Signal>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, signal_type, payload, emitted_at, emitted_by, source, processed
                 FROM signals WHERE id = $1",
                &[&id],
            )
            .await?;

        row.as_ref().map(Self::signal_from_row).transpose()
    }

    async fn mark_signal_processed(&self, id: Uuid) -> DispatchResult<()> {
        let updated = self
            .client
            .execute("UPDATE signals SET processed = TRUE WHERE id = $1", &[&id])
            .await?;

        if updated == 0 {
            return Err(DispatchError::SignalNotFound(id));
        }
        Ok(())
    }

    async fn insert_hook(&self, hook: &NotificationHook) -> DispatchResult<()> {
        let resolver = serde_json::to_value(&hook.recipient_resolver)?;

        let sql = format!(
            "INSERT INTO notification_hooks ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            HOOK_COLUMNS
        );

        self.client
            .execute(
                sql.as_str(),
                &[
                    &hook.id,
                    &hook.signal_type,
                    &hook.channel.as_str(),
                    &hook.template_id,
                    &resolver,
                    &encode_string_list(&hook.cc_ids),
                    &encode_string_list(&hook.bcc_ids),
                    &hook.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn hooks_for_signal_type(
        &self,
        signal_type: &str,
    ) -> DispatchResult<Vec<NotificationHook>> {
        let sql = format!(
            "SELECT {} FROM notification_hooks WHERE signal_type = $1 ORDER BY seq",
            HOOK_COLUMNS
        );
        let rows = self.client.query(sql.as_str(), &[&signal_type]).await?;

        rows.iter().map(Self::hook_from_row).collect()
    }

    async fn list_hooks(&self) -> DispatchResult<Vec<NotificationHook>> {
        let sql = format!("SELECT {} FROM notification_hooks ORDER BY seq", HOOK_COLUMNS);
        let rows = self.client.query(sql.as_str(), &[]).await?;

        rows.iter().map(Self::hook_from_row).collect()
    }

    async fn insert_template(&self, template: &NotificationTemplate) -> DispatchResult<()> {
        let sql = format!(
            "INSERT INTO notification_templates ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            TEMPLATE_COLUMNS
        );

        self.client
            .execute(
                sql.as_str(),
                &[
                    &template.id,
                    &template.name,
                    &template.channel.as_str(),
                    &template.email_subject,
                    &template.email_body_html,
                    &template.sms_body,
                    &template.is_active,
                    &encode_string_list(&template.variables),
                    &template.created_at,
                    &template.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_template(&self, template: &NotificationTemplate) -> DispatchResult<bool> {
        let updated = self
            .client
            .execute(
                "UPDATE notification_templates
                 SET name = $2, channel = $3, email_subject = $4, email_body_html = $5,
                     sms_body = $6, is_active = $7, variables = $8, updated_at = $9
                 WHERE id = $1",
                &[
                    &template.id,
                    &template.name,
                    &template.channel.as_str(),
                    &template.email_subject,
                    &template.email_body_html,
                    &template.sms_body,
                    &template.is_active,
                    &encode_string_list(&template.variables),
                    &template.updated_at,
                ],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn get_template(&self, id: &str) -> DispatchResult<Option<NotificationTemplate>> {
        let sql = format!(
            "SELECT {} FROM notification_templates WHERE id = $1",
            TEMPLATE_COLUMNS
        );
        let row = self.client.query_opt(sql.as_str(), &[&id]).await?;

        row.as_ref().map(Self::template_from_row).transpose()
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> DispatchResult<()> {
        let sql = format!(
            "INSERT INTO notification_queue ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20)",
            ENTRY_COLUMNS
        );

        self.client
            .execute(
                sql.as_str(),
                &[
                    &entry.id,
                    &entry.event_type,
                    &entry.signal_id,
                    &entry.template_id,
                    &entry.payload.to_json(),
                    &encode_string_list(&entry.recipient_ids),
                    &encode_string_list(&entry.cc_ids),
                    &encode_string_list(&entry.bcc_ids),
                    &encode_string_list(entry.channels.iter().map(Channel::as_str)),
                    &entry.status.as_str(),
                    &(entry.retry_count as i32),
                    &entry.error_message,
                    &entry.error_kind.map(|k| k.as_str()),
                    &entry.created_at,
                    &entry.updated_at,
                    &entry.scheduled_at,
                    &entry.sent_at,
                    &entry.owner,
                    &entry.requeued_from,
                    &(entry.version as i64),
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, entry_id = %entry.id, "Failed to write queue entry");
                DispatchError::from(e)
            })?;
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> DispatchResult<Option<QueueEntry>> {
        let sql = format!("SELECT {} FROM notification_queue WHERE id = $1", ENTRY_COLUMNS);
        let row = self.client.query_opt(sql.as_str(), &[&id]).await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn update_entry(
        &self,
        entry: &QueueEntry,
        expected_version: u64,
    ) -> DispatchResult<bool> {
        let updated = self
            .client
            .execute(
                "UPDATE notification_queue
                 SET status = $2, retry_count = $3, error_message = $4, error_kind = $5,
                     updated_at = $6, scheduled_at = $7, sent_at = $8, version = $9
                 WHERE id = $1 AND version = $10",
                &[
                    &entry.id,
                    &entry.status.as_str(),
                    &(entry.retry_count as i32),
                    &entry.error_message,
                    &entry.error_kind.map(|k| k.as_str()),
                    &entry.updated_at,
                    &entry.scheduled_at,
                    &entry.sent_at,
                    &(entry.version as i64),
                    &(expected_version as i64),
                ],
            )
            .await?;

        if updated > 0 {
            return Ok(true);
        }

        let exists = self
            .client
            .query_opt("SELECT 1 FROM notification_queue WHERE id = $1", &[&entry.id])
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(DispatchError::EntryNotFound(entry.id)),
        }
    }

    async fn list_entries(&self, filter: &QueueFilter) -> DispatchResult<Vec<QueueEntry>> {
        let status = filter.status.map(|s| s.as_str().to_string());
        let from = filter.date_range.and_then(|r| r.from);
        let to = filter.date_range.and_then(|r| r.to);

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(status) = &status {
            params.push(status);
            clauses.push(format!("status = ${}", params.len()));
        }
        if let Some(event_type) = &filter.event_type {
            params.push(event_type);
            clauses.push(format!("event_type = ${}", params.len()));
        }
        if let Some(signal_id) = &filter.signal_id {
            params.push(signal_id);
            clauses.push(format!("signal_id = ${}", params.len()));
        }
        if let Some(from) = &from {
            params.push(from);
            clauses.push(format!("created_at >= ${}", params.len()));
        }
        if let Some(to) = &to {
            params.push(to);
            clauses.push(format!("created_at <= ${}", params.len()));
        }

        let mut sql = format!("SELECT {} FROM notification_queue", ENTRY_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, id");

        let rows = self.client.query(sql.as_str(), &params).await?;

        // Channel and free-text matching need the decoded list columns.
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::entry_from_row(row)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn delete_entry(&self, id: Uuid) -> DispatchResult<bool> {
        let deleted = self
            .client
            .execute("DELETE FROM notification_queue WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn insert_audit(&self, record: &AuditRecord) -> DispatchResult<()> {
        self.client
            .execute(
                "INSERT INTO audit_logs (id, entry_id, action, actor, detail, snapshot, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &record.id,
                    &record.entry_id,
                    &record.action.as_str(),
                    &record.actor,
                    &record.detail,
                    &record.snapshot,
                    &record.created_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    entry_id = %record.entry_id,
                    "Failed to write audit log to database"
                );
                DispatchError::from(e)
            })?;

        debug!(
            entry_id = %record.entry_id,
            action = %record.action,
            "Audit log written to database"
        );
        Ok(())
    }

    async fn audit_for_entry(&self, entry_id: Uuid) -> DispatchResult<Vec<AuditRecord>> {
        let rows = self
            .client
            .query(
                "SELECT id, entry_id, action, actor, detail, snapshot, created_at
                 FROM audit_logs WHERE entry_id = $1 ORDER BY created_at",
                &[&entry_id],
            )
            .await?;

        rows.iter().map(Self::audit_from_row).collect()
    }

    async fn health_check(&self) -> DispatchResult<()> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| DispatchError::storage(format!("Database health check failed: {}", e)))?;
        Ok(())
    }
}
