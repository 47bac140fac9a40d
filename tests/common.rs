use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use dispatch_service::{
    clients::{
        contacts::StaticContactDirectory,
        memory::InMemoryStore,
        redis::LocalIdempotencyGuard,
        store::NotificationStore,
        transport::{OutboundMessage, Transport, TransportFailure},
    },
    error::{DispatchError, DispatchResult},
    models::{
        audit::AuditRecord,
        channel::Channel,
        contact::Contact,
        hook::{NewHook, NotificationHook, RecipientResolver},
        payload::Payload,
        queue::{QueueEntry, QueueFilter},
        retry::RetryConfig,
        signal::{NewSignal, Signal},
        template::{NotificationTemplate, TemplateInput},
    },
    pipeline::{NotificationPipeline, PipelineBuilder, scheduler::SchedulerConfig},
};
use serde_json::json;
use uuid::Uuid;

/// Transport double that records every message and answers with a fixed
/// result.
pub struct RecordingTransport {
    calls: Mutex<Vec<OutboundMessage>>,
    failure: Option<TransportFailure>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
        })
    }

    pub fn failing(failure: TransportFailure) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(failure),
            delay: None,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failure: None,
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> Vec<OutboundMessage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportFailure> {
        self.calls.lock().unwrap().push(message.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory store whose entry inserts start failing after a number of
/// successful ones.
pub struct FlakyStore {
    inner: InMemoryStore,
    entry_inserts_left: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_entry_inserts_after(successes: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            entry_inserts_left: AtomicUsize::new(successes),
        })
    }

    /// Lets every following entry insert through.
    pub fn recover(&self) {
        self.entry_inserts_left.store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationStore for FlakyStore {
    async fn insert_signal(&self, signal: &Signal) -> DispatchResult<()> {
        self.inner.insert_signal(signal).await
    }

    async fn get_signal(&self, id: Uuid) -> DispatchResult<Option<Signal>> {
        self.inner.get_signal(id).await
    }

    async fn mark_signal_processed(&self, id: Uuid) -> DispatchResult<()> {
        self.inner.mark_signal_processed(id).await
    }

    async fn insert_hook(&self, hook: &NotificationHook) -> DispatchResult<()> {
        self.inner.insert_hook(hook).await
    }

    async fn hooks_for_signal_type(
        &self,
        signal_type: &str,
    ) -> DispatchResult<Vec<NotificationHook>> {
        self.inner.hooks_for_signal_type(signal_type).await
    }

    async fn list_hooks(&self) -> DispatchResult<Vec<NotificationHook>> {
        self.inner.list_hooks().await
    }

    async fn insert_template(&self, template: &NotificationTemplate) -> DispatchResult<()> {
        self.inner.insert_template(template).await
    }

    async fn update_template(&self, template: &NotificationTemplate) -> DispatchResult<bool> {
        self.inner.update_template(template).await
    }

    async fn get_template(&self, id: &str) -> DispatchResult<Option<NotificationTemplate>> {
        self.inner.get_template(id).await
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> DispatchResult<()> {
        let claimed = self
            .entry_inserts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if claimed.is_err() {
            return Err(DispatchError::storage("connection reset"));
        }
        self.inner.insert_entry(entry).await
    }

    async fn get_entry(&self, id: Uuid) -> DispatchResult<Option<QueueEntry>> {
        self.inner.get_entry(id).await
    }

    async fn update_entry(
        &self,
        entry: &QueueEntry,
        expected_version: u64,
    ) -> DispatchResult<bool> {
        self.inner.update_entry(entry, expected_version).await
    }

    async fn list_entries(&self, filter: &QueueFilter) -> DispatchResult<Vec<QueueEntry>> {
        self.inner.list_entries(filter).await
    }

    async fn delete_entry(&self, id: Uuid) -> DispatchResult<bool> {
        self.inner.delete_entry(id).await
    }

    async fn insert_audit(&self, record: &AuditRecord) -> DispatchResult<()> {
        self.inner.insert_audit(record).await
    }

    async fn audit_for_entry(&self, entry_id: Uuid) -> DispatchResult<Vec<AuditRecord>> {
        self.inner.audit_for_entry(entry_id).await
    }

    async fn health_check(&self) -> DispatchResult<()> {
        self.inner.health_check().await
    }
}

/// Pipeline over `store` with the standard contacts and recording transports.
pub fn pipeline_over(
    store: Arc<dyn NotificationStore>,
) -> (NotificationPipeline, Arc<RecordingTransport>, Arc<RecordingTransport>) {
    let email = RecordingTransport::ok();
    let sms = RecordingTransport::ok();

    let pipeline = PipelineBuilder::new(store, Arc::new(contacts()))
        .idempotency(Arc::new(LocalIdempotencyGuard::new(Duration::from_secs(60))))
        .transport(Channel::Email, email.clone())
        .transport(Channel::Sms, sms.clone())
        .build();

    (pipeline, email, sms)
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub pipeline: NotificationPipeline,
    pub email: Arc<RecordingTransport>,
    pub sms: Arc<RecordingTransport>,
}

pub fn contacts() -> StaticContactDirectory {
    StaticContactDirectory::new()
        .with_contact(
            "c-1",
            Contact::default()
                .with_name("Jane")
                .with_email("jane@example.com")
                .with_phone("+15550001"),
        )
        .with_contact(
            "c-2",
            Contact::default().with_name("Bob").with_phone("+15550002"),
        )
        .with_contact(
            "c-3",
            Contact {
                send_email: false,
                ..Contact::default()
                    .with_name("Ann")
                    .with_email("ann@example.com")
                    .with_phone("+15550003")
            },
        )
        .with_contact(
            "c-4",
            Contact {
                active: false,
                ..Contact::default().with_name("Former").with_email("former@example.com")
            },
        )
        .with_contact(
            "office",
            Contact::default().with_name("Office").with_email("office@example.com"),
        )
        .with_contact(
            "audit",
            Contact::default().with_name("Audit").with_email("audit@example.com"),
        )
}

pub fn harness_with(email: Arc<RecordingTransport>) -> Harness {
    harness_with_timeout(email, Duration::from_secs(5))
}

pub fn harness_with_timeout(email: Arc<RecordingTransport>, timeout: Duration) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let sms = RecordingTransport::ok();

    let pipeline = PipelineBuilder::new(store.clone(), Arc::new(contacts()))
        .idempotency(Arc::new(LocalIdempotencyGuard::new(Duration::from_secs(60))))
        .transport(Channel::Email, email.clone())
        .transport(Channel::Sms, sms.clone())
        .transport_timeout(timeout)
        .build();

    Harness {
        store,
        pipeline,
        email,
        sms,
    }
}

pub fn harness() -> Harness {
    harness_with(RecordingTransport::ok())
}

pub fn email_template(id: &str) -> TemplateInput {
    TemplateInput {
        id: id.into(),
        name: "Estimate requested".into(),
        channel: Channel::Email,
        email_subject: Some("Estimate for {{customer.name}}".into()),
        email_body_html: Some("<p>Hello {{customer.name}}, we received your request.</p>".into()),
        sms_body: Some("Hello {{customer.name}}".into()),
        is_active: true,
        variables: BTreeSet::from(["customer.name".to_string()]),
    }
}

pub async fn seed_template(harness: &Harness, id: &str) -> Result<NotificationTemplate> {
    Ok(harness.pipeline.templates.create_template(email_template(id)).await?)
}

pub async fn seed_hook(
    harness: &Harness,
    signal_type: &str,
    channel: Channel,
    template_id: &str,
    recipients: &[&str],
) -> Result<NotificationHook> {
    let hook = NewHook {
        signal_type: signal_type.into(),
        channel,
        template_id: template_id.into(),
        recipient_resolver: RecipientResolver::Fixed(
            recipients.iter().map(|r| r.to_string()).collect(),
        ),
        cc_ids: vec![],
        bcc_ids: vec![],
    };
    Ok(harness.pipeline.matcher.register(hook).await?)
}

/// Template `T1` plus one email hook for `estimate_request` to contact `c-1`.
pub async fn seed_estimate_flow(harness: &Harness) -> Result<()> {
    seed_template(harness, "T1").await?;
    seed_hook(harness, "estimate_request", Channel::Email, "T1", &["c-1"]).await?;
    Ok(())
}

pub fn estimate_signal() -> NewSignal {
    NewSignal::new(
        "estimate_request",
        Payload::from(json!({ "customer": { "name": "Jane" } })),
        "web-form",
    )
}

pub fn fast_scheduler(max_attempts: u32) -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_millis(50),
        retry: RetryConfig {
            max_attempts,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2,
        },
        expire_after: chrono::Duration::hours(24),
        in_flight_timeout: chrono::Duration::minutes(5),
        worker_concurrency: 2,
    }
}
