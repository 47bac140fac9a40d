pub mod dispatcher;
pub mod matcher;
pub mod observer;
pub mod queue;
pub mod renderer;
pub mod scheduler;
pub mod signals;
pub mod templates;
pub mod trace;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        contacts::ContactDirectory, redis::IdempotencyGuard, store::NotificationStore,
        transport::Transport,
    },
    error::DispatchResult,
    models::{
        channel::Channel,
        event::{QueueEvent, QueueEventKind},
        queue::QueueEntry,
        signal::{NewSignal, Signal},
    },
    pipeline::{
        dispatcher::ChannelDispatcher,
        matcher::HookMatcher,
        observer::Observers,
        queue::QueueManager,
        renderer::TemplateRenderer,
        scheduler::{RetryScheduler, SchedulerConfig},
        signals::{SignalIngestion, SignalOutcome},
        templates::TemplateService,
        trace::TraceReader,
    },
};

/// What happened to one emitted signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub signal_id: Option<Uuid>,
    pub duplicate: bool,
    pub matched_hooks: usize,
    /// Hooks registered for the signal type but left out because their
    /// template is inactive or missing.
    pub skipped_hooks: usize,
    /// Entries as they stand after the first delivery attempt.
    pub entries: Vec<QueueEntry>,
}

/// Every pipeline component, wired against one store.
#[derive(Clone)]
pub struct NotificationPipeline {
    pub ingestion: SignalIngestion,
    pub matcher: HookMatcher,
    pub templates: TemplateService,
    pub queue: QueueManager,
    pub dispatcher: Arc<ChannelDispatcher>,
    pub trace: TraceReader,
    observers: Observers,
}

pub struct PipelineBuilder {
    store: Arc<dyn NotificationStore>,
    contacts: Arc<dyn ContactDirectory>,
    idempotency: Option<Arc<dyn IdempotencyGuard>>,
    observers: Observers,
    transports: Vec<(Channel, Arc<dyn Transport>)>,
    transport_timeout: Duration,
}

impl PipelineBuilder {
    pub fn new(store: Arc<dyn NotificationStore>, contacts: Arc<dyn ContactDirectory>) -> Self {
        Self {
            store,
            contacts,
            idempotency: None,
            observers: Observers::new(),
            transports: Vec::new(),
            transport_timeout: Duration::from_secs(10),
        }
    }

    pub fn idempotency(mut self, guard: Arc<dyn IdempotencyGuard>) -> Self {
        self.idempotency = Some(guard);
        self
    }

    pub fn observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn transport(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
        self.transports.push((channel, transport));
        self
    }

    pub fn transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    pub fn build(self) -> NotificationPipeline {
        let queue = QueueManager::new(self.store.clone(), self.observers.clone());

        let dispatcher = self.transports.into_iter().fold(
            ChannelDispatcher::new(
                TemplateRenderer::new(self.store.clone()),
                self.contacts,
                queue.clone(),
                self.transport_timeout,
            ),
            |dispatcher, (channel, transport)| dispatcher.with_transport(channel, transport),
        );

        NotificationPipeline {
            ingestion: SignalIngestion::new(self.store.clone(), self.idempotency),
            matcher: HookMatcher::new(self.store.clone()),
            templates: TemplateService::new(self.store.clone()),
            queue,
            dispatcher: Arc::new(dispatcher),
            trace: TraceReader::new(self.store),
            observers: self.observers,
        }
    }
}

impl NotificationPipeline {
    pub fn scheduler(&self, config: SchedulerConfig) -> RetryScheduler {
        RetryScheduler::new(self.queue.clone(), self.dispatcher.clone(), config)
    }

    /// Emits a signal, enqueues one entry per matching hook and makes the
    /// first delivery attempt for each. Delivery failures end up on the
    /// entries; only ingestion, matching and storage errors are returned.
    /// On any error after the signal is stored its idempotency key is
    /// released, so a redelivery reaches every hook again.
    pub async fn process_signal(&self, new: NewSignal) -> DispatchResult<DispatchSummary> {
        let idempotency_key = new.idempotency_key.clone();

        let signal = match self.ingestion.emit(new).await? {
            SignalOutcome::Emitted(signal) => signal,
            SignalOutcome::Duplicate { .. } => {
                return Ok(DispatchSummary {
                    signal_id: None,
                    duplicate: true,
                    matched_hooks: 0,
                    skipped_hooks: 0,
                    entries: Vec::new(),
                });
            }
        };

        match self.fan_out(&signal, idempotency_key.as_deref()).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(signal_id = %signal.id, error = %e, "Signal processing aborted");
                self.ingestion.release(idempotency_key.as_deref()).await;
                Err(e)
            }
        }
    }

    async fn fan_out(
        &self,
        signal: &Signal,
        idempotency_key: Option<&str>,
    ) -> DispatchResult<DispatchSummary> {
        let selection = self.matcher.match_hooks(&signal.signal_type).await?;
        if selection.selected.is_empty() {
            info!(signal_id = %signal.id, signal_type = %signal.signal_type, "No hooks matched");
        }

        let mut queued = Vec::with_capacity(selection.selected.len());
        for hook in &selection.selected {
            queued.push(self.queue.enqueue(hook, signal).await?);
        }

        let now = Utc::now();
        let mut entries = Vec::with_capacity(queued.len());
        for entry in queued {
            if !entry.is_due(now) {
                entries.push(entry);
                continue;
            }
            let id = entry.id;
            match self.dispatcher.dispatch_entry(entry).await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // Left for the scheduler.
                    warn!(entry_id = %id, error = %e, "First delivery attempt not recorded");
                    if let Ok(entry) = self.queue.get(id).await {
                        entries.push(entry);
                    }
                }
            }
        }

        self.ingestion.mark_processed(signal, idempotency_key).await?;

        self.observers
            .publish(QueueEvent::new(QueueEventKind::SignalProcessed).for_signal(Some(signal.id)));

        info!(
            signal_id = %signal.id,
            matched_hooks = selection.selected.len(),
            skipped_hooks = selection.skipped.len(),
            entries = entries.len(),
            "Signal processed"
        );

        Ok(DispatchSummary {
            signal_id: Some(signal.id),
            duplicate: false,
            matched_hooks: selection.selected.len(),
            skipped_hooks: selection.skipped.len(),
            entries,
        })
    }
}
