use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    clients::{
        contacts::ContactDirectory,
        transport::{OutboundMessage, Transport},
    },
    error::{DispatchError, DispatchResult},
    models::{
        channel::Channel,
        queue::QueueEntry,
        status::{FailureKind, QueueStatus},
    },
    pipeline::{
        queue::{QueueManager, StatusChange},
        renderer::{RenderWarning, TemplateRenderer},
    },
};

/// Result of one successful transport call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub channel: Channel,
    pub delivered_to: Vec<String>,
    /// Recipient ids with no usable address on this channel.
    pub skipped: Vec<String>,
    pub warnings: Vec<RenderWarning>,
}

/// Renders and sends queue entries through the transport registered for
/// each channel, then records the outcome on the entry.
pub struct ChannelDispatcher {
    transports: HashMap<Channel, Arc<dyn Transport>>,
    contacts: Arc<dyn ContactDirectory>,
    renderer: TemplateRenderer,
    queue: QueueManager,
    timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(
        renderer: TemplateRenderer,
        contacts: Arc<dyn ContactDirectory>,
        queue: QueueManager,
        timeout: Duration,
    ) -> Self {
        Self {
            transports: HashMap::new(),
            contacts,
            renderer,
            queue,
            timeout,
        }
    }

    pub fn with_transport(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(channel, transport);
        self
    }

    /// Makes exactly one transport call for `entry` on `channel`. Does not
    /// touch the entry's status.
    pub async fn dispatch(
        &self,
        entry: &QueueEntry,
        channel: &Channel,
    ) -> DispatchResult<DeliveryOutcome> {
        let transport = self
            .transports
            .get(channel)
            .ok_or_else(|| DispatchError::UnsupportedChannel(channel.clone()))?;

        let rendered = self
            .renderer
            .render_by_id(&entry.template_id, channel, &entry.payload)
            .await?;

        let (delivered_to, skipped) = self
            .resolve_addresses(entry, &entry.recipient_ids, channel)
            .await?;
        if delivered_to.is_empty() {
            return Err(DispatchError::Validation(format!(
                "no deliverable recipients for {}",
                channel
            )));
        }

        let (cc, bcc) = if channel.is_email() {
            let (cc, _) = self
                .resolve_addresses(entry, &entry.cc_ids, channel)
                .await?;
            let (bcc, _) = self
                .resolve_addresses(entry, &entry.bcc_ids, channel)
                .await?;
            (cc, bcc)
        } else {
            (Vec::new(), Vec::new())
        };

        let message = OutboundMessage {
            channel: channel.clone(),
            to: delivered_to.clone(),
            cc,
            bcc,
            subject: rendered.content.subject,
            body: rendered.content.body,
            text_body: rendered.content.text_body,
            reference: entry.id.to_string(),
        };

        match tokio::time::timeout(self.timeout, transport.send(&message)).await {
            Ok(Ok(())) => Ok(DeliveryOutcome {
                channel: channel.clone(),
                delivered_to,
                skipped,
                warnings: rendered.warnings,
            }),
            Ok(Err(failure)) => Err(DispatchError::Transport {
                reason: failure.reason,
                transient: failure.transient,
            }),
            Err(_) => Err(DispatchError::Transport {
                reason: format!("transport timed out after {}ms", self.timeout.as_millis()),
                transient: true,
            }),
        }
    }

    /// Maps contact ids to addresses on `channel`. Unknown, inactive and
    /// opted-out contacts come back in the second list. A failing contacts
    /// lookup is transient.
    async fn resolve_addresses(
        &self,
        entry: &QueueEntry,
        ids: &[String],
        channel: &Channel,
    ) -> DispatchResult<(Vec<String>, Vec<String>)> {
        let mut addresses = Vec::new();
        let mut skipped = Vec::new();
        for id in ids {
            let contact = self
                .contacts
                .get_contact(id)
                .await
                .map_err(|e| DispatchError::Transport {
                    reason: e.to_string(),
                    transient: true,
                })?;

            match contact.as_ref().and_then(|c| c.address_for(channel)) {
                Some(address) if !addresses.iter().any(|a| a == address) => {
                    addresses.push(address.to_string())
                }
                Some(_) => {}
                None => {
                    warn!(
                        entry_id = %entry.id,
                        contact_id = %id,
                        channel = %channel,
                        "Contact has no usable address for channel, skipping"
                    );
                    skipped.push(id.clone());
                }
            }
        }
        Ok((addresses, skipped))
    }

    /// Runs one delivery attempt for a `PENDING` entry: claims it as
    /// `RETRYING`, sends on every channel and settles it as `SENT` or
    /// `FAILED`. Delivery failures are recorded on the entry, not returned.
    ///
    /// Returns `ConcurrentUpdate` when another worker claimed the entry first.
    pub async fn dispatch_entry(&self, entry: QueueEntry) -> DispatchResult<QueueEntry> {
        if entry.status != QueueStatus::Pending {
            return Err(DispatchError::InvalidTransition {
                id: entry.id,
                from: entry.status,
                to: QueueStatus::Retrying,
            });
        }

        if entry.channels.is_empty() {
            warn!(entry_id = %entry.id, "Queue entry has no channels");
            return self
                .queue
                .apply(
                    &entry,
                    StatusChange::failed(FailureKind::Validation, "no channels to deliver on"),
                )
                .await;
        }

        let claimed = self
            .queue
            .apply(&entry, StatusChange::to(QueueStatus::Retrying))
            .await?;

        let mut failures: Vec<(Channel, DispatchError)> = Vec::new();
        for channel in &claimed.channels {
            match self.dispatch(&claimed, channel).await {
                Ok(outcome) => info!(
                    entry_id = %claimed.id,
                    channel = %channel,
                    recipients = outcome.delivered_to.len(),
                    skipped = outcome.skipped.len(),
                    "Delivered"
                ),
                Err(e) => {
                    error!(
                        entry_id = %claimed.id,
                        channel = %channel,
                        error = %e,
                        "Delivery failed"
                    );
                    failures.push((channel.clone(), e));
                }
            }
        }

        if failures.is_empty() {
            return self
                .queue
                .apply(&claimed, StatusChange::to(QueueStatus::Sent))
                .await;
        }

        let kind = classify(&failures);
        let message = failures
            .iter()
            .map(|(channel, e)| format!("{}: {}", channel, e))
            .collect::<Vec<_>>()
            .join("; ");

        self.queue
            .apply(&claimed, StatusChange::failed(kind, message))
            .await
    }
}

/// Folds per-channel errors into the single kind stored on the entry. Any
/// configuration error wins over transient ones, so a broken template is not
/// retried just because another channel timed out.
fn classify(failures: &[(Channel, DispatchError)]) -> FailureKind {
    failures
        .iter()
        .map(|(_, e)| e.failure_kind().unwrap_or(FailureKind::Transport))
        .find(|kind| !kind.is_retryable())
        .unwrap_or(FailureKind::Transport)
}
