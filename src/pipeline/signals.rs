use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::{redis::IdempotencyGuard, store::NotificationStore},
    error::{DispatchError, DispatchResult},
    models::signal::{NewSignal, Signal},
};

#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Emitted(Signal),
    /// The producer already delivered an event with this idempotency key.
    Duplicate { idempotency_key: String },
}

/// Write path for business events.
#[derive(Clone)]
pub struct SignalIngestion {
    store: Arc<dyn NotificationStore>,
    idempotency: Option<Arc<dyn IdempotencyGuard>>,
}

impl SignalIngestion {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        idempotency: Option<Arc<dyn IdempotencyGuard>>,
    ) -> Self {
        Self { store, idempotency }
    }

    /// Persists a new, unprocessed signal. The payload shape is not checked
    /// here; that is up to the templates that render it.
    pub async fn emit(&self, new: NewSignal) -> DispatchResult<SignalOutcome> {
        let signal_type = new.signal_type.trim();
        if signal_type.is_empty() {
            return Err(DispatchError::Validation(
                "signalType must not be empty".to_string(),
            ));
        }
        if new.source.trim().is_empty() {
            return Err(DispatchError::Validation(
                "source must not be empty".to_string(),
            ));
        }

        if let (Some(guard), Some(key)) = (&self.idempotency, &new.idempotency_key) {
            if !guard.try_begin(key).await? {
                info!(idempotency_key = %key, "Signal already received, skipping");
                return Ok(SignalOutcome::Duplicate {
                    idempotency_key: key.clone(),
                });
            }
        }

        let signal = Signal {
            id: Uuid::new_v4(),
            signal_type: signal_type.to_string(),
            payload: new.payload,
            emitted_at: Utc::now(),
            emitted_by: new.emitted_by,
            source: new.source,
            processed: false,
        };

        if let Err(e) = self.store.insert_signal(&signal).await {
            self.release(new.idempotency_key.as_deref()).await;
            return Err(e);
        }

        info!(
            signal_id = %signal.id,
            signal_type = %signal.signal_type,
            source = %signal.source,
            "Signal emitted"
        );

        Ok(SignalOutcome::Emitted(signal))
    }

    pub async fn mark_processed(
        &self,
        signal: &Signal,
        idempotency_key: Option<&str>,
    ) -> DispatchResult<()> {
        self.store.mark_signal_processed(signal.id).await?;

        if let (Some(guard), Some(key)) = (&self.idempotency, idempotency_key) {
            if let Err(e) = guard.mark_as_sent(key).await {
                warn!(error = %e, idempotency_key = key, "Failed to mark idempotency key");
            }
        }
        Ok(())
    }

    /// Forgets a claimed idempotency key so the producer can redeliver.
    pub async fn release(&self, idempotency_key: Option<&str>) {
        if let (Some(guard), Some(key)) = (&self.idempotency, idempotency_key) {
            match guard.release(key).await {
                Ok(()) => info!(idempotency_key = key, "Idempotency key released"),
                Err(e) => {
                    warn!(error = %e, idempotency_key = key, "Failed to release idempotency key")
                }
            }
        }
    }
}
