use std::collections::BTreeSet;

use anyhow::{Result, anyhow};
use dispatch_service::{
    error::DispatchError,
    models::{
        channel::Channel,
        queue::{NewQueueEntry, QueueFilter, SortField, SortOrder},
        retry::RetryConfig,
        signal::NewSignal,
        status::QueueStatus,
        trace::TraceState,
    },
    pipeline::signals::SignalOutcome,
};
use uuid::Uuid;

use crate::common::{estimate_signal, harness, seed_estimate_flow};

/// Test: The trace of a delivered signal links hooks, entries and template
#[tokio::test]
async fn test_trace_of_delivered_signal() -> Result<()> {
    let h = harness();
    seed_estimate_flow(&h).await?;

    let summary = h.pipeline.process_signal(estimate_signal()).await?;
    let signal_id = summary.signal_id.ok_or_else(|| anyhow!("signal id missing"))?;

    let trace = h.pipeline.trace.trace_signal(signal_id).await?;

    assert_eq!(trace.signal.id, signal_id);
    assert_eq!(trace.matched_hooks.len(), 1);
    assert_eq!(trace.queue_entries.len(), 1);
    assert_eq!(trace.queue_entries[0].entry.id, summary.entries[0].id);
    assert_eq!(
        trace.template.as_ref().map(|t| t.id.as_str()),
        Some("T1")
    );
    assert_eq!(trace.state, TraceState::Sent);

    Ok(())
}

/// Test: A missing template is shown as absent rather than failing the trace
#[tokio::test]
async fn test_trace_tolerates_missing_template() -> Result<()> {
    let h = harness();

    let signal = match h
        .pipeline
        .ingestion
        .emit(NewSignal::new("estimate_request", Default::default(), "import"))
        .await?
    {
        SignalOutcome::Emitted(signal) => signal,
        other => return Err(anyhow!("unexpected outcome {:?}", other)),
    };

    h.pipeline
        .queue
        .create(NewQueueEntry {
            event_type: "estimate_request".into(),
            signal_id: Some(signal.id),
            template_id: "deleted-template".into(),
            payload: Default::default(),
            recipient_ids: vec!["c-1".into()],
            cc_ids: vec![],
            bcc_ids: vec![],
            channels: BTreeSet::from([Channel::Email]),
            scheduled_at: None,
            owner: "import".into(),
        })
        .await?;

    let trace = h.pipeline.trace.trace_signal(signal.id).await?;

    assert_eq!(trace.queue_entries.len(), 1);
    assert!(trace.queue_entries[0].template.is_none());
    assert!(trace.template.is_none());
    assert_eq!(trace.state, TraceState::AwaitingDelivery);

    Ok(())
}

/// Test: Tracing an unknown signal is a not-found error
#[tokio::test]
async fn test_trace_of_unknown_signal() -> Result<()> {
    let h = harness();

    let err = h.pipeline.trace.trace_signal(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DispatchError::SignalNotFound(_)));

    Ok(())
}

/// Test: Queue listing filters by status and free text and sorts on request
#[tokio::test]
async fn test_list_queue_entries_filters_and_sorts() -> Result<()> {
    let h = harness();
    seed_estimate_flow(&h).await?;

    let sent = h.pipeline.process_signal(estimate_signal()).await?;
    let requeued = h
        .pipeline
        .queue
        .requeue(sent.entries[0].id, "ops")
        .await?;

    let pending = h
        .pipeline
        .trace
        .list_queue_entries(
            &QueueFilter::with_status(QueueStatus::Pending),
            SortField::CreatedAt,
            SortOrder::Desc,
        )
        .await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, requeued.id);

    let by_text = h
        .pipeline
        .trace
        .list_queue_entries(
            &QueueFilter {
                search_text: Some("JANE".into()),
                ..Default::default()
            },
            SortField::CreatedAt,
            SortOrder::Asc,
        )
        .await?;
    assert_eq!(by_text.len(), 2, "Search covers the payload, case-insensitively");
    assert_eq!(by_text[0].id, sent.entries[0].id);
    assert_eq!(by_text[1].id, requeued.id);

    let none = h
        .pipeline
        .trace
        .list_queue_entries(
            &QueueFilter {
                channel: Some(Channel::Sms),
                ..Default::default()
            },
            SortField::CreatedAt,
            SortOrder::Desc,
        )
        .await?;
    assert!(none.is_empty());

    Ok(())
}

/// Test: Exhausted failures are listed as needing attention; retryable ones are not
#[tokio::test]
async fn test_needs_attention() -> Result<()> {
    let h = harness();
    seed_estimate_flow(&h).await?;

    let summary = h.pipeline.process_signal(estimate_signal()).await?;
    let requeued = h
        .pipeline
        .queue
        .requeue(summary.entries[0].id, "ops")
        .await?;
    h.pipeline
        .queue
        .update_status(requeued.id, QueueStatus::Failed, Some("bounced".into()))
        .await?;

    let attention = h
        .pipeline
        .trace
        .needs_attention(&RetryConfig::default())
        .await?;

    assert_eq!(attention.len(), 1);
    assert_eq!(attention[0].id, requeued.id);
    assert_eq!(attention[0].error_message.as_deref(), Some("bounced"));

    Ok(())
}
