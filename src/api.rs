use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Json,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use futures_util::{Stream, stream};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    error::{DispatchError, DispatchResult},
    models::{
        audit::AuditRecord,
        channel::Channel,
        health::HealthStatus,
        hook::{NewHook, NotificationHook},
        queue::{BulkResult, DateRange, QueueEntry, QueueFilter, SortField, SortOrder},
        response::ApiResponse,
        retry::RetryConfig,
        signal::NewSignal,
        status::QueueStatus,
        template::{NotificationTemplate, TemplateInput},
        trace::SignalTrace,
    },
    pipeline::{DispatchSummary, NotificationPipeline, observer::BroadcastObserver},
};

pub struct AppState {
    pub pipeline: NotificationPipeline,
    pub health_checker: HealthChecker,
    pub events: Arc<BroadcastObserver>,
    pub retry: RetryConfig,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/signals", post(emit_signal))
        .route("/signals/{id}/trace", get(trace_signal))
        .route("/queue", get(list_queue))
        .route("/queue/attention", get(needs_attention))
        .route("/queue/bulk", post(bulk_update))
        .route("/queue/{id}", delete(delete_entry))
        .route("/queue/{id}/audit", get(entry_audit))
        .route("/queue/{id}/requeue", post(requeue_entry))
        .route("/templates", post(create_template))
        .route("/templates/{id}", put(update_template))
        .route("/hooks", post(register_hook).get(list_hooks))
        .route("/events", get(queue_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Admin API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn emit_signal(
    State(state): State<Arc<AppState>>,
    Json(signal): Json<NewSignal>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<DispatchSummary>>)> {
    let summary = state.pipeline.process_signal(signal).await?;

    let (status, message) = if summary.duplicate {
        (StatusCode::OK, "Duplicate signal ignored")
    } else {
        (StatusCode::ACCEPTED, "Signal accepted")
    };

    Ok((status, Json(ApiResponse::success(summary, message.to_string()))))
}

async fn trace_signal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<ApiResponse<SignalTrace>>> {
    let trace = state.pipeline.trace.trace_signal(id).await?;
    Ok(Json(ApiResponse::success(trace, "Signal trace".to_string())))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueQuery {
    status: Option<QueueStatus>,
    channel: Option<String>,
    event_type: Option<String>,
    signal_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    search: Option<String>,
    #[serde(default)]
    sort: SortField,
    #[serde(default)]
    order: SortOrder,
}

impl QueueQuery {
    fn filter(&self) -> QueueFilter {
        let date_range = (self.from.is_some() || self.to.is_some()).then_some(DateRange {
            from: self.from,
            to: self.to,
        });

        QueueFilter {
            status: self.status,
            channel: self.channel.as_deref().map(Channel::from),
            event_type: self.event_type.clone(),
            signal_id: self.signal_id,
            date_range,
            search_text: self.search.clone(),
        }
    }
}

async fn list_queue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueQuery>,
) -> DispatchResult<Json<ApiResponse<Vec<QueueEntry>>>> {
    let entries = state
        .pipeline
        .trace
        .list_queue_entries(&query.filter(), query.sort, query.order)
        .await?;

    let total = entries.len();
    Ok(Json(ApiResponse::list(entries, total, "Queue entries".to_string())))
}

async fn needs_attention(
    State(state): State<Arc<AppState>>,
) -> DispatchResult<Json<ApiResponse<Vec<QueueEntry>>>> {
    let entries = state.pipeline.trace.needs_attention(&state.retry).await?;

    let total = entries.len();
    Ok(Json(ApiResponse::list(
        entries,
        total,
        "Entries needing manual intervention".to_string(),
    )))
}

async fn entry_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<ApiResponse<Vec<AuditRecord>>>> {
    let records = state.pipeline.trace.audit_for_entry(id).await?;

    let total = records.len();
    Ok(Json(ApiResponse::list(records, total, "Audit trail".to_string())))
}

#[derive(Debug, Deserialize)]
struct ActorQuery {
    #[serde(default = "default_actor")]
    actor: String,
}

fn default_actor() -> String {
    "operator".to_string()
}

async fn requeue_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ActorQuery>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<QueueEntry>>)> {
    let entry = state.pipeline.queue.requeue(id, &query.actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(entry, "Entry requeued".to_string())),
    ))
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ActorQuery>,
) -> DispatchResult<Json<ApiResponse<AuditRecord>>> {
    let record = state.pipeline.queue.delete(id, &query.actor).await?;
    Ok(Json(ApiResponse::success(record, "Entry deleted".to_string())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    ids: Vec<Uuid>,
    /// Target status; omitted together with `delete: true` for bulk deletes.
    status: Option<QueueStatus>,
    #[serde(default)]
    delete: bool,
    #[serde(default = "default_actor")]
    actor: String,
}

async fn bulk_update(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkRequest>,
) -> DispatchResult<Json<ApiResponse<BulkResult>>> {
    let queue = &state.pipeline.queue;

    let result = match (request.status, request.delete) {
        (Some(status), false) => queue.bulk_update(&request.ids, status, &request.actor).await,
        (None, true) => queue.bulk_delete(&request.ids, &request.actor).await,
        _ => {
            return Err(DispatchError::Validation(
                "exactly one of status or delete is required".to_string(),
            ));
        }
    };

    let message = if result.is_complete_success() {
        "Bulk action applied"
    } else {
        "Bulk action partially applied"
    };
    Ok(Json(ApiResponse::success(result, message.to_string())))
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(input): Json<TemplateInput>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<NotificationTemplate>>)> {
    let template = state.pipeline.templates.create_template(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(template, "Template created".to_string())),
    ))
}

async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut input): Json<TemplateInput>,
) -> DispatchResult<Json<ApiResponse<NotificationTemplate>>> {
    input.id = id;
    let template = state.pipeline.templates.update_template(input).await?;
    Ok(Json(ApiResponse::success(template, "Template updated".to_string())))
}

async fn register_hook(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<NewHook>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<NotificationHook>>)> {
    let hook = state.pipeline.matcher.register(hook).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(hook, "Hook registered".to_string())),
    ))
}

async fn list_hooks(
    State(state): State<Arc<AppState>>,
) -> DispatchResult<Json<ApiResponse<Vec<NotificationHook>>>> {
    let hooks = state.pipeline.matcher.list().await?;

    let total = hooks.len();
    Ok(Json(ApiResponse::list(hooks, total, "Hooks".to_string())))
}

async fn queue_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), receiver)),
                    Err(e) => warn!(error = %e, "Queue event not serializable"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
