use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use dispatch_service::{
    api::{AppState, router},
    clients::health::HealthChecker,
    models::retry::RetryConfig,
    pipeline::observer::BroadcastObserver,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::common::{harness, seed_estimate_flow};

async fn app() -> Result<Router> {
    let h = harness();
    seed_estimate_flow(&h).await?;

    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(h.store.clone()),
        pipeline: h.pipeline,
        events: Arc::new(BroadcastObserver::new(16)),
        retry: RetryConfig::default(),
    });

    Ok(router(state))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => request.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, json))
}

fn estimate_body() -> Value {
    json!({
        "signalType": "estimate_request",
        "payload": { "customer": { "name": "Jane" } },
        "source": "web-form"
    })
}

/// Test: Health reports every dependency
#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let app = app().await?;

    let (status, body) = call(&app, "GET", "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"]["status"], "healthy");

    Ok(())
}

/// Test: Posting a signal dispatches it and the queue shows the result
#[tokio::test]
async fn test_signal_round_trip() -> Result<()> {
    let app = app().await?;

    let (status, body) = call(&app, "POST", "/signals", Some(estimate_body())).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["entries"][0]["status"], "SENT");

    let signal_id = body["data"]["signalId"].as_str().unwrap_or_default().to_string();
    let (status, trace) = call(&app, "GET", &format!("/signals/{}/trace", signal_id), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace["data"]["state"]["state"], "sent");

    let (status, list) =
        call(&app, "GET", "/queue?status=SENT&sort=createdAt&order=asc", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["meta"]["total"], 1);

    Ok(())
}

/// Test: Requeue creates a new pending entry
#[tokio::test]
async fn test_requeue_endpoint() -> Result<()> {
    let app = app().await?;

    let (_, body) = call(&app, "POST", "/signals", Some(estimate_body())).await?;
    let entry_id = body["data"]["entries"][0]["id"].as_str().unwrap_or_default().to_string();

    let (status, requeued) = call(
        &app,
        "POST",
        &format!("/queue/{}/requeue?actor=alice", entry_id),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(requeued["data"]["status"], "PENDING");
    assert_eq!(requeued["data"]["requeuedFrom"], entry_id.as_str());

    let (_, audit) = call(&app, "GET", &format!("/queue/{}/audit", entry_id), None).await?;
    assert_eq!(audit["data"][0]["action"], "requeued");
    assert_eq!(audit["data"][0]["actor"], "alice");

    Ok(())
}

/// Test: Bulk actions report per-id results and reject ambiguous requests
#[tokio::test]
async fn test_bulk_endpoint() -> Result<()> {
    let app = app().await?;

    let (_, body) = call(&app, "POST", "/signals", Some(estimate_body())).await?;
    let entry_id = body["data"]["entries"][0]["id"].clone();

    let (status, result) = call(
        &app,
        "POST",
        "/queue/bulk",
        Some(json!({ "ids": [entry_id], "status": "SENT" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["data"]["unchanged"][0], entry_id);

    let (status, error) = call(&app, "POST", "/queue/bulk", Some(json!({ "ids": [] }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "VALIDATION");

    Ok(())
}

/// Test: Unknown resources map to not-found error bodies
#[tokio::test]
async fn test_not_found_errors() -> Result<()> {
    let app = app().await?;

    let (status, body) = call(
        &app,
        "GET",
        &format!("/signals/{}/trace", Uuid::new_v4()),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "SIGNAL_NOT_FOUND");

    let (status, body) = call(&app, "DELETE", &format!("/queue/{}", Uuid::new_v4()), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ENTRY_NOT_FOUND");

    Ok(())
}

/// Test: Templates are created, validated and updated over HTTP
#[tokio::test]
async fn test_template_endpoints() -> Result<()> {
    let app = app().await?;

    let template = json!({
        "id": "T2",
        "name": "Appointment reminder",
        "channel": "SMS",
        "smsBody": "See you at {{appointment.time}}",
        "variables": ["appointment.time"]
    });
    let (status, created) = call(&app, "POST", "/templates", Some(template.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["isActive"], true);

    let mut update = template;
    update["isActive"] = json!(false);
    let (status, updated) = call(&app, "PUT", "/templates/T2", Some(update)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["isActive"], false);

    let (status, _) = call(
        &app,
        "POST",
        "/templates",
        Some(json!({ "id": "T3", "name": "Chat", "channel": "WHATSAPP", "smsBody": "hi" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

/// Test: Hooks referencing unknown templates are rejected
#[tokio::test]
async fn test_hook_endpoint() -> Result<()> {
    let app = app().await?;

    let (status, body) = call(
        &app,
        "POST",
        "/hooks",
        Some(json!({
            "signalType": "estimate_request",
            "channel": "EMAIL",
            "templateId": "nope",
            "recipientResolver": { "type": "payload_path", "value": "customer.contactId" }
        })),
    )
    .await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "TEMPLATE_NOT_FOUND");

    let (status, hooks) = call(&app, "GET", "/hooks", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hooks["meta"]["total"], 1);

    Ok(())
}
