use std::time::Duration;

use anyhow::Result;
use dispatch_service::{
    clients::{
        contacts::{ContactDirectory, HttpContactDirectory},
        transport::{HttpTransport, OutboundMessage, Transport},
    },
    models::{channel::Channel, retry::RetryConfig},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

fn message() -> OutboundMessage {
    OutboundMessage {
        channel: Channel::Email,
        to: vec!["jane@example.com".into()],
        cc: vec!["office@example.com".into()],
        bcc: vec![],
        subject: Some("Estimate for Jane".into()),
        body: "<p>Hello Jane</p>".into(),
        text_body: Some("Hello Jane".into()),
        reference: "entry-1".into(),
    }
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
    }
}

/// Test: Accepted messages are posted once as JSON
#[tokio::test]
async fn test_http_transport_posts_message() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_partial_json(json!({
            "channel": "EMAIL",
            "to": ["jane@example.com"],
            "cc": ["office@example.com"],
            "subject": "Estimate for Jane",
            "textBody": "Hello Jane",
            "reference": "entry-1"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(format!("{}/send", server.uri()), Duration::from_secs(2))?;
    transport.send(&message()).await?;

    Ok(())
}

/// Test: Provider outages and throttling are transient
#[tokio::test]
async fn test_http_transport_classifies_transient_statuses() -> Result<()> {
    for status in [500, 503, 429] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("try later"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri(), Duration::from_secs(2))?;
        let failure = transport.send(&message()).await.unwrap_err();

        assert!(failure.transient, "status {} should be transient", status);
        assert!(failure.reason.contains("try later"));
    }

    Ok(())
}

/// Test: Rejected requests are permanent failures
#[tokio::test]
async fn test_http_transport_classifies_permanent_statuses() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid address"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri(), Duration::from_secs(2))?;
    let failure = transport.send(&message()).await.unwrap_err();

    assert!(!failure.transient);
    assert!(failure.reason.contains("400"));

    Ok(())
}

/// Test: Slow providers time out as transient failures
#[tokio::test]
async fn test_http_transport_timeout_is_transient() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri(), Duration::from_millis(50))?;
    let failure = transport.send(&message()).await.unwrap_err();

    assert!(failure.transient);

    Ok(())
}

/// Test: Contacts are fetched from the contacts service
#[tokio::test]
async fn test_contact_directory_fetches_contact() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts/c-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "jane@example.com",
            "phone": "+15550001",
            "name": "Jane",
            "sendSmsNotifications": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let directory = HttpContactDirectory::new(format!("{}/", server.uri()), quick_retry())?;
    let contact = directory.get_contact("c-1").await?;

    let contact = contact.ok_or_else(|| anyhow::anyhow!("contact missing"))?;
    assert_eq!(contact.address_for(&Channel::Email), Some("jane@example.com"));
    assert!(contact.active);
    assert_eq!(contact.address_for(&Channel::Sms), None);

    Ok(())
}

/// Test: Unknown contacts resolve to nothing instead of an error
#[tokio::test]
async fn test_contact_directory_unknown_contact() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts/c-404"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let directory = HttpContactDirectory::new(server.uri(), quick_retry())?;

    assert!(directory.get_contact("c-404").await?.is_none());

    Ok(())
}

/// Test: Contact lookups are retried before giving up
#[tokio::test]
async fn test_contact_directory_retries_server_errors() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let directory = HttpContactDirectory::new(server.uri(), quick_retry())?;

    assert!(directory.get_contact("c-1").await.is_err());

    Ok(())
}
