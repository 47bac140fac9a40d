use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, anyhow};
use chrono::Duration;
use dispatch_service::{models::retry::RetryConfig, utils::retry_with_backoff};

fn collaborator_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 20,
        max_delay_ms: 200,
        backoff_multiplier: 2,
    }
}

/// Test: Successful collaborator calls are not repeated
#[tokio::test]
async fn test_successful_operation_no_retry() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&collaborator_retry(3), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("contact")
        }
    })
    .await?;

    assert_eq!(result, "contact");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 1, "Should only attempt once");

    Ok(())
}

/// Test: Transient collaborator failures are retried until one succeeds
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&collaborator_retry(5), || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("connection reset"))
            } else {
                Ok("contact")
            }
        }
    })
    .await?;

    assert_eq!(result, "contact");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Persistent failures give up after max_attempts
#[tokio::test]
async fn test_persistent_failure_exhausts_retries() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&collaborator_retry(4), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(anyhow!("contacts service down"))
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        4,
        "Should attempt exactly max_attempts times"
    );

    Ok(())
}

/// Test: Queue entry backoff grows exponentially with retryCount
#[tokio::test]
async fn test_entry_backoff_is_exponential() -> Result<()> {
    let config = RetryConfig::default();

    assert_eq!(config.delay_for(0), Duration::minutes(1));
    assert_eq!(config.delay_for(1), Duration::minutes(2));
    assert_eq!(config.delay_for(2), Duration::minutes(4));

    Ok(())
}

/// Test: Queue entry backoff is capped and never overflows
#[tokio::test]
async fn test_entry_backoff_is_capped() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 100,
        initial_delay_ms: 60_000,
        max_delay_ms: 600_000,
        backoff_multiplier: 3,
    };

    assert_eq!(config.delay_for(2), Duration::minutes(9));
    assert_eq!(config.delay_for(3), Duration::minutes(10));
    assert_eq!(config.delay_for(u32::MAX), Duration::minutes(10));

    Ok(())
}
