use serde_json::Value as JsonValue;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

/// Guards against pathological inputs; real rows are at most double-encoded.
const MAX_DECODE_DEPTH: usize = 8;

/// Decodes a string-encoded list column such as `channels` or
/// `recipientIds`.
///
/// Older rows were written with the array JSON-encoded twice (a JSON string
/// whose content is the JSON array), so the value is decoded repeatedly until
/// something other than a string comes out. Anything that does not end in an
/// array yields an empty list; this never fails.
pub fn decode_string_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<JsonValue>(raw) {
        Ok(value) => decode_string_list_value(value),
        Err(e) => {
            warn!(error = %e, "Undecodable list column, treating as empty");
            Vec::new()
        }
    }
}

/// Same contract as [`decode_string_list`] for an already-parsed value.
pub fn decode_string_list_value(value: JsonValue) -> Vec<String> {
    let mut current = value;

    for _ in 0..MAX_DECODE_DEPTH {
        match current {
            JsonValue::String(inner) => match serde_json::from_str::<JsonValue>(&inner) {
                Ok(next) => current = next,
                Err(_) => return Vec::new(),
            },
            JsonValue::Array(items) => {
                return items
                    .into_iter()
                    .filter_map(|item| match item {
                        JsonValue::String(s) => Some(s),
                        JsonValue::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
            }
            _ => return Vec::new(),
        }
    }

    warn!("List column nested deeper than expected, treating as empty");
    Vec::new()
}

/// Single-encoded form written for every new row.
pub fn encode_string_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let items: Vec<JsonValue> = items
        .into_iter()
        .map(|s| JsonValue::String(s.as_ref().to_string()))
        .collect();

    JsonValue::Array(items).to_string()
}

/// Retries an operation against an external collaborator with jittered
/// exponential backoff. Not used for transport sends; those are retried by the
/// scheduler one attempt at a time.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);

                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(delay_ms * config.backoff_multiplier, config.max_delay_ms);
            }
        }
    }
}
