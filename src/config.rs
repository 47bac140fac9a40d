use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{models::retry::RetryConfig, pipeline::scheduler::SchedulerConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub database_url: Option<String>,

    pub redis_url: Option<String>,
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_seconds: u64,

    pub rabbitmq_url: Option<String>,
    #[serde(default = "default_events_queue")]
    pub events_queue_name: String,

    pub contact_service_url: Option<String>,

    pub email_transport_url: Option<String>,
    pub sms_transport_url: Option<String>,
    pub whatsapp_transport_url: Option<String>,
    pub telegram_transport_url: Option<String>,
    #[serde(default = "default_transport_timeout")]
    pub transport_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    /// Retries for calls to collaborators (contacts service, Redis). Kept
    /// short: they run inside a single delivery attempt or request.
    #[serde(default = "default_collaborator_max_attempts")]
    pub collaborator_max_attempts: u32,
    #[serde(default = "default_collaborator_retry_delay")]
    pub collaborator_retry_delay_ms: u64,
    #[serde(default = "default_collaborator_max_retry_delay")]
    pub collaborator_max_retry_delay_ms: u64,

    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_seconds: u64,
    #[serde(default = "default_expire_after")]
    pub expire_after_seconds: u64,
    #[serde(default = "default_in_flight_timeout")]
    pub in_flight_timeout_seconds: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_idempotency_ttl() -> u64 {
    86_400
}

fn default_events_queue() -> String {
    "notification_events".to_string()
}

fn default_transport_timeout() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    60_000
}

fn default_retry_max_delay() -> u64 {
    3_600_000
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_collaborator_max_attempts() -> u32 {
    3
}

fn default_collaborator_retry_delay() -> u64 {
    100
}

fn default_collaborator_max_retry_delay() -> u64 {
    2_000
}

fn default_scheduler_interval() -> u64 {
    60
}

fn default_expire_after() -> u64 {
    86_400
}

fn default_in_flight_timeout() -> u64 {
    300
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.scheduler_interval_seconds == 0 {
            return Err(anyhow!("SCHEDULER_INTERVAL_SECONDS must be at least 1"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow!(
                "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS"
            ));
        }
        if self.collaborator_max_attempts == 0 {
            return Err(anyhow!("COLLABORATOR_MAX_ATTEMPTS must be at least 1"));
        }
        if self.collaborator_retry_delay_ms > self.collaborator_max_retry_delay_ms {
            return Err(anyhow!(
                "COLLABORATOR_RETRY_DELAY_MS must not exceed COLLABORATOR_MAX_RETRY_DELAY_MS"
            ));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            initial_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    /// Backoff for collaborator calls. Not the queue-entry backoff, which is
    /// measured in minutes and owned by the scheduler.
    pub fn collaborator_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.collaborator_max_attempts,
            initial_delay_ms: self.collaborator_retry_delay_ms,
            max_delay_ms: self.collaborator_max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scheduler_interval_seconds),
            retry: self.retry_config(),
            expire_after: chrono::Duration::seconds(self.expire_after_seconds as i64),
            in_flight_timeout: chrono::Duration::seconds(self.in_flight_timeout_seconds as i64),
            worker_concurrency: self.worker_concurrency,
        }
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn collaborator_retries_are_separate_from_entry_backoff() {
        let config = Config::from_vars(vars(&[("MAX_RETRIES", "5")])).unwrap();

        let entries = config.retry_config();
        let collaborators = config.collaborator_retry_config();

        assert_eq!(entries.max_attempts, 5);
        assert_eq!(entries.initial_delay_ms, 60_000);
        assert_eq!(collaborators.max_attempts, 3);
        assert_eq!(collaborators.initial_delay_ms, 100);
        assert!(collaborators.max_delay_ms < entries.initial_delay_ms);
    }

    #[test]
    fn invalid_collaborator_delays_are_rejected() {
        let result = Config::from_vars(vars(&[
            ("COLLABORATOR_RETRY_DELAY_MS", "5000"),
            ("COLLABORATOR_MAX_RETRY_DELAY_MS", "100"),
        ]));

        assert!(result.is_err());
    }
}
