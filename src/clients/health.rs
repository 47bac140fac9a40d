use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{rbmq::RabbitMqClient, redis::RedisClient, store::NotificationStore},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

pub struct HealthChecker {
    store: Arc<dyn NotificationStore>,
    redis: Option<Arc<RedisClient>>,
    rabbitmq: Option<(String, String)>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            redis: None,
            rabbitmq: None,
        }
    }

    pub fn with_redis(mut self, redis: Arc<RedisClient>) -> Self {
        self.redis = Some(redis);
        self
    }

    pub fn with_rabbitmq(mut self, url: String, events_queue_name: String) -> Self {
        self.rabbitmq = Some((url, events_queue_name));
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("store".to_string(), self.check_store().await);
        checks.insert("idempotency_cache".to_string(), self.check_redis().await);
        checks.insert("event_broker".to_string(), self.check_rabbitmq().await);

        HealthCheckResponse {
            status: Self::determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Store health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }

    async fn check_redis(&self) -> ServiceHealth {
        let Some(redis) = &self.redis else {
            return ServiceHealth::disabled("in-process idempotency guard");
        };
        let start = Instant::now();

        match redis.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                // Signals are still accepted, just without cross-process dedup.
                warn!(error = %e, "Redis ping failed");
                ServiceHealth::degraded(format!("Ping failed: {}", e))
            }
        }
    }

    async fn check_rabbitmq(&self) -> ServiceHealth {
        let Some((url, queue)) = &self.rabbitmq else {
            return ServiceHealth::disabled("queue events are only streamed in-process");
        };
        let start = Instant::now();

        match RabbitMqClient::connect(url, queue).await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "RabbitMQ health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "RabbitMQ connection failed");
                ServiceHealth::degraded(format!("Connection failed: {}", e))
            }
        }
    }

    fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        if checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::InMemoryStore;

    #[tokio::test]
    async fn in_memory_setup_is_healthy() {
        let checker = HealthChecker::new(Arc::new(InMemoryStore::new()));

        let health = checker.check_all().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 3);
        assert!(health.checks["idempotency_cache"].detail.is_some());
    }
}
