use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use dispatch_service::{
    api::{AppState, run_api_server},
    clients::{
        contacts::{ContactDirectory, HttpContactDirectory, StaticContactDirectory},
        database::PostgresStore,
        health::HealthChecker,
        memory::InMemoryStore,
        rbmq::RabbitMqClient,
        redis::{IdempotencyGuard, LocalIdempotencyGuard, RedisClient},
        store::NotificationStore,
        transport::HttpTransport,
    },
    config::Config,
    models::channel::Channel,
    pipeline::{
        PipelineBuilder,
        observer::{BroadcastObserver, Observers},
    },
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const EVENT_STREAM_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = Config::load()?;
    info!(port = config.server_port, "Configuration loaded");

    let store: Arc<dyn NotificationStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let redis = match &config.redis_url {
        Some(url) => Some(Arc::new(
            RedisClient::connect(
                url,
                config.idempotency_ttl_seconds,
                config.collaborator_retry_config(),
            )
            .await?,
        )),
        None => None,
    };
    let idempotency: Arc<dyn IdempotencyGuard> = match &redis {
        Some(client) => client.clone(),
        None => Arc::new(LocalIdempotencyGuard::new(Duration::from_secs(
            config.idempotency_ttl_seconds,
        ))),
    };

    let events = Arc::new(BroadcastObserver::new(EVENT_STREAM_CAPACITY));
    let mut observers = Observers::new().with(events.clone());
    if let Some(url) = &config.rabbitmq_url {
        let client = RabbitMqClient::connect(url, &config.events_queue_name).await?;
        observers = observers.with(Arc::new(client.into_observer()));
    }

    let contacts: Arc<dyn ContactDirectory> = match &config.contact_service_url {
        Some(url) => Arc::new(HttpContactDirectory::new(
            url.as_str(),
            config.collaborator_retry_config(),
        )?),
        None => {
            warn!("CONTACT_SERVICE_URL not set, no recipient can be resolved");
            Arc::new(StaticContactDirectory::new())
        }
    };

    let mut builder = PipelineBuilder::new(store.clone(), contacts)
        .idempotency(idempotency)
        .observers(observers)
        .transport_timeout(config.transport_timeout());

    let transports = [
        (Channel::Email, &config.email_transport_url),
        (Channel::Sms, &config.sms_transport_url),
        (Channel::WhatsApp, &config.whatsapp_transport_url),
        (Channel::Telegram, &config.telegram_transport_url),
    ];
    for (channel, url) in transports {
        if let Some(url) = url {
            let transport = HttpTransport::new(url.as_str(), config.transport_timeout())?;
            info!(channel = %channel, "Transport registered");
            builder = builder.transport(channel, Arc::new(transport));
        }
    }

    let pipeline = builder.build();

    let mut health_checker = HealthChecker::new(store);
    if let Some(client) = &redis {
        health_checker = health_checker.with_redis(client.clone());
    }
    if let Some(url) = &config.rabbitmq_url {
        health_checker =
            health_checker.with_rabbitmq(url.clone(), config.events_queue_name.clone());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = pipeline.scheduler(config.scheduler_config());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let state = Arc::new(AppState {
        pipeline,
        health_checker,
        events,
        retry: config.retry_config(),
    });

    run_api_server(state, config.server_port, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }

    info!("Dispatch service stopped");
    Ok(())
}
