use anyhow::{Error, Result, anyhow};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{models::event::QueueEvent, pipeline::observer::QueueObserver};

const EVENT_BUFFER: usize = 1024;

pub struct RabbitMqClient {
    _connection: Connection,
    channel: Channel,
    events_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str, events_queue_name: &str) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .queue_declare(
                events_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare events queue: {}", e))?;

        info!(queue = events_queue_name, "RabbitMQ events queue declared");

        Ok(Self {
            _connection: connection,
            channel,
            events_queue_name: events_queue_name.to_string(),
        })
    }

    pub async fn publish_event(&self, event: &QueueEvent) -> Result<(), Error> {
        let payload = serde_json::to_vec(event)?;

        self.channel
            .basic_publish(
                "",
                &self.events_queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish queue event: {}", e))?;

        Ok(())
    }

    /// Starts a background publisher and returns the observer feeding it.
    pub fn into_observer(self) -> RabbitMqObserver {
        let (sender, mut receiver) = mpsc::channel::<QueueEvent>(EVENT_BUFFER);

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = self.publish_event(&event).await {
                    warn!(error = %e, kind = ?event.kind, "Queue event not published");
                }
            }
        });

        RabbitMqObserver { sender }
    }
}

/// Pushes queue events to the broker for out-of-process subscribers.
pub struct RabbitMqObserver {
    sender: mpsc::Sender<QueueEvent>,
}

impl QueueObserver for RabbitMqObserver {
    fn notify(&self, event: &QueueEvent) {
        if let Err(e) = self.sender.try_send(event.clone()) {
            warn!(error = %e, kind = ?event.kind, "Queue event dropped, publisher is behind");
        }
    }
}
