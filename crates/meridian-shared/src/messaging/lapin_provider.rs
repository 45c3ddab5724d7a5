//! AMQP 0.9.1 bus backend via `lapin`, for production multi-pod
//! deployments.

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};

use super::{Envelope, MessagingError};

#[derive(Debug)]
pub struct LapinBus {
    connection: Connection,
}

impl LapinBus {
    pub async fn connect(amqp_url: &str) -> Result<Self, MessagingError> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        Ok(Self { connection })
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        Ok(())
    }

    pub async fn publish(&self, queue_name: &str, envelope: Envelope) -> Result<(), MessagingError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        let correlation_id = envelope.correlation_id.to_string();
        channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                envelope.body.as_bytes(),
                BasicProperties::default().with_correlation_id(correlation_id.into()),
            )
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        Ok(())
    }

    pub async fn consume(&self, queue_name: &str) -> Result<Option<Envelope>, MessagingError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        let delivery = channel
            .basic_get(queue_name, BasicGetOptions::default())
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        match delivery {
            Some(delivery) => {
                let body = String::from_utf8_lossy(&delivery.data).to_string();
                let correlation_id = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .and_then(|id| id.as_str().parse().ok())
                    .unwrap_or_else(uuid::Uuid::new_v4);
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(|e| MessagingError::Transport(e.to_string()))?;
                Ok(Some(Envelope::new(correlation_id, body)))
            }
            None => Ok(None),
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(self.connection.status().connected())
    }

    /// Declares a long-lived consumer, used by processor-runtime workers
    /// that pull continuously rather than polling `basic_get`.
    pub async fn consumer(
        &self,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<lapin::Consumer, MessagingError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;
        channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))
    }
}
