//! In-process bus backend for tests and single-process deployments. FIFO
//! per queue; consumers across workers are not guaranteed any particular
//! interleaving beyond queue order (`spec.md` §5).

use std::collections::VecDeque;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{Envelope, MessagingError};

#[derive(Debug, Default)]
pub struct InMemoryBus {
    queues: DashMap<String, Mutex<VecDeque<Envelope>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        Ok(())
    }

    pub async fn publish(&self, queue_name: &str, envelope: Envelope) -> Result<(), MessagingError> {
        let queue = self
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::QueueNotFound(queue_name.to_string()))?;
        queue.lock().await.push_back(envelope);
        Ok(())
    }

    pub async fn consume(&self, queue_name: &str) -> Result<Option<Envelope>, MessagingError> {
        let queue = self
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::QueueNotFound(queue_name.to_string()))?;
        Ok(queue.lock().await.pop_front())
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_to_unknown_queue_errors() {
        let bus = InMemoryBus::new();
        let result = bus
            .publish("missing", Envelope::new(uuid::Uuid::new_v4(), "{}".to_string()))
            .await;
        assert!(matches!(result, Err(MessagingError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved_per_queue() {
        let bus = InMemoryBus::new();
        bus.ensure_queue("q").await.unwrap();
        bus.publish("q", Envelope::new(uuid::Uuid::new_v4(), "first".to_string()))
            .await
            .unwrap();
        bus.publish("q", Envelope::new(uuid::Uuid::new_v4(), "second".to_string()))
            .await
            .unwrap();

        let first = bus.consume("q").await.unwrap().unwrap();
        let second = bus.consume("q").await.unwrap().unwrap();
        assert_eq!(first.body, "first");
        assert_eq!(second.body, "second");
    }
}
