//! Message bus (C2): publish/request/consume of typed commands and events
//! with correlation propagation.

mod envelope;
mod in_memory;
#[cfg(feature = "bus-lapin")]
mod lapin_provider;
mod router;

pub use envelope::Envelope;
pub use in_memory::InMemoryBus;
#[cfg(feature = "bus-lapin")]
pub use lapin_provider::LapinBus;
pub use router::{DefaultMessageRouter, MessageRouter, MessageRouterKind};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::resilience::CircuitBreaker;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit breaker open for {component}")]
    CircuitBreakerOpen { component: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl MessagingError {
    pub fn circuit_breaker_open(component: impl Into<String>) -> Self {
        Self::CircuitBreakerOpen {
            component: component.into(),
        }
    }
}

/// Provider-agnostic bus backend. `InMemory` is used in tests and
/// single-process deployments; `Lapin` speaks AMQP 0.9.1 against a broker.
#[derive(Debug, Clone)]
pub enum MessagingProvider {
    InMemory(Arc<InMemoryBus>),
    #[cfg(feature = "bus-lapin")]
    Lapin(Arc<LapinBus>),
}

impl MessagingProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryBus::new()))
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            MessagingProvider::InMemory(_) => "in_memory",
            #[cfg(feature = "bus-lapin")]
            MessagingProvider::Lapin(_) => "lapin",
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            MessagingProvider::InMemory(b) => b.ensure_queue(queue_name).await,
            #[cfg(feature = "bus-lapin")]
            MessagingProvider::Lapin(b) => b.ensure_queue(queue_name).await,
        }
    }

    pub async fn publish(
        &self,
        queue_name: &str,
        envelope: Envelope,
    ) -> Result<(), MessagingError> {
        match self {
            MessagingProvider::InMemory(b) => b.publish(queue_name, envelope).await,
            #[cfg(feature = "bus-lapin")]
            MessagingProvider::Lapin(b) => b.publish(queue_name, envelope).await,
        }
    }

    pub async fn consume(&self, queue_name: &str) -> Result<Option<Envelope>, MessagingError> {
        match self {
            MessagingProvider::InMemory(b) => b.consume(queue_name).await,
            #[cfg(feature = "bus-lapin")]
            MessagingProvider::Lapin(b) => b.consume(queue_name).await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            MessagingProvider::InMemory(b) => b.health_check().await,
            #[cfg(feature = "bus-lapin")]
            MessagingProvider::Lapin(b) => b.health_check().await,
        }
    }
}

/// Domain-level messaging facade. Wraps a `MessagingProvider` (enum) and
/// `MessageRouterKind` (enum) — no trait objects, all enum dispatch.
/// Optionally wraps protected operations (publish, request, consume) in a
/// circuit breaker; unprotected operations (health_check, queue
/// declaration) bypass it.
#[derive(Debug, Clone)]
pub struct MessageClient {
    provider: Arc<MessagingProvider>,
    router: MessageRouterKind,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl MessageClient {
    pub fn new(provider: Arc<MessagingProvider>, router: MessageRouterKind) -> Self {
        Self {
            provider,
            router,
            circuit_breaker: None,
        }
    }

    pub fn with_circuit_breaker(
        provider: Arc<MessagingProvider>,
        router: MessageRouterKind,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            provider,
            router,
            circuit_breaker: Some(circuit_breaker),
        }
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn router(&self) -> &MessageRouterKind {
        &self.router
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    async fn with_breaker<F, T, Fut>(&self, op: F) -> Result<T, MessagingError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, MessagingError>>,
    {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.should_allow() {
                return Err(MessagingError::circuit_breaker_open("messaging"));
            }
            let start = Instant::now();
            let result = op().await;
            match &result {
                Ok(_) => cb.record_success_manual(start.elapsed()),
                Err(_) => cb.record_failure_manual(start.elapsed()),
            }
            result
        } else {
            op().await
        }
    }

    /// Fire-and-forget publish of a typed payload with correlation/baggage
    /// attached (`spec.md` §4.2).
    pub async fn publish<T: Serialize + Send + Sync>(
        &self,
        queue_name: &str,
        correlation_id: uuid::Uuid,
        payload: &T,
    ) -> Result<(), MessagingError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| MessagingError::Serialization(e.to_string()))?;
        let envelope = Envelope::new(correlation_id, body);
        let provider = self.provider.clone();
        let queue = queue_name.to_string();
        self.with_breaker(|| async move { provider.publish(&queue, envelope).await })
            .await
    }

    /// Request/response with a bounded wait, honoring cancellation via the
    /// caller's timeout (`spec.md` §4.2/§5).
    pub async fn request<T: DeserializeOwned>(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<T, MessagingError> {
        let provider = self.provider.clone();
        let queue = queue_name.to_string();
        let envelope = self
            .with_breaker(|| async move {
                tokio::time::timeout(timeout, async {
                    loop {
                        if let Some(envelope) = provider.consume(&queue).await? {
                            return Ok(envelope);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .await
                .map_err(|_| MessagingError::Timeout(timeout))?
            })
            .await?;
        serde_json::from_str(&envelope.body)
            .map_err(|e| MessagingError::Serialization(e.to_string()))
    }

    /// Consume one available message without blocking, or `None` if empty.
    pub async fn consume<T: DeserializeOwned>(
        &self,
        queue_name: &str,
    ) -> Result<Option<(Envelope, T)>, MessagingError> {
        let provider = self.provider.clone();
        let queue = queue_name.to_string();
        let envelope = self
            .with_breaker(|| async move { provider.consume(&queue).await })
            .await?;
        match envelope {
            Some(envelope) => {
                let payload = serde_json::from_str(&envelope.body)
                    .map_err(|e| MessagingError::Serialization(e.to_string()))?;
                Ok(Some((envelope, payload)))
            }
            None => Ok(None),
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.provider.ensure_queue(queue_name).await
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        self.provider.health_check().await
    }
}

/// Trait a queue message payload implements to pair with its queue name.
pub trait QueueMessage: Serialize + DeserializeOwned + Send + Sync {}
impl<T: Serialize + DeserializeOwned + Send + Sync> QueueMessage for T {}
