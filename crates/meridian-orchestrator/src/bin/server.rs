//! Orchestrator binary composition root: wires the manager client, bus,
//! cache, and schema validator, then runs the graph-advancement loop
//! until shutdown. `start`/`stop`/`status`/`processors_health` are
//! exposed as library calls for an embedding HTTP layer to invoke; this
//! binary itself only drives the background advancement consumer.

use std::sync::Arc;

use meridian_orchestrator::OrchestrationService;
use meridian_shared::cache::{CacheProvider, MokaCache};
use meridian_shared::config::MeridianConfig;
use meridian_shared::manager_client::ManagerHttpClient;
use meridian_shared::messaging::{
    DefaultMessageRouter, MessageClient, MessageRouterKind, MessagingProvider,
};
use meridian_shared::resilience::CircuitBreaker;
use meridian_shared::schema::SchemaValidator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let config = MeridianConfig::load()?;

    if config.cache.provider != "moka" {
        warn!(provider = %config.cache.provider, "cache provider not compiled into this binary, falling back to moka");
    }
    let cache: Arc<dyn meridian_shared::cache::Cache> =
        Arc::new(CacheProvider::Moka(Arc::new(MokaCache::new())));

    if config.messaging.provider != "in_memory" {
        warn!(provider = %config.messaging.provider, "messaging provider not compiled into this binary, falling back to in_memory");
    }
    let messaging_provider = Arc::new(MessagingProvider::new_in_memory());
    let router = MessageRouterKind::from(DefaultMessageRouter::new(
        config.messaging.processor_queue_prefix.clone(),
        "orchestration_activity_events",
        "orchestration_processor_registration",
    ));
    let message_client = Arc::new(MessageClient::new(messaging_provider, router.clone()));

    let manager_breaker = Arc::new(CircuitBreaker::new(
        "manager-client".to_string(),
        config.manager_client.circuit_breaker.into(),
    ));
    let manager = Arc::new(ManagerHttpClient::new(
        config.manager_client.base_url.clone(),
        config.manager_client.retry_policy(),
        manager_breaker,
    ));

    let validator = Arc::new(SchemaValidator::new());

    let service = OrchestrationService::new(manager, message_client, router, cache, validator);

    let advancement_token = CancellationToken::new();
    let advancement_service = service.clone();
    let advancement_cancel = advancement_token.clone();
    let advancement_task = tokio::spawn(async move {
        advancement_service.run_advancement_loop(advancement_cancel).await
    });

    info!("orchestration service started, advancement loop running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    advancement_token.cancel();
    let _ = advancement_task.await;

    Ok(())
}
