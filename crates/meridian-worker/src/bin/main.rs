//! Processor binary composition root: loads configuration, wires the
//! manager client, bus, cache, schema validator, and health monitor
//! together, then runs the processor runtime until shutdown.

use std::sync::Arc;
use std::time::Duration;

use meridian_health::{HealthMonitor, HealthMonitorConfig};
use meridian_shared::cache::{CacheProvider, MokaCache};
use meridian_shared::config::MeridianConfig;
use meridian_shared::manager_client::ManagerHttpClient;
use meridian_shared::messaging::{DefaultMessageRouter, MessageClient, MessageRouterKind, MessagingProvider};
use meridian_shared::resilience::CircuitBreaker;
use meridian_shared::schema::SchemaValidator;
use meridian_worker::{
    InitMode, NoopActivityHandler, ProcessorIdentity, ProcessorRuntime, ProcessorRuntimeConfig,
};
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

    let processor_name =
        std::env::var("MERIDIAN_PROCESSOR_NAME").unwrap_or_else(|_| "unnamed-processor".into());
    let processor_version =
        std::env::var("MERIDIAN_PROCESSOR_VERSION").unwrap_or_else(|_| "0.1.0".into());
    let implementation_hash = env!("MERIDIAN_IMPL_HASH").to_string();

    let runtime_config = ProcessorRuntimeConfig {
        identity: ProcessorIdentity {
            name: processor_name.clone(),
            version: processor_version.clone(),
            input_schema_id: None,
            output_schema_id: None,
            enable_input_validation: false,
            enable_output_validation: false,
            implementation_hash,
        },
        init_mode: InitMode::default(),
        worker_count: config.worker.worker_pool_size,
        queue_capacity: config.worker.queue_capacity,
    };

    let runtime = Arc::new(ProcessorRuntime::new(
        runtime_config,
        manager,
        message_client.clone(),
        router,
        cache.clone(),
        validator,
        Arc::new(NoopActivityHandler),
    ));

    info!(processor = %processor_name, version = %processor_version, "starting processor runtime");
    let initialized = runtime.start().await?;
    info!(processor_id = %initialized.processor_id, "processor initialized");

    let health_monitor = Arc::new(HealthMonitor::new(
        HealthMonitorConfig {
            check_interval: Duration::from_secs(config.health.check_interval_seconds),
            ttl: Duration::from_secs(config.health.ttl_seconds),
            reporting_pod_id: std::env::var("HOSTNAME").unwrap_or_else(|_| "local".into()),
            max_write_retries: 3,
            write_backoff_base: Duration::from_millis(100),
            map_name: meridian_shared::cache::map_names::PROCESSOR_HEALTH.to_string(),
        },
        runtime.health_source.clone(),
        cache,
    ));

    let health_token = CancellationToken::new();
    let health_runner = health_monitor.clone();
    let health_cancel = health_token.clone();
    let health_task = tokio::spawn(async move { health_runner.run(health_cancel).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    runtime.stop();
    health_token.cancel();
    let _ = health_task.await;

    Ok(())
}
