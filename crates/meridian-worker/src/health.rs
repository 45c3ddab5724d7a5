//! Aggregates the runtime's own sub-checks into one `HealthSnapshot`
//! (`spec.md` §4.7.5): initialization status, cache/bus reachability, and
//! the `HealthFlags` already tracked by the init handshake.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use meridian_health::HealthSnapshot;
use meridian_shared::cache::Cache;
use meridian_shared::messaging::MessageClient;
use uuid::Uuid;

use crate::init::HealthFlags;

/// Implements `meridian_health::HealthSource` for the worker's own
/// processor runtime: one tick queries cache/bus reachability directly
/// and combines it with the init handshake's cached flags.
#[derive(Debug)]
pub struct RuntimeHealthSource {
    processor_id: Mutex<Option<Uuid>>,
    flags: std::sync::Arc<Mutex<HealthFlags>>,
    cache: std::sync::Arc<dyn Cache>,
    message_client: std::sync::Arc<MessageClient>,
    started_at: Instant,
}

impl RuntimeHealthSource {
    pub fn new(
        flags: std::sync::Arc<Mutex<HealthFlags>>,
        cache: std::sync::Arc<dyn Cache>,
        message_client: std::sync::Arc<MessageClient>,
    ) -> Self {
        Self {
            processor_id: Mutex::new(None),
            flags,
            cache,
            message_client,
            started_at: Instant::now(),
        }
    }

    pub fn set_processor_id(&self, processor_id: Uuid) {
        *self.processor_id.lock().unwrap() = Some(processor_id);
    }
}

#[async_trait]
impl meridian_health::HealthSource for RuntimeHealthSource {
    async fn snapshot(&self) -> HealthSnapshot {
        let processor_id = *self.processor_id.lock().unwrap();
        let flags = self.flags.lock().unwrap().clone();

        let cache_healthy = self.cache.is_healthy().await;
        let bus_healthy = self.message_client.health_check().await.unwrap_or(false);

        let mut checks = HashMap::new();
        checks.insert("inputSchemaHealthy".to_string(), flags.input_schema_healthy);
        checks.insert("outputSchemaHealthy".to_string(), flags.output_schema_healthy);
        checks.insert("schemaIdsValid".to_string(), flags.schema_ids_valid);
        checks.insert(
            "implementationHashValid".to_string(),
            flags.implementation_hash_valid,
        );
        checks.insert("initialized".to_string(), flags.is_initialized);
        checks.insert("cacheReachable".to_string(), cache_healthy);
        checks.insert("busReachable".to_string(), bus_healthy);

        let mut metadata = HashMap::new();
        if flags.is_initializing {
            metadata.insert("initializing".to_string(), "true".to_string());
        }
        if !checks.values().all(|v| *v) {
            let failing: Vec<&str> = checks
                .iter()
                .filter(|(_, healthy)| !**healthy)
                .map(|(name, _)| name.as_str())
                .collect();
            metadata.insert("failingChecks".to_string(), failing.join(","));
        }

        HealthSnapshot {
            processor_id,
            checks,
            performance_metrics: HashMap::new(),
            metadata,
            uptime_seconds: self.started_at.elapsed().as_secs() as i64,
        }
    }
}
