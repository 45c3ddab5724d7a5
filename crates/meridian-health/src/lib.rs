//! Processor-health monitor (C6): per-pod periodic sampling with
//! last-writer-wins publication to a shared cache map.

mod reader;
mod source;

pub use reader::{is_entry_fresh_and_healthy, HealthReader, ProcessorHealthProjection};
pub use source::{HealthSnapshot, HealthSource};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meridian_shared::cache::{map_names, Cache, CacheError};
use meridian_shared::model::{ProcessorHealthEntry, ProcessorHealthStatus};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    skipped_due_to_init: AtomicU64,
    stored_in_cache: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCountersSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped_due_to_init: u64,
    pub stored_in_cache: u64,
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub ttl: Duration,
    pub reporting_pod_id: String,
    pub max_write_retries: u32,
    pub write_backoff_base: Duration,
    pub map_name: String,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            ttl: Duration::from_secs(30),
            reporting_pod_id: "local".to_string(),
            max_write_retries: 3,
            write_backoff_base: Duration::from_millis(50),
            map_name: map_names::PROCESSOR_HEALTH.to_string(),
        }
    }
}

/// Background loop at a configured interval; a `tokio::sync::Mutex` local
/// to the pod prevents overlapping ticks (`spec.md` §4.6).
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    source: Arc<dyn HealthSource>,
    cache: Arc<dyn Cache>,
    tick_guard: AsyncMutex<()>,
    start_time_keys: AsyncMutex<HashSet<Uuid>>,
    counters: Counters,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        source: Arc<dyn HealthSource>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            config,
            source,
            cache,
            tick_guard: AsyncMutex::new(()),
            start_time_keys: AsyncMutex::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> HealthCountersSnapshot {
        HealthCountersSnapshot {
            total: self.counters.total.load(Ordering::SeqCst),
            successful: self.counters.successful.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            skipped_due_to_init: self.counters.skipped_due_to_init.load(Ordering::SeqCst),
            stored_in_cache: self.counters.stored_in_cache.load(Ordering::SeqCst),
        }
    }

    /// Runs one health-check tick. Returns `Ok(false)` (skipped) if another
    /// tick is already in flight for this pod.
    pub async fn tick(&self) -> Result<bool, HealthError> {
        let guard = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("health monitor tick skipped: previous tick still in flight");
                return Ok(false);
            }
        };

        self.counters.total.fetch_add(1, Ordering::SeqCst);
        let correlation_id = Uuid::new_v4();
        let snapshot = self.source.snapshot().await;

        let overall_status = if snapshot.checks.values().all(|&healthy| healthy) {
            ProcessorHealthStatus::Healthy
        } else {
            ProcessorHealthStatus::Unhealthy
        };
        let failing: Vec<&str> = snapshot
            .checks
            .iter()
            .filter(|(_, &healthy)| !healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        let message = if failing.is_empty() {
            "all health checks passing".to_string()
        } else {
            format!("failing checks: {}", failing.join(", "))
        };

        let Some(processor_id) = snapshot.processor_id else {
            self.counters.skipped_due_to_init.fetch_add(1, Ordering::SeqCst);
            info!(%correlation_id, "health tick: processor not yet initialized, metrics only");
            drop(guard);
            return Ok(true);
        };

        self.record_start_once(processor_id).await;

        let now = Utc::now();
        let entry = ProcessorHealthEntry {
            processor_id,
            status: overall_status,
            message,
            last_updated_unix_seconds: now.timestamp(),
            health_check_interval_seconds: self.config.check_interval.as_secs() as i64,
            expires_at: now + chrono::Duration::from_std(self.config.ttl).unwrap_or_default(),
            reporting_pod_id: self.config.reporting_pod_id.clone(),
            correlation_id,
            health_check_id: Uuid::new_v4(),
            uptime_seconds: snapshot.uptime_seconds,
            metadata: snapshot.metadata.clone(),
            performance_metrics: snapshot.performance_metrics.clone(),
            health_checks: snapshot.checks.clone(),
        };

        match self.write_with_retry(&entry).await {
            Ok(()) => {
                self.counters.successful.fetch_add(1, Ordering::SeqCst);
                self.counters.stored_in_cache.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(%processor_id, error = %err, "health entry write exhausted retries");
                drop(guard);
                return Err(err);
            }
        }

        drop(guard);
        Ok(true)
    }

    async fn record_start_once(&self, processor_id: Uuid) {
        let mut keys = self.start_time_keys.lock().await;
        if keys.insert(processor_id) {
            info!(%processor_id, "processor started");
        }
    }

    async fn write_with_retry(&self, entry: &ProcessorHealthEntry) -> Result<(), HealthError> {
        let serialized = serde_json::to_string(entry)?;
        let key = entry.processor_id.to_string();

        let mut attempt = 0;
        loop {
            match self
                .cache
                .set_with_ttl(&self.config.map_name, &key, serialized.clone(), self.config.ttl)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_write_retries {
                        return Err(HealthError::Cache(err));
                    }
                    let backoff = self.config.write_backoff_base * attempt;
                    warn!(attempt, error = %err, "retrying health entry write");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Runs `tick` on `config.check_interval` until `cancellation_token` is
    /// cancelled.
    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("health monitor stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "health monitor tick failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::cache::MokaCache;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct FixedSource {
        processor_id: Option<Uuid>,
        all_healthy: bool,
    }

    #[async_trait::async_trait]
    impl HealthSource for FixedSource {
        async fn snapshot(&self) -> HealthSnapshot {
            let mut checks = HashMap::new();
            checks.insert("cache".to_string(), self.all_healthy);
            checks.insert("bus".to_string(), self.all_healthy);
            HealthSnapshot {
                processor_id: self.processor_id,
                checks,
                performance_metrics: HashMap::new(),
                metadata: HashMap::new(),
                uptime_seconds: 42,
            }
        }
    }

    fn cache() -> Arc<dyn Cache> {
        Arc::new(MokaCache::new())
    }

    #[tokio::test]
    async fn tick_skips_cache_publication_while_uninitialized() {
        let source = Arc::new(FixedSource {
            processor_id: None,
            all_healthy: true,
        });
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), source, cache());
        let ran = monitor.tick().await.unwrap();
        assert!(ran);
        assert_eq!(monitor.counters().skipped_due_to_init, 1);
        assert_eq!(monitor.counters().stored_in_cache, 0);
    }

    #[tokio::test]
    async fn tick_publishes_entry_once_processor_id_known() {
        let processor_id = Uuid::new_v4();
        let source = Arc::new(FixedSource {
            processor_id: Some(processor_id),
            all_healthy: true,
        });
        let cache = cache();
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), source, cache.clone());
        monitor.tick().await.unwrap();

        assert_eq!(monitor.counters().stored_in_cache, 1);
        let stored = cache
            .get(map_names::PROCESSOR_HEALTH, &processor_id.to_string())
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn tick_records_unhealthy_status_when_a_check_fails() {
        let processor_id = Uuid::new_v4();
        let source = Arc::new(FixedSource {
            processor_id: Some(processor_id),
            all_healthy: false,
        });
        let cache = cache();
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), source, cache.clone());
        monitor.tick().await.unwrap();

        let stored = cache
            .get(map_names::PROCESSOR_HEALTH, &processor_id.to_string())
            .await
            .unwrap()
            .unwrap();
        let entry: ProcessorHealthEntry = serde_json::from_str(&stored).unwrap();
        assert_eq!(entry.status, ProcessorHealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn start_time_key_recorded_once_per_processor() {
        let processor_id = Uuid::new_v4();
        let source = Arc::new(FixedSource {
            processor_id: Some(processor_id),
            all_healthy: true,
        });
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), source, cache());
        monitor.tick().await.unwrap();
        monitor.tick().await.unwrap();

        let keys = monitor.start_time_keys.lock().await;
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_tick_is_skipped_while_one_in_flight() {
        let processor_id = Uuid::new_v4();
        let source = Arc::new(FixedSource {
            processor_id: Some(processor_id),
            all_healthy: true,
        });
        let monitor = Arc::new(HealthMonitor::new(HealthMonitorConfig::default(), source, cache()));

        let guard = monitor.tick_guard.lock().await;
        let ran = monitor.tick().await.unwrap();
        assert!(!ran);
        drop(guard);
    }
}
