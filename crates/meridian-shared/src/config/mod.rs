//! Configuration types loaded from TOML plus environment overrides
//! (`MERIDIAN__<SECTION>__<KEY>`), mirroring this workspace's layered
//! `config`-crate convention. Every section derives `Default` so unit
//! tests never need a file on disk.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MeridianResult;
use crate::manager_client::RetryPolicy;
use crate::resilience::CircuitBreakerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// "moka" or "redis".
    pub provider: String,
    pub redis_url: Option<String>,
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: "moka".to_string(),
            redis_url: None,
            default_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingConfig {
    /// "in_memory" or "lapin".
    pub provider: String,
    pub amqp_url: Option<String>,
    pub processor_queue_prefix: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            provider: "in_memory".to_string(),
            amqp_url: None,
            processor_queue_prefix: "processor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerClientConfig {
    pub base_url: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for ManagerClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl ManagerClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

impl From<CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig {
            failure_threshold: settings.failure_threshold,
            timeout: Duration::from_secs(settings.timeout_seconds),
            success_threshold: settings.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub check_interval_seconds: u64,
    pub ttl_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 10,
            ttl_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub worker_pool_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            worker_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub cycle_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 500,
        }
    }
}

/// Aggregated configuration for the full workspace; each component crate
/// reads the section it owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeridianConfig {
    pub cache: CacheConfig,
    pub messaging: MessagingConfig,
    pub manager_client: ManagerClientConfig,
    pub health: HealthConfig,
    pub worker: WorkerConfig,
    pub orchestrator: OrchestratorConfig,
}

impl MeridianConfig {
    /// Loads layered configuration: optional `config/meridian.toml` (or
    /// the path in `MERIDIAN_CONFIG_PATH`), overridden by
    /// `MERIDIAN__<SECTION>__<KEY>` environment variables, falling back to
    /// `Default` for anything unset.
    pub fn load() -> MeridianResult<Self> {
        let config_path = std::env::var("MERIDIAN_CONFIG_PATH")
            .unwrap_or_else(|_| "config/meridian.toml".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("MERIDIAN")
                    .separator("__")
                    .try_parsing(true),
            );

        let loaded = builder
            .build()
            .map_err(|e| crate::error::MeridianError::config(e.to_string()))?;

        loaded
            .try_deserialize()
            .map_err(|e| crate::error::MeridianError::config(e.to_string()))
    }
}
