//! Seam implemented by the owning processor runtime (`meridian-worker`):
//! the health monitor queries it each tick rather than owning the checks
//! itself.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

/// One tick's worth of raw health data, before `HealthMonitor` wraps it in
/// a `ProcessorHealthEntry` (`spec.md` §4.6 step 2-3).
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    /// `None` while the processor is still completing its init handshake
    /// (`spec.md` §4.7.1) — cache publication is skipped for this tick.
    pub processor_id: Option<Uuid>,
    /// Named sub-checks: input-schema health, output-schema health,
    /// schema-id match, implementation-hash match, cache health, bus
    /// health, initialization status (`spec.md` §4.7.5).
    pub checks: HashMap<String, bool>,
    pub performance_metrics: HashMap<String, f64>,
    pub metadata: HashMap<String, String>,
    pub uptime_seconds: i64,
}

#[async_trait]
pub trait HealthSource: Send + Sync + std::fmt::Debug {
    async fn snapshot(&self) -> HealthSnapshot;
}
