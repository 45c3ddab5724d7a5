//! Read-side of the shared health map: used by the orchestration start
//! gate (`spec.md` §4.8.1 step 9) and the processors-health projection
//! (`spec.md` §4.8.7). Readers treat absent, expired, unparsable, stale, or
//! non-Healthy entries as "not healthy".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use meridian_shared::cache::{map_names, Cache};
use meridian_shared::model::{ProcessorHealthEntry, ProcessorHealthStatus};
use uuid::Uuid;

/// `true` iff the entry exists, is unexpired, and `status == Healthy`
/// within `2 * healthCheckInterval` of `now` (`spec.md` glossary).
pub fn is_entry_fresh_and_healthy(entry: &ProcessorHealthEntry, now: DateTime<Utc>) -> bool {
    entry.is_fresh_and_healthy(now)
}

#[derive(Debug, Clone)]
pub struct ProcessorHealthProjection {
    pub per_processor: Vec<(Uuid, Option<ProcessorHealthStatus>)>,
    pub overall: ProcessorHealthStatus,
}

/// Reads `ProcessorHealthEntry` records from the shared cache map.
#[derive(Debug, Clone)]
pub struct HealthReader {
    cache: Arc<dyn Cache>,
    map_name: String,
}

impl HealthReader {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            map_name: map_names::PROCESSOR_HEALTH.to_string(),
        }
    }

    pub fn with_map_name(cache: Arc<dyn Cache>, map_name: impl Into<String>) -> Self {
        Self {
            cache,
            map_name: map_name.into(),
        }
    }

    /// `None` if the entry is absent, unparsable, expired, or stale — the
    /// orchestration start gate treats `None` as "not healthy" regardless
    /// of cause (`spec.md` §4.6 reader rules).
    pub async fn read_fresh(&self, processor_id: Uuid) -> Option<ProcessorHealthEntry> {
        let raw = self
            .cache
            .get(&self.map_name, &processor_id.to_string())
            .await
            .ok()??;
        let entry: ProcessorHealthEntry = serde_json::from_str(&raw).ok()?;
        if is_entry_fresh_and_healthy(&entry, Utc::now()) {
            Some(entry)
        } else {
            None
        }
    }

    /// All referenced processors are healthy, for the start gate: returns
    /// the processor ids that are NOT fresh-and-healthy.
    pub async fn unhealthy_among(&self, processor_ids: &[Uuid]) -> Vec<Uuid> {
        let mut unhealthy = Vec::new();
        for &processor_id in processor_ids {
            if self.read_fresh(processor_id).await.is_none() {
                unhealthy.push(processor_id);
            }
        }
        unhealthy
    }

    /// `spec.md` §4.8.7: per-processor status plus an aggregate — Unhealthy
    /// if any unhealthy or no-data, Degraded if any degraded, else Healthy.
    pub async fn project(&self, processor_ids: &[Uuid]) -> ProcessorHealthProjection {
        let mut per_processor = Vec::with_capacity(processor_ids.len());
        let mut any_unhealthy_or_missing = false;
        let mut any_degraded = false;

        for &processor_id in processor_ids {
            let raw = self
                .cache
                .get(&self.map_name, &processor_id.to_string())
                .await
                .ok()
                .flatten();
            let status = raw
                .as_deref()
                .and_then(|raw| serde_json::from_str::<ProcessorHealthEntry>(raw).ok())
                .map(|entry| entry.status);

            match status {
                None => any_unhealthy_or_missing = true,
                Some(ProcessorHealthStatus::Unhealthy) => any_unhealthy_or_missing = true,
                Some(ProcessorHealthStatus::Degraded) => any_degraded = true,
                Some(ProcessorHealthStatus::Healthy) => {}
            }
            per_processor.push((processor_id, status));
        }

        let overall = if any_unhealthy_or_missing {
            ProcessorHealthStatus::Unhealthy
        } else if any_degraded {
            ProcessorHealthStatus::Degraded
        } else {
            ProcessorHealthStatus::Healthy
        };

        ProcessorHealthProjection {
            per_processor,
            overall,
        }
    }
}
