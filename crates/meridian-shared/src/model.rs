//! Domain entities shared across every component, wire-encoded as
//! `camelCase` JSON matching this workspace's convention throughout.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An instance binding a workflow graph to assignments and scheduling.
///
/// Immutable once started; `cron_expression` must be a valid cron
/// expression if `is_schedule_enabled` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratedFlow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub assignment_ids: Vec<Uuid>,
    pub cron_expression: Option<String>,
    pub is_schedule_enabled: bool,
    pub is_one_time_execution: bool,
}

/// A node in the workflow graph.
///
/// A step with empty `next_step_ids` is a termination point; a step whose
/// id never appears in any `next_step_ids` is an entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: Uuid,
    pub processor_id: Uuid,
    pub next_step_ids: Vec<Uuid>,
}

impl Step {
    pub fn is_termination_point(&self) -> bool {
        self.next_step_ids.is_empty()
    }
}

/// Fields common to every assignment variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentCommon {
    pub entity_id: Uuid,
    pub step_id: Uuid,
    pub name: String,
    pub version: String,
    pub schema_id: Option<Uuid>,
    pub payload: String,
}

/// Per-step input/output configuration, tagged on the wire by
/// `assignmentType`. `PluginAssignment` additionally overrides the
/// processor's own schemas for the step it is attached to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "assignmentType", rename_all = "camelCase")]
pub enum Assignment {
    AddressAssignment {
        #[serde(flatten)]
        common: AssignmentCommon,
    },
    DeliveryAssignment {
        #[serde(flatten)]
        common: AssignmentCommon,
    },
    PluginAssignment {
        #[serde(flatten)]
        common: AssignmentCommon,
        input_schema_definition: Option<String>,
        output_schema_definition: Option<String>,
        enable_input_validation: bool,
        enable_output_validation: bool,
    },
}

impl Assignment {
    pub fn common(&self) -> &AssignmentCommon {
        match self {
            Assignment::AddressAssignment { common }
            | Assignment::DeliveryAssignment { common }
            | Assignment::PluginAssignment { common, .. } => common,
        }
    }

    pub fn step_id(&self) -> Uuid {
        self.common().step_id
    }

    /// Schema-validation override for this step, if this is a plugin
    /// assignment with its own schema pair (`spec.md` §4.7.3 step 1).
    pub fn plugin_schema_override(&self) -> Option<PluginSchemaOverride<'_>> {
        match self {
            Assignment::PluginAssignment {
                input_schema_definition,
                output_schema_definition,
                enable_input_validation,
                enable_output_validation,
                ..
            } => Some(PluginSchemaOverride {
                input_schema_definition: input_schema_definition.as_deref(),
                output_schema_definition: output_schema_definition.as_deref(),
                enable_input_validation: *enable_input_validation,
                enable_output_validation: *enable_output_validation,
            }),
            _ => None,
        }
    }
}

/// Borrowed view of the schema-validation parameters a plugin assignment
/// contributes for its step, overriding the processor's own configuration.
#[derive(Debug, Clone, Copy)]
pub struct PluginSchemaOverride<'a> {
    pub input_schema_definition: Option<&'a str>,
    pub output_schema_definition: Option<&'a str>,
    pub enable_input_validation: bool,
    pub enable_output_validation: bool,
}

/// A worker service identified by `(version, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Processor {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub input_schema_id: Option<Uuid>,
    pub output_schema_id: Option<Uuid>,
    pub implementation_hash: String,
}

impl Processor {
    /// `version + "_" + name`, the natural unique identifier.
    pub fn composite_key(&self) -> String {
        composite_key(&self.version, &self.name)
    }
}

/// A named, versioned JSON Schema document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: Uuid,
    pub version: String,
    pub name: String,
    pub definition: String,
}

impl Schema {
    pub fn composite_key(&self) -> String {
        composite_key(&self.version, &self.name)
    }
}

/// `version + "_" + name`, shared by `Processor` and `Schema`.
pub fn composite_key(version: &str, name: &str) -> String {
    format!("{version}_{name}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "camelCase")]
pub enum ProcessorHealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Cache-resident health record published by the processor-health monitor
/// (C6) and read by the orchestration start gate (C8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorHealthEntry {
    pub processor_id: Uuid,
    pub status: ProcessorHealthStatus,
    pub message: String,
    pub last_updated_unix_seconds: i64,
    pub health_check_interval_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub reporting_pod_id: String,
    pub correlation_id: Uuid,
    pub health_check_id: Uuid,
    pub uptime_seconds: i64,
    pub metadata: HashMap<String, String>,
    pub performance_metrics: HashMap<String, f64>,
    pub health_checks: HashMap<String, bool>,
}

impl ProcessorHealthEntry {
    /// "entry exists and not expired and `now - lastUpdated ≤ 2 ×
    /// healthCheckInterval` and `status = Healthy`" (`spec.md` glossary).
    pub fn is_fresh_and_healthy(&self, now: DateTime<Utc>) -> bool {
        if now >= self.expires_at {
            return false;
        }
        if self.status != ProcessorHealthStatus::Healthy {
            return false;
        }
        let age_seconds = now.timestamp() - self.last_updated_unix_seconds;
        age_seconds <= 2 * self.health_check_interval_seconds
    }
}

/// Materialized state for one active orchestrated flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationCacheEntry {
    pub flow_id: Uuid,
    pub correlation_id: Uuid,
    pub orchestrated_flow: OrchestratedFlow,
    pub steps: Vec<Step>,
    pub processor_ids: Vec<Uuid>,
    pub assignments_by_step_id: HashMap<Uuid, Vec<Assignment>>,
    pub entry_points: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// `ExecuteActivityCommand` on the bus (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMessage {
    pub orchestrated_flow_id: Uuid,
    pub workflow_id: Uuid,
    pub correlation_id: Uuid,
    pub step_id: Uuid,
    pub processor_id: Uuid,
    pub publish_id: Uuid,
    /// Empty (`None`) is the entry-point sentinel: bypass input cache
    /// lookup and input validation (`spec.md` §4.7.3 step 2).
    pub execution_id: Option<Uuid>,
    pub entities: Vec<Assignment>,
}

impl ActivityMessage {
    /// The six-GUID activity cache key:
    /// `processorId:flowId:correlationId:executionId:stepId:publishId`.
    pub fn activity_cache_key(&self, execution_id: Uuid) -> String {
        activity_cache_key(
            self.processor_id,
            self.orchestrated_flow_id,
            self.correlation_id,
            execution_id,
            self.step_id,
            self.publish_id,
        )
    }
}

/// Builds the six-GUID, colon-joined activity cache key (`spec.md` §3/§6).
pub fn activity_cache_key(
    processor_id: Uuid,
    flow_id: Uuid,
    correlation_id: Uuid,
    execution_id: Uuid,
    step_id: Uuid,
    publish_id: Uuid,
) -> String {
    format!(
        "{processor_id}:{flow_id}:{correlation_id}:{execution_id}:{step_id}:{publish_id}"
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "camelCase")]
pub enum ActivityStatus {
    Completed,
    Failed,
}

/// `ActivityExecutedEvent` / `ActivityFailedEvent` on the bus, unified into
/// one tagged type; `status` distinguishes the two wire shapes from
/// `spec.md` §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub processor_id: Uuid,
    pub orchestrated_flow_id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub correlation_id: Uuid,
    pub publish_id: Uuid,
    pub duration_millis: u64,
    pub status: ActivityStatus,
    pub entities_processed: u32,
    pub result_data_size: u64,
    pub error_message: Option<String>,
    pub exception_type: Option<String>,
    pub stack_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_assignment_common(step_id: Uuid) -> AssignmentCommon {
        AssignmentCommon {
            entity_id: Uuid::new_v4(),
            step_id,
            name: "ship".to_string(),
            version: "v1".to_string(),
            schema_id: None,
            payload: "{}".to_string(),
        }
    }

    #[test]
    fn composite_key_joins_version_and_name() {
        assert_eq!(composite_key("v2", "shipper"), "v2_shipper");
    }

    #[test]
    fn step_with_no_successors_is_termination_point() {
        let step = Step {
            id: Uuid::new_v4(),
            processor_id: Uuid::new_v4(),
            next_step_ids: vec![],
        };
        assert!(step.is_termination_point());
    }

    #[test]
    fn step_with_successors_is_not_termination_point() {
        let step = Step {
            id: Uuid::new_v4(),
            processor_id: Uuid::new_v4(),
            next_step_ids: vec![Uuid::new_v4()],
        };
        assert!(!step.is_termination_point());
    }

    #[test]
    fn plugin_assignment_overrides_schema_for_its_step_only() {
        let step_id = Uuid::new_v4();
        let assignment = Assignment::PluginAssignment {
            common: sample_assignment_common(step_id),
            input_schema_definition: Some("{\"type\":\"object\"}".to_string()),
            output_schema_definition: None,
            enable_input_validation: true,
            enable_output_validation: false,
        };

        let over = assignment.plugin_schema_override().unwrap();
        assert!(over.enable_input_validation);
        assert!(!over.enable_output_validation);
        assert_eq!(assignment.step_id(), step_id);
    }

    #[test]
    fn non_plugin_assignment_has_no_schema_override() {
        let assignment = Assignment::AddressAssignment {
            common: sample_assignment_common(Uuid::new_v4()),
        };
        assert!(assignment.plugin_schema_override().is_none());
    }

    #[test]
    fn health_entry_fresh_within_two_intervals() {
        let now = Utc::now();
        let entry = ProcessorHealthEntry {
            processor_id: Uuid::new_v4(),
            status: ProcessorHealthStatus::Healthy,
            message: "ok".to_string(),
            last_updated_unix_seconds: now.timestamp() - 10,
            health_check_interval_seconds: 10,
            expires_at: now + chrono::Duration::seconds(60),
            reporting_pod_id: "pod-1".to_string(),
            correlation_id: Uuid::new_v4(),
            health_check_id: Uuid::new_v4(),
            uptime_seconds: 100,
            metadata: HashMap::new(),
            performance_metrics: HashMap::new(),
            health_checks: HashMap::new(),
        };
        assert!(entry.is_fresh_and_healthy(now));
    }

    #[test]
    fn health_entry_stale_beyond_two_intervals() {
        let now = Utc::now();
        let entry = ProcessorHealthEntry {
            processor_id: Uuid::new_v4(),
            status: ProcessorHealthStatus::Healthy,
            message: "ok".to_string(),
            last_updated_unix_seconds: now.timestamp() - 25,
            health_check_interval_seconds: 10,
            expires_at: now + chrono::Duration::seconds(60),
            reporting_pod_id: "pod-1".to_string(),
            correlation_id: Uuid::new_v4(),
            health_check_id: Uuid::new_v4(),
            uptime_seconds: 100,
            metadata: HashMap::new(),
            performance_metrics: HashMap::new(),
            health_checks: HashMap::new(),
        };
        assert!(!entry.is_fresh_and_healthy(now));
    }

    #[test]
    fn health_entry_not_fresh_if_status_not_healthy() {
        let now = Utc::now();
        let entry = ProcessorHealthEntry {
            processor_id: Uuid::new_v4(),
            status: ProcessorHealthStatus::Degraded,
            message: "degraded".to_string(),
            last_updated_unix_seconds: now.timestamp(),
            health_check_interval_seconds: 10,
            expires_at: now + chrono::Duration::seconds(60),
            reporting_pod_id: "pod-1".to_string(),
            correlation_id: Uuid::new_v4(),
            health_check_id: Uuid::new_v4(),
            uptime_seconds: 100,
            metadata: HashMap::new(),
            performance_metrics: HashMap::new(),
            health_checks: HashMap::new(),
        };
        assert!(!entry.is_fresh_and_healthy(now));
    }

    #[test]
    fn activity_cache_key_joins_six_guids_with_colons() {
        let (p, f, c, e, s, pub_id) = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let key = activity_cache_key(p, f, c, e, s, pub_id);
        assert_eq!(key.matches(':').count(), 5);
        assert!(key.starts_with(&p.to_string()));
    }

    #[test]
    fn activity_message_serializes_camel_case() {
        let msg = ActivityMessage {
            orchestrated_flow_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            processor_id: Uuid::new_v4(),
            publish_id: Uuid::new_v4(),
            execution_id: None,
            entities: vec![],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("orchestratedFlowId"));
        assert!(json.contains("executionId"));
    }
}
