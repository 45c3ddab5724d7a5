//! Orchestration service (C8): `spec.md` §4.8 start/stop/status/health
//! implemented literally, including the duplicate-target cycle criterion
//! of §4.8.4 (see `crate::graph` — deliberately not Tarjan's SCC).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_cron::{CronError, CronRegistry, RearmHandler};
use meridian_health::HealthReader;
use meridian_shared::cache::{map_names, Cache};
use meridian_shared::context::OperationContext;
use meridian_shared::manager_client::ManagerHttpClient;
use meridian_shared::messaging::{MessageClient, MessageRouterKind};
use meridian_shared::model::{
    ActivityEvent, ActivityMessage, ActivityStatus, Assignment, OrchestrationCacheEntry,
    OrchestratedFlow, ProcessorHealthStatus, Step,
};
use meridian_shared::schema::SchemaValidator;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::graph::{entry_points, termination_points, validate_no_circular_reference};

const DEFAULT_CACHE_ENTRY_TTL_SECONDS: i64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct FlowStatus {
    pub flow_id: Uuid,
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub step_count: usize,
    pub assignment_count: usize,
}

impl FlowStatus {
    fn inactive(flow_id: Uuid) -> Self {
        Self {
            flow_id,
            is_active: false,
            started_at: None,
            expires_at: None,
            step_count: 0,
            assignment_count: 0,
        }
    }
}

/// Result of a successful `Start`: the written cache entry plus the
/// correlation id all of the initial dispatch used, for callers that want
/// to log/trace it.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub cache_entry: OrchestrationCacheEntry,
    pub correlation_id: Uuid,
}

pub struct OrchestrationService {
    manager: Arc<ManagerHttpClient>,
    message_client: Arc<MessageClient>,
    router: MessageRouterKind,
    cache: Arc<dyn Cache>,
    validator: Arc<SchemaValidator>,
    health_reader: HealthReader,
    cron: CronRegistry,
}

impl std::fmt::Debug for OrchestrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationService").finish()
    }
}

/// Bridges `CronRegistry`'s fire callback back into `OrchestrationService`
/// without a reference cycle: the registry outlives no service instance,
/// so a `Weak` is safe to upgrade on every fire.
#[derive(Debug)]
struct CronRearm {
    service: Weak<OrchestrationService>,
}

#[async_trait]
impl RearmHandler for CronRearm {
    async fn rearm(&self, flow_id: Uuid, correlation_id: Uuid) -> Result<(), CronError> {
        let Some(service) = self.service.upgrade() else {
            return Err(CronError::RearmFailed("service dropped".to_string()));
        };
        // A cron fire always starts a fresh cycle: tear down any stale
        // cache entry from the previous cycle first so `start` doesn't
        // idempotently no-op against it.
        let _ = service.stop_internal(flow_id).await;
        service
            .start_with_correlation_id(flow_id, Some(correlation_id))
            .await
            .map(|_| ())
            .map_err(|e| CronError::RearmFailed(e.to_string()))
    }
}

impl OrchestrationService {
    pub fn new(
        manager: Arc<ManagerHttpClient>,
        message_client: Arc<MessageClient>,
        router: MessageRouterKind,
        cache: Arc<dyn Cache>,
        validator: Arc<SchemaValidator>,
    ) -> Arc<Self> {
        let health_reader = HealthReader::new(cache.clone());
        Arc::new_cyclic(|weak| {
            let cron = CronRegistry::new(Arc::new(CronRearm {
                service: weak.clone(),
            }));
            Self {
                manager,
                message_client,
                router,
                cache,
                validator,
                health_reader,
                cron,
            }
        })
    }

    pub async fn start(self: &Arc<Self>, flow_id: Uuid) -> Result<StartOutcome, OrchestrationError> {
        self.start_with_correlation_id(flow_id, None).await
    }

    async fn start_with_correlation_id(
        self: &Arc<Self>,
        flow_id: Uuid,
        correlation_id: Option<Uuid>,
    ) -> Result<StartOutcome, OrchestrationError> {
        // Precondition: idempotent no-op if already active.
        if let Some(entry) = self.load_cache_entry(flow_id).await? {
            info!(%flow_id, "start is idempotent no-op: cache entry already present");
            return Ok(StartOutcome {
                correlation_id: entry.correlation_id,
                cache_entry: entry,
            });
        }

        match self.start_inner(flow_id, correlation_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(cleanup_err) = self.stop_internal(flow_id).await {
                    warn!(%flow_id, error = %cleanup_err, "best-effort cleanup after failed start also failed");
                }
                Err(err)
            }
        }
    }

    async fn start_inner(
        self: &Arc<Self>,
        flow_id: Uuid,
        correlation_id: Option<Uuid>,
    ) -> Result<StartOutcome, OrchestrationError> {
        let correlation_id = correlation_id.unwrap_or_else(Uuid::new_v4);

        // Step 2: fetch orchestrated flow.
        let orchestrated_flow = self.fetch_flow(flow_id).await?;

        // Step 3: fan out step navigation + assignments.
        let (steps, assignments) = tokio::try_join!(
            async { self.manager.get_step_navigation(flow_id).await.map_err(OrchestrationError::from) },
            async { self.manager.get_assignments_by_flow(flow_id).await.map_err(OrchestrationError::from) },
        )?;

        let assignments_by_step_id = group_assignments_by_step(assignments);

        // Step 4: validate every assignment payload against its schema.
        self.validate_assignment_payloads(&assignments_by_step_id).await?;

        // Step 5: entry points.
        let entries = entry_points(&steps);
        if entries.is_empty() {
            return Err(OrchestrationError::rejected(
                "entry points",
                "No entry points found in workflow",
            ));
        }

        // Step 6: termination points.
        let terminations = termination_points(&steps);
        if terminations.is_empty() {
            return Err(OrchestrationError::rejected(
                "termination points",
                "No termination points found in workflow",
            ));
        }

        // Step 7: cycle validation (literal duplicate-target rule).
        if let Err(offending) = validate_no_circular_reference(&steps, &terminations) {
            let detail = offending
                .iter()
                .map(|d| format!("{} (x{})", d.step_id, d.occurrence_count))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(OrchestrationError::rejected(
                "circular reference",
                format!("Circular workflow detected: {detail}"),
            ));
        }

        let processor_ids: Vec<Uuid> = steps.iter().map(|s| s.processor_id).collect();

        // Step 8: build and write the orchestration cache entry.
        let now = Utc::now();
        let cache_entry = OrchestrationCacheEntry {
            flow_id,
            correlation_id,
            orchestrated_flow: orchestrated_flow.clone(),
            steps: steps.clone(),
            processor_ids: processor_ids.clone(),
            assignments_by_step_id: assignments_by_step_id.clone(),
            entry_points: entries.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(DEFAULT_CACHE_ENTRY_TTL_SECONDS),
        };
        self.write_cache_entry(&cache_entry).await?;

        // Step 9: health gate.
        let unhealthy = self.health_reader.unhealthy_among(&processor_ids).await;
        if !unhealthy.is_empty() {
            let detail = unhealthy
                .iter()
                .map(|id| format!("{id}: not fresh/healthy"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(OrchestrationError::rejected(
                "processor health",
                format!("Unhealthy processors: {detail}"),
            ));
        }

        // Dispatch the initial activity commands for every entry point.
        for entry_id in &entries {
            if let Some(step) = steps.iter().find(|s| &s.id == entry_id) {
                self.dispatch_step(&orchestrated_flow, step, &assignments_by_step_id, correlation_id, None)
                    .await?;
            }
        }

        // Step 10: cron arm, non-fatal on failure.
        if let Some(expression) = orchestrated_flow.cron_expression.as_deref() {
            if orchestrated_flow.is_schedule_enabled && self.cron.validate(expression).is_ok() {
                match self.cron.start(
                    flow_id,
                    expression,
                    correlation_id,
                    orchestrated_flow.is_one_time_execution,
                ) {
                    Ok(()) => {
                        if let Some(next_fire) = self.cron.next_fire_time(flow_id) {
                            info!(%flow_id, %next_fire, "cron armed");
                        }
                    }
                    Err(err) => {
                        warn!(%flow_id, error = %err, "cron arming failed, flow can still be invoked manually");
                    }
                }
            }
        }

        Ok(StartOutcome {
            cache_entry,
            correlation_id,
        })
    }

    async fn validate_assignment_payloads(
        &self,
        assignments_by_step_id: &HashMap<Uuid, Vec<Assignment>>,
    ) -> Result<(), OrchestrationError> {
        for assignments in assignments_by_step_id.values() {
            for assignment in assignments {
                let Some(schema_id) = assignment.common().schema_id else {
                    continue;
                };
                let schema = self.manager.get_schema_by_id(schema_id).await?;
                let outcome = self
                    .validator
                    .validate(&assignment.common().payload, &schema.definition)?;
                if !outcome.valid {
                    return Err(OrchestrationError::rejected(
                        "schema validation",
                        format!(
                            "assignment {} failed schema {}: {:?}",
                            assignment.common().entity_id,
                            schema_id,
                            outcome.first_error_path
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn dispatch_step(
        &self,
        orchestrated_flow: &OrchestratedFlow,
        step: &Step,
        assignments_by_step_id: &HashMap<Uuid, Vec<Assignment>>,
        correlation_id: Uuid,
        execution_id: Option<Uuid>,
    ) -> Result<(), OrchestrationError> {
        let processor = self.manager.get_processor_by_id(step.processor_id).await?;
        let queue_name = self.router.activity_command_queue(&processor.name)?;
        self.message_client.ensure_queue(&queue_name).await?;

        let message = ActivityMessage {
            orchestrated_flow_id: orchestrated_flow.id,
            workflow_id: orchestrated_flow.workflow_id,
            correlation_id,
            step_id: step.id,
            processor_id: step.processor_id,
            publish_id: Uuid::new_v4(),
            execution_id,
            entities: assignments_by_step_id.get(&step.id).cloned().unwrap_or_default(),
        };

        let context = OperationContext::default()
            .with_correlation_id(correlation_id)
            .with_orchestrated_flow_id(orchestrated_flow.id)
            .with_step_id(step.id);
        info!(
            correlation_id = %context.correlation_id.unwrap(),
            step_id = %step.id,
            "dispatching activity command"
        );

        self.message_client
            .publish(&queue_name, correlation_id, &message)
            .await?;
        Ok(())
    }

    /// Consumes `ActivityEvent`s from the bus and advances the graph:
    /// Completed events fan out to every successor step; Failed events do
    /// not advance their branch. This is the event-driven advancement
    /// algorithm left open by `spec.md` §9 Open Question 3, derived here
    /// from the entry→next→termination semantics.
    pub async fn run_advancement_loop(self: Arc<Self>, cancellation_token: CancellationToken) {
        let queue = self.router.activity_event_queue();
        if let Err(err) = self.message_client.ensure_queue(&queue).await {
            error!(error = %err, "failed to ensure activity event queue, advancement loop not starting");
            return;
        }

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }
            match self.message_client.consume::<ActivityEvent>(&queue).await {
                Ok(Some((_, event))) => {
                    if let Err(err) = self.advance_from_event(&event).await {
                        warn!(error = %err, "failed to advance workflow graph from activity event");
                    }
                }
                Ok(None) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
                Err(err) => {
                    warn!(error = %err, "activity event consume failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn advance_from_event(&self, event: &ActivityEvent) -> Result<(), OrchestrationError> {
        if event.status != ActivityStatus::Completed {
            info!(step_id = %event.step_id, "activity failed, not advancing this branch");
            return Ok(());
        }

        let Some(entry) = self.load_cache_entry(event.orchestrated_flow_id).await? else {
            warn!(flow_id = %event.orchestrated_flow_id, "no cache entry found for advancement");
            return Ok(());
        };

        let Some(step) = entry.steps.iter().find(|s| s.id == event.step_id) else {
            warn!(step_id = %event.step_id, "event references unknown step");
            return Ok(());
        };

        for next_id in &step.next_step_ids {
            let Some(next_step) = entry.steps.iter().find(|s| &s.id == next_id) else {
                continue;
            };
            self.dispatch_step(
                &entry.orchestrated_flow,
                next_step,
                &entry.assignments_by_step_id,
                event.correlation_id,
                Some(Uuid::new_v4()),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn stop(&self, flow_id: Uuid) -> Result<(), OrchestrationError> {
        self.stop_internal(flow_id).await
    }

    /// Whether a cron job is currently armed for `flow_id`.
    pub fn is_cron_armed(&self, flow_id: Uuid) -> bool {
        self.cron.is_running(flow_id)
    }

    async fn stop_internal(&self, flow_id: Uuid) -> Result<(), OrchestrationError> {
        if let Err(err) = self.cron.stop(flow_id) {
            if !matches!(err, CronError::NotScheduled(_)) {
                warn!(%flow_id, error = %err, "cron stop failed");
            }
        }
        self.cache
            .remove(map_names::ORCHESTRATION_CACHE, &flow_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn status(&self, flow_id: Uuid) -> Result<FlowStatus, OrchestrationError> {
        match self.load_cache_entry(flow_id).await? {
            Some(entry) => Ok(FlowStatus {
                flow_id,
                is_active: true,
                started_at: Some(entry.created_at),
                expires_at: Some(entry.expires_at),
                step_count: entry.steps.len(),
                assignment_count: entry.assignments_by_step_id.values().map(Vec::len).sum(),
            }),
            None => Ok(FlowStatus::inactive(flow_id)),
        }
    }

    pub async fn processors_health(
        &self,
        flow_id: Uuid,
    ) -> Result<meridian_health::ProcessorHealthProjection, OrchestrationError> {
        match self.load_cache_entry(flow_id).await? {
            Some(entry) => Ok(self.health_reader.project(&entry.processor_ids).await),
            None => Ok(meridian_health::ProcessorHealthProjection {
                per_processor: vec![],
                overall: ProcessorHealthStatus::Unhealthy,
            }),
        }
    }

    async fn fetch_flow(&self, flow_id: Uuid) -> Result<OrchestratedFlow, OrchestrationError> {
        self.manager.get_orchestrated_flow(flow_id).await.map_err(|err| {
            if let meridian_shared::manager_client::ManagerClientError::Api { status: 404, .. } = err {
                OrchestrationError::rejected("flow missing", format!("orchestrated flow {flow_id} not found"))
            } else {
                OrchestrationError::from(err)
            }
        })
    }

    async fn load_cache_entry(
        &self,
        flow_id: Uuid,
    ) -> Result<Option<OrchestrationCacheEntry>, OrchestrationError> {
        let raw = self
            .cache
            .get(map_names::ORCHESTRATION_CACHE, &flow_id.to_string())
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_cache_entry(&self, entry: &OrchestrationCacheEntry) -> Result<(), OrchestrationError> {
        let serialized = serde_json::to_string(entry)?;
        self.cache
            .set(map_names::ORCHESTRATION_CACHE, &entry.flow_id.to_string(), serialized)
            .await?;
        Ok(())
    }
}

fn group_assignments_by_step(assignments: Vec<Assignment>) -> HashMap<Uuid, Vec<Assignment>> {
    let mut grouped: HashMap<Uuid, Vec<Assignment>> = HashMap::new();
    for assignment in assignments {
        grouped.entry(assignment.step_id()).or_default().push(assignment);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::cache::MokaCache;
    use meridian_shared::manager_client::ManagerHttpClient;
    use meridian_shared::messaging::MessagingProvider;
    use meridian_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};

    fn test_service() -> Arc<OrchestrationService> {
        let manager = Arc::new(ManagerHttpClient::new(
            "http://localhost:0",
            Default::default(),
            Arc::new(CircuitBreaker::new(
                "manager".to_string(),
                CircuitBreakerConfig::default(),
            )),
        ));
        let message_client = Arc::new(MessageClient::new(
            Arc::new(MessagingProvider::new_in_memory()),
            MessageRouterKind::default(),
        ));
        OrchestrationService::new(
            manager,
            message_client,
            MessageRouterKind::default(),
            Arc::new(MokaCache::new()),
            Arc::new(SchemaValidator::new()),
        )
    }

    #[tokio::test]
    async fn status_is_inactive_for_unknown_flow() {
        let service = test_service();
        let status = service.status(Uuid::new_v4()).await.unwrap();
        assert!(!status.is_active);
        assert_eq!(status.step_count, 0);
    }

    #[tokio::test]
    async fn stop_on_absent_entry_is_idempotent() {
        let service = test_service();
        assert!(service.stop(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn processors_health_reports_unhealthy_for_unknown_flow() {
        let service = test_service();
        let projection = service.processors_health(Uuid::new_v4()).await.unwrap();
        assert_eq!(projection.overall, ProcessorHealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn start_is_idempotent_when_cache_entry_already_present() {
        let service = test_service();
        let flow_id = Uuid::new_v4();
        let orchestrated_flow = OrchestratedFlow {
            id: flow_id,
            workflow_id: Uuid::new_v4(),
            assignment_ids: vec![],
            cron_expression: None,
            is_schedule_enabled: false,
            is_one_time_execution: false,
        };
        let step_id = Uuid::new_v4();
        let entry = OrchestrationCacheEntry {
            flow_id,
            correlation_id: Uuid::new_v4(),
            orchestrated_flow,
            steps: vec![Step {
                id: step_id,
                processor_id: Uuid::new_v4(),
                next_step_ids: vec![],
            }],
            processor_ids: vec![],
            assignments_by_step_id: HashMap::new(),
            entry_points: vec![step_id],
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(3600),
        };
        service.write_cache_entry(&entry).await.unwrap();

        let outcome = service.start(flow_id).await.unwrap();
        assert_eq!(outcome.cache_entry.flow_id, flow_id);
    }
}
