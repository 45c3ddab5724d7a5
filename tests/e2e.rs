//! End-to-end scenarios against the orchestration service, one per
//! literal scenario in `spec.md` §8 (S1-S6). The manager is a `wiremock`
//! server standing in for the real entity-manager HTTP API; the cache
//! and bus are the in-process providers used everywhere else in this
//! workspace's tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use meridian_health::HealthReader;
use meridian_orchestrator::OrchestrationService;
use meridian_shared::cache::{map_names, Cache, MokaCache};
use meridian_shared::manager_client::ManagerHttpClient;
use meridian_shared::messaging::{
    DefaultMessageRouter, MessageClient, MessageRouterKind, MessagingProvider,
};
use meridian_shared::model::{
    OrchestratedFlow, Processor, ProcessorHealthEntry, ProcessorHealthStatus, Step,
};
use meridian_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};
use meridian_shared::schema::SchemaValidator;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    service: Arc<OrchestrationService>,
    cache: Arc<dyn Cache>,
    message_client: Arc<MessageClient>,
    router: MessageRouterKind,
}

async fn harness(base_url: String) -> Harness {
    let manager = Arc::new(ManagerHttpClient::new(
        base_url,
        Default::default(),
        Arc::new(CircuitBreaker::new(
            "manager".to_string(),
            CircuitBreakerConfig::default(),
        )),
    ));
    let cache: Arc<dyn Cache> = Arc::new(MokaCache::new());
    let router = MessageRouterKind::from(DefaultMessageRouter::default());
    let message_client = Arc::new(MessageClient::new(
        Arc::new(MessagingProvider::new_in_memory()),
        router.clone(),
    ));
    let service = OrchestrationService::new(
        manager,
        message_client.clone(),
        router.clone(),
        cache.clone(),
        Arc::new(SchemaValidator::new()),
    );
    Harness {
        service,
        cache,
        message_client,
        router,
    }
}

fn flow(flow_id: Uuid, cron: Option<(&str, bool)>) -> OrchestratedFlow {
    OrchestratedFlow {
        id: flow_id,
        workflow_id: Uuid::new_v4(),
        assignment_ids: vec![],
        cron_expression: cron.map(|(expr, _)| expr.to_string()),
        is_schedule_enabled: cron.map(|(_, enabled)| enabled).unwrap_or(false),
        is_one_time_execution: false,
    }
}

fn processor() -> Processor {
    Processor {
        id: Uuid::new_v4(),
        name: "shipper".to_string(),
        version: "v1".to_string(),
        input_schema_id: None,
        output_schema_id: None,
        implementation_hash: "abc123".to_string(),
    }
}

async fn mount_flow_endpoints(
    mock_server: &MockServer,
    flow_id: Uuid,
    orchestrated_flow: &OrchestratedFlow,
    steps: &[Step],
    processor: &Processor,
) {
    Mock::given(method("GET"))
        .and(path(format!("/api/Orchestration/flow/{flow_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(orchestrated_flow))
        .mount(mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/Orchestration/flow/{flow_id}/steps")))
        .respond_with(ResponseTemplate::new(200).set_body_json(steps))
        .mount(mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/api/Orchestration/flow/{flow_id}/assignments"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/Processor/{}", processor.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(processor))
        .mount(mock_server)
        .await;
}

async fn mark_healthy(cache: &Arc<dyn Cache>, processor_id: Uuid) {
    let now = Utc::now();
    let entry = ProcessorHealthEntry {
        processor_id,
        status: ProcessorHealthStatus::Healthy,
        message: "ok".to_string(),
        last_updated_unix_seconds: now.timestamp(),
        health_check_interval_seconds: 10,
        expires_at: now + chrono::Duration::seconds(60),
        reporting_pod_id: "pod-1".to_string(),
        correlation_id: Uuid::new_v4(),
        health_check_id: Uuid::new_v4(),
        uptime_seconds: 10,
        metadata: HashMap::new(),
        performance_metrics: HashMap::new(),
        health_checks: HashMap::new(),
    };
    cache
        .set(
            map_names::PROCESSOR_HEALTH,
            &processor_id.to_string(),
            serde_json::to_string(&entry).unwrap(),
        )
        .await
        .unwrap();
}

// S1: single-step flow, healthy processor -> cache entry written, one
// activity command published, no cron armed.
#[tokio::test]
async fn s1_single_step_flow_starts_and_dispatches_one_command() {
    let mock_server = MockServer::start().await;
    let harness = harness(mock_server.uri()).await;

    let flow_id = Uuid::new_v4();
    let step_id = Uuid::new_v4();
    let processor = processor();
    let orchestrated_flow = flow(flow_id, None);
    let steps = vec![Step {
        id: step_id,
        processor_id: processor.id,
        next_step_ids: vec![],
    }];
    mount_flow_endpoints(&mock_server, flow_id, &orchestrated_flow, &steps, &processor).await;
    mark_healthy(&harness.cache, processor.id).await;

    let outcome = harness.service.start(flow_id).await.unwrap();
    assert_eq!(outcome.cache_entry.flow_id, flow_id);
    assert!(!harness.service.is_cron_armed(flow_id));

    let queue = harness
        .router
        .activity_command_queue(&processor.name)
        .unwrap();
    let dispatched: Option<(_, meridian_shared::model::ActivityMessage)> =
        harness.message_client.consume(&queue).await.unwrap();
    let (_, message) = dispatched.expect("entry-point step should have been dispatched");
    assert_eq!(message.step_id, step_id);
    assert!(message.execution_id.is_none());

    let status = harness.service.status(flow_id).await.unwrap();
    assert!(status.is_active);
    assert_eq!(status.step_count, 1);
}

// S2: mutually-referencing steps have no entry point -> rejected.
#[tokio::test]
async fn s2_flow_with_no_entry_point_is_rejected() {
    let mock_server = MockServer::start().await;
    let harness = harness(mock_server.uri()).await;

    let flow_id = Uuid::new_v4();
    let processor = processor();
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();
    let orchestrated_flow = flow(flow_id, None);
    let steps = vec![
        Step {
            id: s1,
            processor_id: processor.id,
            next_step_ids: vec![s2],
        },
        Step {
            id: s2,
            processor_id: processor.id,
            next_step_ids: vec![s1],
        },
    ];
    mount_flow_endpoints(&mock_server, flow_id, &orchestrated_flow, &steps, &processor).await;

    let err = harness.service.start(flow_id).await.unwrap_err();
    assert!(err.to_string().contains("No entry points found in workflow"));

    let status = harness.service.status(flow_id).await.unwrap();
    assert!(!status.is_active, "failed start must not leave a cache entry behind");
}

// S3: duplicated termination target is accepted.
#[tokio::test]
async fn s3_duplicated_termination_target_is_accepted() {
    let mock_server = MockServer::start().await;
    let harness = harness(mock_server.uri()).await;

    let flow_id = Uuid::new_v4();
    let processor = processor();
    let (s1, s2, s3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let orchestrated_flow = flow(flow_id, None);
    let steps = vec![
        Step { id: s1, processor_id: processor.id, next_step_ids: vec![s2] },
        Step { id: s3, processor_id: processor.id, next_step_ids: vec![s2] },
        Step { id: s2, processor_id: processor.id, next_step_ids: vec![] },
    ];
    mount_flow_endpoints(&mock_server, flow_id, &orchestrated_flow, &steps, &processor).await;
    mark_healthy(&harness.cache, processor.id).await;

    let outcome = harness.service.start(flow_id).await.unwrap();
    assert_eq!(outcome.cache_entry.entry_points.len(), 2);
}

// S4: duplicated non-termination target -> rejected.
#[tokio::test]
async fn s4_duplicated_non_termination_target_is_rejected() {
    let mock_server = MockServer::start().await;
    let harness = harness(mock_server.uri()).await;

    let flow_id = Uuid::new_v4();
    let processor = processor();
    let (s1, s2, s3, s4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let orchestrated_flow = flow(flow_id, None);
    let steps = vec![
        Step { id: s1, processor_id: processor.id, next_step_ids: vec![s2] },
        Step { id: s3, processor_id: processor.id, next_step_ids: vec![s2] },
        Step { id: s2, processor_id: processor.id, next_step_ids: vec![s4] },
        Step { id: s4, processor_id: processor.id, next_step_ids: vec![] },
    ];
    mount_flow_endpoints(&mock_server, flow_id, &orchestrated_flow, &steps, &processor).await;

    let err = harness.service.start(flow_id).await.unwrap_err();
    assert!(err.to_string().contains("Circular workflow detected"));
}

// S5: processor health missing -> rejected at the health gate.
#[tokio::test]
async fn s5_unhealthy_processor_blocks_start() {
    let mock_server = MockServer::start().await;
    let harness = harness(mock_server.uri()).await;

    let flow_id = Uuid::new_v4();
    let step_id = Uuid::new_v4();
    let processor = processor();
    let orchestrated_flow = flow(flow_id, None);
    let steps = vec![Step {
        id: step_id,
        processor_id: processor.id,
        next_step_ids: vec![],
    }];
    mount_flow_endpoints(&mock_server, flow_id, &orchestrated_flow, &steps, &processor).await;
    // No health entry written: processor is neither healthy nor fresh.

    let err = harness.service.start(flow_id).await.unwrap_err();
    assert!(err.to_string().contains("Unhealthy processors"));

    let reader = HealthReader::new(harness.cache.clone());
    assert!(reader.read_fresh(processor.id).await.is_none());
}

// S6: cron-armed flow preserves its correlation id across the registry.
#[tokio::test]
async fn s6_cron_expression_arms_a_recurring_job() {
    let mock_server = MockServer::start().await;
    let harness = harness(mock_server.uri()).await;

    let flow_id = Uuid::new_v4();
    let step_id = Uuid::new_v4();
    let processor = processor();
    let orchestrated_flow = flow(flow_id, Some(("0 0 * * * ?", true)));
    let steps = vec![Step {
        id: step_id,
        processor_id: processor.id,
        next_step_ids: vec![],
    }];
    mount_flow_endpoints(&mock_server, flow_id, &orchestrated_flow, &steps, &processor).await;
    mark_healthy(&harness.cache, processor.id).await;

    harness.service.start(flow_id).await.unwrap();
    assert!(harness.service.is_cron_armed(flow_id));

    harness.service.stop(flow_id).await.unwrap();
    assert!(!harness.service.is_cron_armed(flow_id));
}
