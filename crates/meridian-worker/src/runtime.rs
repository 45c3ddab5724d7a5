//! Processor runtime (C7): owns the init handshake, the bounded
//! request/response queue, its worker pool, and the health source the
//! health monitor samples (`spec.md` §4.7).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use meridian_shared::cache::Cache;
use meridian_shared::context::OperationContext;
use meridian_shared::manager_client::ManagerHttpClient;
use meridian_shared::messaging::{MessageClient, MessageRouterKind};
use meridian_shared::model::ActivityMessage;
use meridian_shared::schema::SchemaValidator;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::activity::{process_activity, ActivityHandler};
use crate::error::WorkerError;
use crate::health::RuntimeHealthSource;
use crate::init::{self, HealthFlags, InitMode, InitializedState, ProcessorIdentity};
use crate::queue::{BoundedQueue, BoundedQueueReceiver, DEFAULT_QUEUE_CAPACITY};
use crate::response::{publish_responses, FlowMetrics};

pub const ACTIVITY_DATA_MAP: &str = "activity-data";

pub struct ProcessorRuntimeConfig {
    pub identity: ProcessorIdentity,
    pub init_mode: InitMode,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for ProcessorRuntimeConfig {
    fn default() -> Self {
        Self {
            identity: ProcessorIdentity {
                name: String::new(),
                version: String::new(),
                input_schema_id: None,
                output_schema_id: None,
                enable_input_validation: false,
                enable_output_validation: false,
                implementation_hash: String::new(),
            },
            init_mode: InitMode::default(),
            worker_count: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Ties the init handshake, queue, and worker pool into one lifecycle.
pub struct ProcessorRuntime {
    config: ProcessorRuntimeConfig,
    manager: Arc<ManagerHttpClient>,
    message_client: Arc<MessageClient>,
    router: MessageRouterKind,
    cache: Arc<dyn Cache>,
    validator: Arc<SchemaValidator>,
    handler: Arc<dyn ActivityHandler>,
    flags: Arc<Mutex<HealthFlags>>,
    pub health_source: Arc<RuntimeHealthSource>,
    metrics: Arc<FlowMetrics>,
    request_queue: BoundedQueue<ActivityMessage>,
    // Shared across the worker pool: `recv` takes `&mut self`, so each
    // worker takes the lock only for the duration of its own dequeue.
    request_receiver: Arc<tokio::sync::Mutex<BoundedQueueReceiver<ActivityMessage>>>,
    cancellation_token: CancellationToken,
}

impl ProcessorRuntime {
    pub fn new(
        config: ProcessorRuntimeConfig,
        manager: Arc<ManagerHttpClient>,
        message_client: Arc<MessageClient>,
        router: MessageRouterKind,
        cache: Arc<dyn Cache>,
        validator: Arc<SchemaValidator>,
        handler: Arc<dyn ActivityHandler>,
    ) -> Self {
        let flags = Arc::new(Mutex::new(HealthFlags::default()));
        let health_source = Arc::new(RuntimeHealthSource::new(
            flags.clone(),
            cache.clone(),
            message_client.clone(),
        ));
        let (request_queue, request_receiver) = BoundedQueue::channel(config.queue_capacity);

        Self {
            config,
            manager,
            message_client,
            router,
            cache,
            validator,
            handler,
            flags,
            health_source,
            metrics: Arc::new(FlowMetrics::new()),
            request_queue,
            request_receiver: Arc::new(tokio::sync::Mutex::new(request_receiver)),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> &Arc<FlowMetrics> {
        &self.metrics
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn queue_depth(&self) -> usize {
        self.request_queue.depth()
    }

    /// Runs the init handshake and, on success, starts the activity
    /// command intake task plus `worker_count` processing workers. Returns
    /// the resolved `InitializedState` so callers can surface it (e.g. to
    /// the health monitor or a readiness probe).
    pub async fn start(self: &Arc<Self>) -> Result<InitializedState, WorkerError> {
        let state = init::initialize(
            &self.config.identity,
            &self.manager,
            &self.flags,
            &self.config.init_mode,
            &self.cancellation_token,
        )
        .await?;

        self.health_source.set_processor_id(state.processor_id);

        let queue_name = self
            .router
            .activity_command_queue(&self.config.identity.name)?;
        self.message_client.ensure_queue(&queue_name).await?;

        let intake = self.clone();
        let intake_queue_name = queue_name.clone();
        tokio::spawn(async move { intake.run_intake_loop(intake_queue_name).await });

        for worker_id in 0..self.config.worker_count.max(1) {
            let runtime = self.clone();
            let state = state.clone();
            tokio::spawn(async move { runtime.run_worker_loop(worker_id, state).await });
        }

        Ok(state)
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    async fn run_intake_loop(self: Arc<Self>, queue_name: String) {
        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            match self
                .message_client
                .consume::<ActivityMessage>(&queue_name)
                .await
            {
                Ok(Some((_, message))) => {
                    if let Err(err) = self.request_queue.enqueue(message).await {
                        error!(error = %err, "failed to enqueue activity message");
                    }
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(err) => {
                    warn!(error = %err, "activity command consume failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn run_worker_loop(self: Arc<Self>, worker_id: usize, state: InitializedState) {
        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let guard = {
                let mut receiver = self.request_receiver.lock().await;
                receiver.recv().await
            };

            let Some(guard) = guard else {
                break;
            };

            let started = Instant::now();
            let context = OperationContext::default()
                .with_correlation_id(guard.correlation_id)
                .with_orchestrated_flow_id(guard.orchestrated_flow_id);

            let responses = process_activity(
                &guard,
                &context,
                &self.cache,
                ACTIVITY_DATA_MAP,
                &self.validator,
                self.handler.as_ref(),
                state.input_schema_definition.as_deref(),
                state.output_schema_definition.as_deref(),
                self.config.identity.enable_input_validation,
                self.config.identity.enable_output_validation,
            )
            .await;

            if let Err(err) = publish_responses(
                &guard,
                &responses,
                started.elapsed(),
                &self.message_client,
                &self.router,
                &self.metrics,
            )
            .await
            {
                error!(worker_id, error = %err, "failed to publish activity response");
            }
            // `guard` drops here, decrementing queue depth only after
            // processing and response publication complete.
        }
    }
}
