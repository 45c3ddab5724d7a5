//! Cron scheduler (C5): a `flowId -> job` registry that rearms the
//! orchestration start path on each fire, preserving the correlation id
//! captured at arming time.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("job already scheduled for flow {0}")]
    AlreadyScheduled(Uuid),

    #[error("no job scheduled for flow {0}")]
    NotScheduled(Uuid),

    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("rearm callback failed: {0}")]
    RearmFailed(String),
}

/// Callback invoked on every fire, preserving the originally captured
/// correlation id across cycles (`spec.md` §4.5).
#[async_trait]
pub trait RearmHandler: Send + Sync + std::fmt::Debug {
    async fn rearm(&self, flow_id: Uuid, correlation_id: Uuid) -> Result<(), CronError>;
}

fn parse(expression: &str) -> Result<Schedule, CronError> {
    Schedule::from_str(expression).map_err(|e| CronError::InvalidExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

struct ScheduledJobHandle {
    cron_expression: String,
    correlation_id: Uuid,
    is_one_time: bool,
    cancellation_token: CancellationToken,
    task: JoinHandle<()>,
}

/// `DashMap<Uuid, ScheduledJob>` keyed by flow id (`spec.md` §4.5).
#[derive(Clone)]
pub struct CronRegistry {
    jobs: Arc<DashMap<Uuid, ScheduledJobHandle>>,
    rearm_handler: Arc<dyn RearmHandler>,
}

impl std::fmt::Debug for CronRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronRegistry")
            .field("scheduled_count", &self.jobs.len())
            .finish()
    }
}

impl CronRegistry {
    pub fn new(rearm_handler: Arc<dyn RearmHandler>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            rearm_handler,
        }
    }

    /// Parses `expression` with the same grammar the runtime arms jobs
    /// with, so `validate` never accepts what `start` would reject.
    pub fn validate(&self, expression: &str) -> Result<(), CronError> {
        parse(expression).map(|_| ())
    }

    /// Rejects if `flow_id` already has a job; rejects invalid cron.
    pub fn start(
        &self,
        flow_id: Uuid,
        cron_expression: &str,
        correlation_id: Uuid,
        is_one_time: bool,
    ) -> Result<(), CronError> {
        if self.jobs.contains_key(&flow_id) {
            return Err(CronError::AlreadyScheduled(flow_id));
        }
        self.arm(flow_id, cron_expression, correlation_id, is_one_time)
    }

    fn arm(
        &self,
        flow_id: Uuid,
        cron_expression: &str,
        correlation_id: Uuid,
        is_one_time: bool,
    ) -> Result<(), CronError> {
        let schedule = parse(cron_expression)?;
        let cancellation_token = CancellationToken::new();
        let task = spawn_job_loop(
            flow_id,
            schedule,
            correlation_id,
            is_one_time,
            cancellation_token.clone(),
            self.jobs.clone(),
            self.rearm_handler.clone(),
        );

        self.jobs.insert(
            flow_id,
            ScheduledJobHandle {
                cron_expression: cron_expression.to_string(),
                correlation_id,
                is_one_time,
                cancellation_token,
                task,
            },
        );
        Ok(())
    }

    /// Rejects if absent; cancels the job's task cooperatively.
    pub fn stop(&self, flow_id: Uuid) -> Result<(), CronError> {
        match self.jobs.remove(&flow_id) {
            Some((_, handle)) => {
                handle.cancellation_token.cancel();
                handle.task.abort();
                Ok(())
            }
            None => Err(CronError::NotScheduled(flow_id)),
        }
    }

    /// Replaces the trigger if present, else starts fresh.
    pub fn update(
        &self,
        flow_id: Uuid,
        cron_expression: &str,
        correlation_id: Uuid,
    ) -> Result<(), CronError> {
        if let Some((_, handle)) = self.jobs.remove(&flow_id) {
            handle.cancellation_token.cancel();
            handle.task.abort();
            self.arm(flow_id, cron_expression, handle.correlation_id, handle.is_one_time)
        } else {
            self.arm(flow_id, cron_expression, correlation_id, false)
        }
    }

    pub fn is_running(&self, flow_id: Uuid) -> bool {
        self.jobs.contains_key(&flow_id)
    }

    pub fn get_cron_expression(&self, flow_id: Uuid) -> Option<String> {
        self.jobs.get(&flow_id).map(|job| job.cron_expression.clone())
    }

    pub fn next_fire_time(&self, flow_id: Uuid) -> Option<DateTime<Utc>> {
        let job = self.jobs.get(&flow_id)?;
        let schedule = parse(&job.cron_expression).ok()?;
        schedule.upcoming(Utc).next()
    }

    pub fn list_scheduled(&self) -> Vec<Uuid> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_job_loop(
    flow_id: Uuid,
    schedule: Schedule,
    correlation_id: Uuid,
    is_one_time: bool,
    cancellation_token: CancellationToken,
    jobs: Arc<DashMap<Uuid, ScheduledJobHandle>>,
    rearm_handler: Arc<dyn RearmHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next_fire = match schedule.upcoming(Utc).next() {
                Some(fire) => fire,
                None => {
                    warn!(%flow_id, "cron schedule produced no upcoming fire time, stopping job");
                    break;
                }
            };

            let now = Utc::now();
            let sleep_duration = (next_fire - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!(%flow_id, "cron job cancelled before next fire");
                    return;
                }
                _ = tokio::time::sleep(sleep_duration) => {}
            }

            info!(%flow_id, %correlation_id, "cron job firing, rearming orchestration start");
            if let Err(err) = rearm_handler.rearm(flow_id, correlation_id).await {
                warn!(%flow_id, error = %err, "cron rearm failed");
            }

            if is_one_time {
                jobs.remove(&flow_id);
                return;
            }
        }
    })
}
