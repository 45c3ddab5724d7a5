use meridian_cron::CronError;
use meridian_health::HealthError;
use meridian_shared::cache::CacheError;
use meridian_shared::manager_client::ManagerClientError;
use meridian_shared::messaging::MessagingError;
use meridian_shared::schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("manager client error: {0}")]
    ManagerClient(#[from] ManagerClientError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("cron error: {0}")]
    Cron(#[from] CronError),

    #[error("health error: {0}")]
    Health(#[from] HealthError),

    #[error("cache entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The single tagged-result value the start gate returns on any
    /// validation failure (`spec.md` §9's "tagged result values" design
    /// note): `reason` names the failing gate, `detail` enumerates it.
    #[error("orchestration rejected: {reason}: {detail}")]
    RejectedBecause { reason: String, detail: String },
}

impl OrchestrationError {
    pub fn rejected(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::RejectedBecause {
            reason: reason.into(),
            detail: detail.into(),
        }
    }
}
