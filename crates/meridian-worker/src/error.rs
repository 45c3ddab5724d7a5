use meridian_shared::cache::CacheError;
use meridian_shared::manager_client::ManagerClientError;
use meridian_shared::messaging::MessagingError;
use meridian_shared::schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("manager client error: {0}")]
    ManagerClient(#[from] ManagerClientError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("processor not found even after create command")]
    ProcessorNotFoundAfterCreate,

    #[error("implementation hash mismatch: version increment required")]
    VersionIncrementRequired,

    #[error("initialization retry budget exhausted: {0}")]
    InitializationExhausted(String),

    #[error("initialization cancelled")]
    Cancelled,

    #[error("queue closed: {0}")]
    QueueClosed(String),

    #[error("{0}")]
    Internal(String),
}
