//! Top-level error aggregation, mirroring the per-crate-enum-composed-by-`#[from]`
//! pattern used throughout this workspace.

use thiserror::Error;

use crate::cache::CacheError;
use crate::manager_client::ManagerClientError;
use crate::messaging::MessagingError;
use crate::schema::SchemaError;

pub type MeridianResult<T> = Result<T, MeridianError>;

/// Aggregated error type for cross-component failures.
///
/// Each leaf crate (`meridian-cron`, `meridian-health`, `meridian-worker`,
/// `meridian-orchestrator`) defines its own `thiserror` enum and composes
/// this type via `#[from]` rather than the reverse, keeping dependency
/// direction leaf-first.
#[derive(Debug, Error)]
pub enum MeridianError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("manager client error: {0}")]
    ManagerClient(#[from] ManagerClientError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl MeridianError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
