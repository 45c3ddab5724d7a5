//! Manager HTTP client (C4): resilient (retry + circuit-breaker) typed
//! GET/POST over entity managers.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::resilience::CircuitBreaker;

#[derive(Debug, Error)]
pub enum ManagerClientError {
    #[error("manager service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("manager returned error status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Page request bounds (`spec.md` §6): `page >= 1`, `pageSize in [1,100]`.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    /// Fail fast client-side; never silently clamps (`spec.md` §8: page
    /// size 0 or >100 → 400).
    pub fn validate(&self) -> Result<(), ManagerClientError> {
        if self.page < 1 {
            return Err(ManagerClientError::Api {
                status: 400,
                message: "page must be >= 1".to_string(),
            });
        }
        if self.page_size < 1 || self.page_size > 100 {
            return Err(ManagerClientError::Api {
                status: 400,
                message: "pageSize must be in [1, 100]".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Wraps `reqwest` with retry (exponential backoff + jitter) composed with
/// a circuit breaker. Referential-integrity checks that cannot be verified
/// because the call errors or the breaker is open return `Err(..)`, never
/// `Ok(true)` — callers must treat error as "fail closed" (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct ManagerHttpClient {
    http: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl ManagerHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        retry_policy: RetryPolicy,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            retry_policy,
            circuit_breaker,
        }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T, ManagerClientError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ManagerClientError>>,
    {
        if !self.circuit_breaker.should_allow() {
            return Err(ManagerClientError::Unavailable(
                "circuit breaker open".to_string(),
            ));
        }

        let mut last_error: Option<ManagerClientError> = None;
        for attempt in 0..self.retry_policy.max_attempts {
            let start = Instant::now();
            match op().await {
                Ok(value) => {
                    self.circuit_breaker.record_success_manual(start.elapsed());
                    return Ok(value);
                }
                Err(err) => {
                    self.circuit_breaker.record_failure_manual(start.elapsed());
                    let retryable = matches!(
                        &err,
                        ManagerClientError::Http(e) if e.is_timeout() || e.is_connect()
                    ) || matches!(
                        &err,
                        ManagerClientError::Api { status, .. }
                            if is_retryable_status(StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
                    );

                    if !retryable || attempt + 1 == self.retry_policy.max_attempts {
                        last_error = Some(err);
                        break;
                    }

                    let delay = self.retry_policy.backoff_with_jitter(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying manager call");
                    tokio::time::sleep(delay).await;
                    last_error = Some(err);
                }
            }
        }

        let last_error = last_error.expect("loop always sets last_error before exiting");
        Err(ManagerClientError::RetriesExhausted {
            attempts: self.retry_policy.max_attempts,
            last_error: last_error.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ManagerClientError> {
        let url = format!("{}{}", self.base_url, path);
        self.execute_with_retry(|| {
            let http = self.http.clone();
            let url = url.clone();
            async move {
                let response = http.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(ManagerClientError::Api {
                        status: response.status().as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                }
                response
                    .json::<T>()
                    .await
                    .map_err(ManagerClientError::Http)
            }
        })
        .await
    }

    async fn post_json<B: serde::Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ManagerClientError> {
        let url = format!("{}{}", self.base_url, path);
        self.execute_with_retry(|| {
            let http = self.http.clone();
            let url = url.clone();
            async move {
                let response = http.post(&url).json(body).send().await?;
                if !response.status().is_success() {
                    return Err(ManagerClientError::Api {
                        status: response.status().as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                }
                response
                    .json::<T>()
                    .await
                    .map_err(ManagerClientError::Http)
            }
        })
        .await
    }

    pub async fn get_schema_by_id(
        &self,
        schema_id: uuid::Uuid,
    ) -> Result<crate::model::Schema, ManagerClientError> {
        self.get_json(&format!("/api/Schema/{schema_id}")).await
    }

    pub async fn get_schema_by_composite_key(
        &self,
        composite_key: &str,
    ) -> Result<crate::model::Schema, ManagerClientError> {
        let encoded = urlencoding::encode(composite_key);
        self.get_json(&format!("/api/Schema/composite/{encoded}")).await
    }

    pub async fn list_schemas(
        &self,
        pagination: Pagination,
    ) -> Result<PagedResponse<crate::model::Schema>, ManagerClientError> {
        pagination.validate()?;
        self.get_json(&format!(
            "/api/Schema?page={}&pageSize={}",
            pagination.page, pagination.page_size
        ))
        .await
    }

    pub async fn get_processor_by_composite_key(
        &self,
        version: &str,
        name: &str,
    ) -> Result<Option<crate::model::Processor>, ManagerClientError> {
        let composite_key = crate::model::composite_key(version, name);
        let encoded = urlencoding::encode(&composite_key);
        match self
            .get_json::<crate::model::Processor>(&format!("/api/Processor/composite/{encoded}"))
            .await
        {
            Ok(processor) => Ok(Some(processor)),
            Err(ManagerClientError::Api { status, .. }) if status == 404 => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Looked up during graph advancement/dispatch, which only has a
    /// step's `processorId`: the bus queue name is keyed by processor
    /// name, not id, so the orchestrator must resolve the entity first.
    pub async fn get_processor_by_id(
        &self,
        processor_id: uuid::Uuid,
    ) -> Result<crate::model::Processor, ManagerClientError> {
        self.get_json(&format!("/api/Processor/{processor_id}")).await
    }

    pub async fn create_processor(
        &self,
        processor: &crate::model::Processor,
    ) -> Result<crate::model::Processor, ManagerClientError> {
        self.post_json("/api/Processor", processor).await
    }

    /// Orchestrator-side: fetch the orchestrated flow entity itself
    /// (`spec.md` §4.8.1 step 2). 404 surfaces as `Api{status:404,..}`; the
    /// caller maps that to "flow missing".
    pub async fn get_orchestrated_flow(
        &self,
        flow_id: uuid::Uuid,
    ) -> Result<crate::model::OrchestratedFlow, ManagerClientError> {
        self.get_json(&format!("/api/Orchestration/flow/{flow_id}"))
            .await
    }

    /// Step-navigation data: steps plus their processor ids and successor
    /// lists (`spec.md` §4.8.1 step 3).
    pub async fn get_step_navigation(
        &self,
        flow_id: uuid::Uuid,
    ) -> Result<Vec<crate::model::Step>, ManagerClientError> {
        self.get_json(&format!("/api/Orchestration/flow/{flow_id}/steps"))
            .await
    }

    /// Assignment data by step id, fetched in the same parallel fan-out as
    /// step navigation (`spec.md` §4.8.1 step 3).
    pub async fn get_assignments_by_flow(
        &self,
        flow_id: uuid::Uuid,
    ) -> Result<Vec<crate::model::Assignment>, ManagerClientError> {
        self.get_json(&format!("/api/Orchestration/flow/{flow_id}/assignments"))
            .await
    }

    /// Referential-integrity check: "does this schema id exist". Returns
    /// `Err` (never `Ok(true)`) when the breaker is open or the call
    /// errors, so callers fail closed (`spec.md` §4.4/§7).
    pub async fn schema_exists(&self, schema_id: uuid::Uuid) -> Result<bool, ManagerClientError> {
        match self.get_schema_by_id(schema_id).await {
            Ok(_) => Ok(true),
            Err(ManagerClientError::Api { status, .. }) if status == 404 => Ok(false),
            Err(err) => {
                debug!(error = %err, "schema existence check could not be verified");
                Err(err)
            }
        }
    }
}
