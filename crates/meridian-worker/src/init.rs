//! Initialization handshake (`spec.md` §4.7.1): get-or-create the
//! processor entity, fetch schema definitions, and validate identity
//! against the binary-embedded implementation hash.

use std::sync::Mutex;
use std::time::Duration;

use meridian_shared::manager_client::ManagerHttpClient;
use meridian_shared::model::Processor;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::error::WorkerError;

/// Selects between the two initialization strategies of `spec.md` §4.7.1.
#[derive(Debug, Clone)]
pub enum InitMode {
    /// Legacy: at most `max_attempts`, exponential backoff from
    /// `base_delay`, throws on exhaustion.
    Bounded { max_attempts: u32, base_delay: Duration },
    /// Loops until success or cancellation, backoff capped at `backoff_cap`.
    Endless { backoff_cap: Duration },
}

impl Default for InitMode {
    fn default() -> Self {
        InitMode::Bounded {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Configuration identifying this processor instance, fixed at build time.
#[derive(Debug, Clone)]
pub struct ProcessorIdentity {
    pub name: String,
    pub version: String,
    pub input_schema_id: Option<Uuid>,
    pub output_schema_id: Option<Uuid>,
    pub enable_input_validation: bool,
    pub enable_output_validation: bool,
    /// Content hash embedded in the binary at build time
    /// (`env!("MERIDIAN_IMPL_HASH")` in production, `spec.md` §9).
    pub implementation_hash: String,
}

/// Three health flags plus initialization status, guarded under one lock
/// (`spec.md` §4.7.1): any of them may independently render the processor
/// unhealthy.
#[derive(Debug, Clone, Default)]
pub struct HealthFlags {
    pub input_schema_healthy: bool,
    pub output_schema_healthy: bool,
    pub schema_ids_valid: bool,
    pub implementation_hash_valid: bool,
    pub is_initialized: bool,
    pub is_initializing: bool,
}

#[derive(Debug, Clone)]
pub struct InitializedState {
    pub processor_id: Uuid,
    pub input_schema_definition: Option<String>,
    pub output_schema_definition: Option<String>,
}

async fn attempt_once(
    identity: &ProcessorIdentity,
    manager: &ManagerHttpClient,
    flags: &Mutex<HealthFlags>,
) -> Result<InitializedState, WorkerError> {
    let mut input_schema_definition = None;
    if identity.enable_input_validation {
        if let Some(schema_id) = identity.input_schema_id {
            match manager.get_schema_by_id(schema_id).await {
                Ok(schema) => {
                    input_schema_definition = Some(schema.definition);
                    flags.lock().unwrap().input_schema_healthy = true;
                }
                Err(err) => {
                    flags.lock().unwrap().input_schema_healthy = false;
                    return Err(err.into());
                }
            }
        }
    } else {
        flags.lock().unwrap().input_schema_healthy = true;
    }

    let mut output_schema_definition = None;
    if identity.enable_output_validation {
        if let Some(schema_id) = identity.output_schema_id {
            match manager.get_schema_by_id(schema_id).await {
                Ok(schema) => {
                    output_schema_definition = Some(schema.definition);
                    flags.lock().unwrap().output_schema_healthy = true;
                }
                Err(err) => {
                    flags.lock().unwrap().output_schema_healthy = false;
                    return Err(err.into());
                }
            }
        }
    } else {
        flags.lock().unwrap().output_schema_healthy = true;
    }

    let processor = match manager
        .get_processor_by_composite_key(&identity.version, &identity.name)
        .await?
    {
        Some(processor) => processor,
        None => {
            manager
                .create_processor(&Processor {
                    id: Uuid::new_v4(),
                    name: identity.name.clone(),
                    version: identity.version.clone(),
                    input_schema_id: identity.input_schema_id,
                    output_schema_id: identity.output_schema_id,
                    implementation_hash: identity.implementation_hash.clone(),
                })
                .await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            manager
                .get_processor_by_composite_key(&identity.version, &identity.name)
                .await?
                .ok_or(WorkerError::ProcessorNotFoundAfterCreate)?
        }
    };

    let schema_ids_valid = (!identity.enable_input_validation
        || processor.input_schema_id == identity.input_schema_id)
        && (!identity.enable_output_validation
            || processor.output_schema_id == identity.output_schema_id);
    flags.lock().unwrap().schema_ids_valid = schema_ids_valid;

    let implementation_hash_valid = if processor.implementation_hash.is_empty() {
        true
    } else if identity.implementation_hash.is_empty() {
        warn!("local implementation hash empty, skipping implementation-hash check");
        true
    } else if processor.implementation_hash == identity.implementation_hash {
        true
    } else {
        false
    };
    flags.lock().unwrap().implementation_hash_valid = implementation_hash_valid;

    if !implementation_hash_valid {
        return Err(WorkerError::VersionIncrementRequired);
    }

    flags.lock().unwrap().is_initialized = true;

    Ok(InitializedState {
        processor_id: processor.id,
        input_schema_definition,
        output_schema_definition,
    })
}

pub async fn initialize(
    identity: &ProcessorIdentity,
    manager: &ManagerHttpClient,
    flags: &Mutex<HealthFlags>,
    mode: &InitMode,
    cancellation_token: &CancellationToken,
) -> Result<InitializedState, WorkerError> {
    flags.lock().unwrap().is_initializing = true;

    let result = match mode {
        InitMode::Bounded {
            max_attempts,
            base_delay,
        } => {
            let mut last_error = None;
            for attempt in 0..*max_attempts {
                match attempt_once(identity, manager, flags).await {
                    Ok(state) => {
                        last_error = None;
                        flags.lock().unwrap().is_initializing = false;
                        return Ok(state);
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, "processor initialization attempt failed");
                        last_error = Some(err);
                        if attempt + 1 < *max_attempts {
                            tokio::time::sleep(*base_delay * 2u32.pow(attempt)).await;
                        }
                    }
                }
            }
            Err(WorkerError::InitializationExhausted(
                last_error.map(|e| e.to_string()).unwrap_or_default(),
            ))
        }
        InitMode::Endless { backoff_cap } => {
            let mut delay = Duration::from_millis(100);
            loop {
                if cancellation_token.is_cancelled() {
                    break Err(WorkerError::Cancelled);
                }
                match attempt_once(identity, manager, flags).await {
                    Ok(state) => break Ok(state),
                    Err(err) => {
                        warn!(error = %err, "processor initialization attempt failed, retrying endlessly");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(*backoff_cap);
                    }
                }
            }
        }
    };

    flags.lock().unwrap().is_initializing = false;
    result
}
