//! Per-worker, per-request activity processing (`spec.md` §4.7.3): the
//! `ActivityHandler` trait is the seam for user activity code, out of
//! scope for this crate.

use std::sync::Arc;

use async_trait::async_trait;
use meridian_shared::cache::Cache;
use meridian_shared::context::OperationContext;
use meridian_shared::model::{ActivityMessage, ActivityStatus, Assignment};
use meridian_shared::schema::SchemaValidator;
use tracing::warn;
use uuid::Uuid;

/// One unit of work returned by an activity invocation.
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub execution_id: Option<Uuid>,
    pub status: ActivityStatus,
    pub serialized_data: String,
    pub error_message: Option<String>,
}

impl ResultItem {
    pub fn completed(execution_id: Option<Uuid>, serialized_data: impl Into<String>) -> Self {
        Self {
            execution_id,
            status: ActivityStatus::Completed,
            serialized_data: serialized_data.into(),
            error_message: None,
        }
    }

    pub fn failed(execution_id: Option<Uuid>, error_message: impl Into<String>) -> Self {
        Self {
            execution_id,
            status: ActivityStatus::Failed,
            serialized_data: String::new(),
            error_message: Some(error_message.into()),
        }
    }
}

/// User activity code, injected at the processor binary's composition
/// root. Not part of this crate's scope; `NoopActivityHandler` below is a
/// test double only.
#[async_trait]
pub trait ActivityHandler: Send + Sync + std::fmt::Debug {
    async fn execute(
        &self,
        context: &OperationContext,
        entities: &[Assignment],
        input_data: Option<&str>,
    ) -> Vec<ResultItem>;
}

/// Test double: completes with an effectively-empty payload so callers can
/// exercise the queue/cache/event plumbing without real activity logic.
#[derive(Debug, Default)]
pub struct NoopActivityHandler;

#[async_trait]
impl ActivityHandler for NoopActivityHandler {
    async fn execute(
        &self,
        _context: &OperationContext,
        _entities: &[Assignment],
        _input_data: Option<&str>,
    ) -> Vec<ResultItem> {
        vec![ResultItem::completed(None, "")]
    }
}

/// Exactly: whitespace-only string, `{}`, `[]`, `null`, or `""`
/// (`spec.md` §8).
pub fn is_effectively_empty(serialized: &str) -> bool {
    let trimmed = serialized.trim();
    trimmed.is_empty() || matches!(trimmed, "{}" | "[]" | "null" | "\"\"")
}

#[derive(Debug, Clone)]
pub struct ActivityResponseItem {
    pub execution_id: Option<Uuid>,
    pub status: ActivityStatus,
    pub error_message: Option<String>,
    pub result_data_size: u64,
}

/// Resolved validation parameters for one step (`spec.md` §4.7.3 step 1):
/// a plugin assignment's own schema pair overrides the processor's.
struct ResolvedValidation<'a> {
    input_schema_definition: Option<&'a str>,
    output_schema_definition: Option<&'a str>,
    enable_input_validation: bool,
    enable_output_validation: bool,
}

fn resolve_validation<'a>(
    entities: &'a [Assignment],
    processor_input_schema: Option<&'a str>,
    processor_output_schema: Option<&'a str>,
    processor_enable_input: bool,
    processor_enable_output: bool,
) -> ResolvedValidation<'a> {
    for entity in entities {
        if let Some(over) = entity.plugin_schema_override() {
            return ResolvedValidation {
                input_schema_definition: over.input_schema_definition,
                output_schema_definition: over.output_schema_definition,
                enable_input_validation: over.enable_input_validation,
                enable_output_validation: over.enable_output_validation,
            };
        }
    }

    ResolvedValidation {
        input_schema_definition: processor_input_schema,
        output_schema_definition: processor_output_schema,
        enable_input_validation: processor_enable_input,
        enable_output_validation: processor_enable_output,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn process_activity(
    message: &ActivityMessage,
    context: &OperationContext,
    cache: &Arc<dyn Cache>,
    activity_map_name: &str,
    validator: &SchemaValidator,
    handler: &dyn ActivityHandler,
    processor_input_schema: Option<&str>,
    processor_output_schema: Option<&str>,
    processor_enable_input: bool,
    processor_enable_output: bool,
) -> Vec<ActivityResponseItem> {
    let validation = resolve_validation(
        &message.entities,
        processor_input_schema,
        processor_output_schema,
        processor_enable_input,
        processor_enable_output,
    );

    let input_data = match message.execution_id {
        None => None,
        Some(execution_id) => {
            let key = message.activity_cache_key(execution_id);
            let cached = match cache.get(activity_map_name, &key).await {
                Ok(value) => value,
                Err(err) => {
                    return vec![ActivityResponseItem {
                        execution_id: Some(execution_id),
                        status: ActivityStatus::Failed,
                        error_message: Some(format!("cache read failed: {err}")),
                        result_data_size: 0,
                    }]
                }
            };

            if validation.enable_input_validation {
                if let (Some(input), Some(schema)) =
                    (cached.as_deref(), validation.input_schema_definition)
                {
                    match validator.validate(input, schema) {
                        Ok(outcome) if !outcome.valid => {
                            return vec![ActivityResponseItem {
                                execution_id: Some(execution_id),
                                status: ActivityStatus::Failed,
                                error_message: Some(format!(
                                    "input schema validation failed: {:?}",
                                    outcome.first_error_path
                                )),
                                result_data_size: 0,
                            }]
                        }
                        Err(err) => {
                            return vec![ActivityResponseItem {
                                execution_id: Some(execution_id),
                                status: ActivityStatus::Failed,
                                error_message: Some(format!("input schema error: {err}")),
                                result_data_size: 0,
                            }]
                        }
                        Ok(_) => {}
                    }
                }
            }

            cached
        }
    };

    let results = handler.execute(context, &message.entities, input_data.as_deref()).await;

    let mut responses = Vec::with_capacity(results.len());
    for item in results {
        responses.push(finalize_result_item(
            item,
            message,
            cache,
            activity_map_name,
            validator,
            &validation,
        ).await);
    }
    responses
}

async fn finalize_result_item(
    item: ResultItem,
    message: &ActivityMessage,
    cache: &Arc<dyn Cache>,
    activity_map_name: &str,
    validator: &SchemaValidator,
    validation: &ResolvedValidation<'_>,
) -> ActivityResponseItem {
    if item.status == ActivityStatus::Failed {
        return ActivityResponseItem {
            execution_id: item.execution_id,
            status: ActivityStatus::Failed,
            error_message: item.error_message,
            result_data_size: 0,
        };
    }

    if is_effectively_empty(&item.serialized_data) {
        return ActivityResponseItem {
            execution_id: item.execution_id,
            status: ActivityStatus::Completed,
            error_message: None,
            result_data_size: 0,
        };
    }

    if validation.enable_output_validation {
        if let Some(schema) = validation.output_schema_definition {
            match validator.validate(&item.serialized_data, schema) {
                Ok(outcome) if !outcome.valid => {
                    return ActivityResponseItem {
                        execution_id: item.execution_id,
                        status: ActivityStatus::Failed,
                        error_message: Some(format!(
                            "output schema validation failed: {:?}",
                            outcome.first_error_path
                        )),
                        result_data_size: 0,
                    }
                }
                Err(err) => {
                    return ActivityResponseItem {
                        execution_id: item.execution_id,
                        status: ActivityStatus::Failed,
                        error_message: Some(format!("output schema error: {err}")),
                        result_data_size: 0,
                    }
                }
                Ok(_) => {}
            }
        }
    }

    let data_size = item.serialized_data.len() as u64;
    if let Some(execution_id) = item.execution_id {
        let key = message.activity_cache_key(execution_id);
        if let Err(err) = cache
            .set(activity_map_name, &key, item.serialized_data.clone())
            .await
        {
            warn!(error = %err, "failed to write activity output to cache");
            return ActivityResponseItem {
                execution_id: Some(execution_id),
                status: ActivityStatus::Failed,
                error_message: Some(format!("cache write failed: {err}")),
                result_data_size: 0,
            };
        }
    }

    ActivityResponseItem {
        execution_id: item.execution_id,
        status: ActivityStatus::Completed,
        error_message: None,
        result_data_size: data_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::cache::MokaCache;

    fn sample_message(execution_id: Option<Uuid>) -> ActivityMessage {
        ActivityMessage {
            orchestrated_flow_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            processor_id: Uuid::new_v4(),
            publish_id: Uuid::new_v4(),
            execution_id,
            entities: vec![],
        }
    }

    #[test]
    fn effectively_empty_recognizes_all_forms() {
        assert!(is_effectively_empty(""));
        assert!(is_effectively_empty("   "));
        assert!(is_effectively_empty("{}"));
        assert!(is_effectively_empty("[]"));
        assert!(is_effectively_empty("null"));
        assert!(is_effectively_empty("\"\""));
        assert!(!is_effectively_empty("{\"a\":1}"));
    }

    #[tokio::test]
    async fn entry_point_invocation_skips_cache_lookup() {
        let message = sample_message(None);
        let context = OperationContext::default();
        let cache: Arc<dyn Cache> = Arc::new(MokaCache::new());
        let validator = SchemaValidator::new();
        let handler = NoopActivityHandler;

        let responses = process_activity(
            &message,
            &context,
            &cache,
            "activity-data",
            &validator,
            &handler,
            None,
            None,
            false,
            false,
        )
        .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, ActivityStatus::Completed);
        assert_eq!(responses[0].result_data_size, 0);
    }

    #[tokio::test]
    async fn non_empty_output_with_execution_id_is_written_to_cache() {
        #[derive(Debug)]
        struct EchoHandler;

        #[async_trait]
        impl ActivityHandler for EchoHandler {
            async fn execute(
                &self,
                _context: &OperationContext,
                _entities: &[Assignment],
                _input_data: Option<&str>,
            ) -> Vec<ResultItem> {
                vec![ResultItem::completed(Some(Uuid::new_v4()), "{\"ok\":true}")]
            }
        }

        let message = sample_message(None);
        let context = OperationContext::default();
        let cache: Arc<dyn Cache> = Arc::new(MokaCache::new());
        let validator = SchemaValidator::new();
        let handler = EchoHandler;

        let responses = process_activity(
            &message, &context, &cache, "activity-data", &validator, &handler, None, None, false,
            false,
        )
        .await;

        assert_eq!(responses.len(), 1);
        assert!(responses[0].result_data_size > 0);
        let key = message.activity_cache_key(responses[0].execution_id.unwrap());
        assert!(cache.get("activity-data", &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_item_never_touches_cache() {
        #[derive(Debug)]
        struct FailingHandler;

        #[async_trait]
        impl ActivityHandler for FailingHandler {
            async fn execute(
                &self,
                _context: &OperationContext,
                _entities: &[Assignment],
                _input_data: Option<&str>,
            ) -> Vec<ResultItem> {
                vec![ResultItem::failed(Some(Uuid::new_v4()), "boom")]
            }
        }

        let message = sample_message(None);
        let context = OperationContext::default();
        let cache: Arc<dyn Cache> = Arc::new(MokaCache::new());
        let validator = SchemaValidator::new();
        let handler = FailingHandler;

        let responses = process_activity(
            &message, &context, &cache, "activity-data", &validator, &handler, None, None, false,
            false,
        )
        .await;

        assert_eq!(responses[0].status, ActivityStatus::Failed);
        assert_eq!(responses[0].error_message.as_deref(), Some("boom"));
    }
}
