//! Hierarchical logging context.
//!
//! Replaces ambient thread-local logging dictionaries with an explicit,
//! immutable record threaded through every call site and into every
//! `tracing` span. A secondary ambient `correlation_id` is still carried by
//! the bus/HTTP layer via baggage for external propagation only — see
//! `crate::messaging::Envelope::baggage`.

use uuid::Uuid;

/// Identifier tuple attached to every log line and downstream call for a
/// single unit of work moving through the system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    pub correlation_id: Option<Uuid>,
    pub orchestrated_flow_id: Option<Uuid>,
    pub workflow_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
    pub processor_id: Option<Uuid>,
    pub publish_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_orchestrated_flow_id(mut self, flow_id: Uuid) -> Self {
        self.orchestrated_flow_id = Some(flow_id);
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn with_step_id(mut self, step_id: Uuid) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_processor_id(mut self, processor_id: Uuid) -> Self {
        self.processor_id = Some(processor_id);
        self
    }

    pub fn with_publish_id(mut self, publish_id: Uuid) -> Self {
        self.publish_id = Some(publish_id);
        self
    }

    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// `executionId == empty` is the entry-point sentinel (`spec.md` §3); a
    /// `None` execution id is treated the same way by callers.
    pub fn is_entry_point_invocation(&self) -> bool {
        self.execution_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain_sets_fields() {
        let correlation_id = Uuid::new_v4();
        let step_id = Uuid::new_v4();
        let ctx = OperationContext::new()
            .with_correlation_id(correlation_id)
            .with_step_id(step_id);

        assert_eq!(ctx.correlation_id, Some(correlation_id));
        assert_eq!(ctx.step_id, Some(step_id));
        assert_eq!(ctx.workflow_id, None);
    }

    #[test]
    fn default_context_is_entry_point() {
        let ctx = OperationContext::new();
        assert!(ctx.is_entry_point_invocation());
    }

    #[test]
    fn context_with_execution_id_is_not_entry_point() {
        let ctx = OperationContext::new().with_execution_id(Uuid::new_v4());
        assert!(!ctx.is_entry_point_invocation());
    }
}
