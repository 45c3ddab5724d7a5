//! Queue name routing: separates queue-name generation from messaging
//! operations so different deployments can choose different conventions.

use super::MessagingError;

fn validate_queue_name(name: &str) -> Result<(), MessagingError> {
    if name.is_empty() || name.len() > 255 {
        return Err(MessagingError::InvalidQueueName(name.to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MessagingError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

pub trait MessageRouter: Send + Sync {
    /// The queue a processor consumes `ExecuteActivityCommand`s from.
    /// Default pattern: `processor_{processor_name}_queue`.
    fn activity_command_queue(&self, processor_name: &str) -> Result<String, MessagingError>;

    /// The queue the orchestrator consumes `ActivityExecutedEvent`s and
    /// `ActivityFailedEvent`s from.
    fn activity_event_queue(&self) -> String;

    /// The queue `CreateProcessorCommand`s are published to.
    fn processor_registration_queue(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct DefaultMessageRouter {
    processor_queue_prefix: String,
    activity_event_queue: String,
    processor_registration_queue: String,
}

impl DefaultMessageRouter {
    pub fn new(
        processor_queue_prefix: impl Into<String>,
        activity_event_queue: impl Into<String>,
        processor_registration_queue: impl Into<String>,
    ) -> Self {
        Self {
            processor_queue_prefix: processor_queue_prefix.into(),
            activity_event_queue: activity_event_queue.into(),
            processor_registration_queue: processor_registration_queue.into(),
        }
    }
}

impl Default for DefaultMessageRouter {
    fn default() -> Self {
        Self {
            processor_queue_prefix: "processor".to_string(),
            activity_event_queue: "orchestration_activity_events".to_string(),
            processor_registration_queue: "orchestration_processor_registration".to_string(),
        }
    }
}

impl MessageRouter for DefaultMessageRouter {
    fn activity_command_queue(&self, processor_name: &str) -> Result<String, MessagingError> {
        let name = format!("{}_{}_queue", self.processor_queue_prefix, processor_name);
        validate_queue_name(&name)?;
        Ok(name)
    }

    fn activity_event_queue(&self) -> String {
        self.activity_event_queue.clone()
    }

    fn processor_registration_queue(&self) -> String {
        self.processor_registration_queue.clone()
    }
}

/// Enum dispatch over `MessageRouter` implementations, avoiding
/// `Arc<dyn MessageRouter>` vtable overhead for a cheap string-formatting
/// operation.
#[derive(Debug, Clone)]
pub enum MessageRouterKind {
    Default(DefaultMessageRouter),
}

impl MessageRouterKind {
    pub fn activity_command_queue(&self, processor_name: &str) -> Result<String, MessagingError> {
        match self {
            Self::Default(r) => r.activity_command_queue(processor_name),
        }
    }

    pub fn activity_event_queue(&self) -> String {
        match self {
            Self::Default(r) => r.activity_event_queue(),
        }
    }

    pub fn processor_registration_queue(&self) -> String {
        match self {
            Self::Default(r) => r.processor_registration_queue(),
        }
    }
}

impl Default for MessageRouterKind {
    fn default() -> Self {
        Self::Default(DefaultMessageRouter::default())
    }
}

impl From<DefaultMessageRouter> for MessageRouterKind {
    fn from(router: DefaultMessageRouter) -> Self {
        Self::Default(router)
    }
}
