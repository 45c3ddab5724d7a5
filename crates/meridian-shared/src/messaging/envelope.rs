//! Bus message envelope carrying correlation id both as a typed field and
//! in distributed-tracing baggage (`spec.md` §4.2/§9).

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub correlation_id: Uuid,
    pub body: String,
    pub baggage: HashMap<String, String>,
}

impl Envelope {
    pub fn new(correlation_id: Uuid, body: String) -> Self {
        let mut baggage = HashMap::new();
        baggage.insert("correlationId".to_string(), correlation_id.to_string());
        Self {
            correlation_id,
            body,
            baggage,
        }
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }
}
