//! Processor runtime (C7): initialization handshake, bounded activity
//! queue, worker pool, and the health-source seam for `meridian-health`.

pub mod activity;
pub mod error;
pub mod health;
pub mod init;
pub mod queue;
pub mod response;
pub mod runtime;

pub use activity::{ActivityHandler, ActivityResponseItem, NoopActivityHandler, ResultItem};
pub use error::WorkerError;
pub use health::RuntimeHealthSource;
pub use init::{HealthFlags, InitMode, InitializedState, ProcessorIdentity};
pub use queue::{BoundedQueue, BoundedQueueReceiver, DepthGuard};
pub use response::FlowMetrics;
pub use runtime::{ProcessorRuntime, ProcessorRuntimeConfig};
