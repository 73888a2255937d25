//! Core data model, ports, and built-in policies for the central task scheduler
//!
//! This crate contains the types and trait boundaries shared between the
//! scheduler's orchestration core and its pluggable collaborators: the
//! endpoint-choice strategy, the runtime/transfer/import predictors, the
//! transfer coordinator, the executor HTTP client, and the payload
//! serializer. It also ships reference implementations of each port so the
//! scheduler binary is runnable standalone, without an external plugin.

pub mod api;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod ids;
pub mod model;
pub mod ports;
pub mod predictors;
pub mod serializer;
pub mod utils;

// Re-export commonly used types for convenience
pub use clock::{Clock, SystemClock};
pub use ids::{ClientTaskId, EndpointId, FunctionId, RealTaskId};
pub use model::{
    EndpointDescriptor, EndpointState, ExceptionKind, PendingRecord, ScheduledRecord, TaskInfo,
    TaskStatus, Temperature,
};
pub use ports::{
    EndpointChoice, ExecutorClient, FileReference, ImportPredictor, PayloadSerializer,
    RuntimePredictor, Strategy, TaskException, TaskResult, TransferCoordinator,
};

/// Result type alias used throughout this crate.
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the scheduler core.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Cannot block all endpoints for function {0}")]
    AllEndpointsBlocked(String),

    #[error("Unknown client task id: {0}")]
    UnknownClientTask(String),

    #[error("Executor service unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Executor service returned an unexpected response: {0}")]
    ExecutorProtocol(String),

    #[error("Payload serializer error: {0}")]
    Serializer(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure the module tree compiles and re-exports resolve.
    }
}
