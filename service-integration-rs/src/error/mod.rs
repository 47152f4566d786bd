//! Error handling for the service integration runtime
//!
//! This module provides a single error family that:
//! - Distinguishes "not found" from registry malfunctions
//! - Separates connection, timeout and unavailability failures so callers
//!   can decide whether to retry, fail fast or fall back
//! - Marks which failures a circuit breaker should count
//! - Provides a convenient Result type alias

use std::time::Duration;
use thiserror::Error;

pub mod mapping;

/// Result type for service integration operations
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Main error type for the service integration runtime
#[derive(Error, Debug, Clone)]
pub enum IntegrationError {
    /// No such service or remote record
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Registry or discovery backend malfunction
    #[error("Service discovery error: {0}")]
    Discovery(String),

    /// Connection failures and 5xx responses
    #[error("Connection error calling {service}: {message}")]
    Connection { service: String, message: String },

    /// The remote call exceeded its deadline
    #[error("Timeout calling {service}: {message}")]
    Timeout { service: String, message: String },

    /// The target is currently refusing traffic (circuit open)
    #[error("Service unavailable: {service}: {message}")]
    Unavailable { service: String, message: String },

    /// Non-404 4xx response
    #[error("Client error {status} from {service}: {message}")]
    Client {
        service: String,
        status: u16,
        message: String,
    },

    /// Raised by a circuit breaker that rejected a call. Translated to
    /// `Unavailable` by the service client.
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen {
        name: String,
        retry_after: Option<Duration>,
    },

    /// Failure while executing a workflow
    #[error("Workflow error: {message}")]
    Workflow {
        workflow_id: Option<String>,
        message: String,
    },

    /// The mediator has no handler for the request type
    #[error("Unknown request type: {0}")]
    UnknownRequestType(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IntegrationError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        IntegrationError::ServiceNotFound(message.into())
    }

    /// Create a discovery backend error
    pub fn discovery(message: impl Into<String>) -> Self {
        IntegrationError::Discovery(message.into())
    }

    /// Create a connection error
    pub fn connection(service: impl Into<String>, message: impl Into<String>) -> Self {
        IntegrationError::Connection {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(service: impl Into<String>, message: impl Into<String>) -> Self {
        IntegrationError::Timeout {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a service unavailable error
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        IntegrationError::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        IntegrationError::Configuration(message.into())
    }

    /// Create a workflow error without an id
    pub fn workflow(message: impl Into<String>) -> Self {
        IntegrationError::Workflow {
            workflow_id: None,
            message: message.into(),
        }
    }

    /// Wrap a failure from one workflow step, keeping the step name as context
    pub fn workflow_step(step: &str, source: IntegrationError) -> Self {
        match source {
            // Already wrapped by a nested step
            IntegrationError::Workflow { workflow_id, message } => IntegrationError::Workflow {
                workflow_id,
                message: format!("{}: {}", step, message),
            },
            other => IntegrationError::Workflow {
                workflow_id: None,
                message: format!("{} failed: {}", step, other),
            },
        }
    }

    /// Attach a workflow id to a workflow error; other variants are wrapped
    pub fn with_workflow_id(self, id: impl Into<String>) -> Self {
        let id = id.into();
        match self {
            IntegrationError::Workflow { message, .. } => IntegrationError::Workflow {
                workflow_id: Some(id),
                message,
            },
            other => IntegrationError::Workflow {
                workflow_id: Some(id),
                message: other.to_string(),
            },
        }
    }

    /// Check if this error means the requested record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, IntegrationError::ServiceNotFound(_))
    }

    /// Check if a caller could reasonably retry this error later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IntegrationError::Connection { .. }
                | IntegrationError::Timeout { .. }
                | IntegrationError::Unavailable { .. }
                | IntegrationError::CircuitOpen { .. }
        )
    }

    /// Whether a circuit breaker should count this error against its target.
    /// A 4xx response proves the target is alive, so only network-level
    /// failures and 5xx responses count.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            IntegrationError::Connection { .. } | IntegrationError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(err: serde_json::Error) -> Self {
        IntegrationError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<redis::RedisError> for IntegrationError {
    fn from(err: redis::RedisError) -> Self {
        IntegrationError::Discovery(format!("Redis error: {}", err))
    }
}
