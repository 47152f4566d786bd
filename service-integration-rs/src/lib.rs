//! # Service Integration
//!
//! Runtime that lets independently deployed Phoenix ORCH services find each
//! other, call each other resiliently and run workflows spanning several
//! services.
//!
//! This crate provides:
//!
//! - Per-target circuit breakers behind a shared keyed registry
//! - Service discovery over a pluggable store (in-memory or Redis) with a
//!   read cache and a background heartbeat monitor
//! - An HTTP client that routes every call through the target's breaker
//! - A request mediator for point-to-point requests and event broadcast
//! - Built-in workflows (agent task execution, project planning)
//! - An `IntegrationFacade` tying the above together for the HTTP layer
//!
//! ## Architecture
//!
//! A caller asks the facade to run a workflow. The facade routes it through
//! the mediator under `workflow.<TYPE>`; the workflow resolves targets with
//! `ServiceDiscovery` and calls them with `ServiceClient`, which executes
//! each request through the target's `CircuitBreaker`.

pub mod client;
pub use client::{HttpMethod, ServiceClient};

pub mod config;
pub use config::{ConfigProvider, ConfigProviderExt, EnvConfigProvider, IntegrationConfig};

pub mod discovery;
pub use discovery::{DiscoveryStrategy, InMemoryStrategy, RedisStrategy, ServiceDiscovery};

pub mod error;
pub use error::{IntegrationError, Result};

pub mod facade;
pub use facade::IntegrationFacade;

pub mod logging;
pub use logging::{init_logging, LoggingConfig};

pub mod mediator;
pub use mediator::{handler_fn, BroadcastOutcome, RequestHandler, RequestMediator};

pub mod models;
pub use models::{
    HealthStatus, ServiceInfo, ServiceStatus, ServiceType, SystemHealth, WorkflowRequest, WorkflowResponse,
    WorkflowStatus, WorkflowType,
};

pub mod resilience;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};

pub mod workflows;

pub mod util;

#[cfg(test)]
mod tests;
