//! Shared fixtures for component tests

use std::sync::Arc;
use std::time::Duration;

use crate::config::IntegrationConfig;
use crate::discovery::ServiceDiscovery;
use crate::facade::IntegrationFacade;
use crate::models::{ServiceInfo, ServiceType};
use crate::resilience::CircuitBreakerConfig;

/// Configuration with short timings so tests run in milliseconds
pub fn fast_config() -> IntegrationConfig {
    let mut config = IntegrationConfig::default();
    config.discovery.cache_ttl = Duration::from_millis(25);
    config.discovery.heartbeat_interval = Duration::from_millis(20);
    config.discovery.service_ttl = Duration::from_secs(60);
    config.client.timeout = Duration::from_secs(5);
    config.workflow.poll_interval = Duration::from_millis(10);
    config.workflow.max_poll_duration = Duration::from_secs(5);
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_secs(60),
        half_open_max_calls: 1,
    };
    config
}

pub fn discovery(config: &IntegrationConfig) -> Arc<ServiceDiscovery> {
    Arc::new(ServiceDiscovery::in_memory(config.discovery.clone()))
}

pub fn facade(config: &IntegrationConfig) -> IntegrationFacade {
    let facade = IntegrationFacade::new(discovery(config), config);
    facade.register_default_workflows();
    facade
}

pub fn service(id: &str, service_type: ServiceType, base_url: &str) -> ServiceInfo {
    ServiceInfo::new(id, service_type, "1.0.0", base_url).with_id(id)
}
