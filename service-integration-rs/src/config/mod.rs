//! Configuration management for the integration runtime
//!
//! Values are looked up by key through a `ConfigProvider`, with typed
//! accessors and defaults layered on top. The process entry point reads
//! from the environment; tests use the in-memory provider.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, Result};
use crate::logging::LoggingConfig;
use crate::resilience::CircuitBreakerConfig;
use crate::util::parse_duration;

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|e| IntegrationError::configuration(format!("Invalid integer for key {}: {}", key, e)))
    }

    /// Get a boolean configuration value
    fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get_string(key)?;
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(IntegrationError::configuration(format!(
                "Invalid boolean value for key {}: {}",
                key, value
            ))),
        }
    }

    /// Get a duration such as "30s" or "250ms"; bare numbers are seconds
    fn get_duration(&self, key: &str) -> Result<Duration> {
        let value = self.get_string(key)?;
        parse_duration(&value)
            .ok_or_else(|| IntegrationError::configuration(format!("Invalid duration for key {}: {}", key, value)))
    }

    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    /// Missing keys fall back to the default; malformed values are errors
    fn get_int_or(&self, key: &str, default: i64) -> Result<i64> {
        or_default(self.get_int(key), self.get_string(key).is_ok(), default)
    }

    fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        or_default(self.get_bool(key), self.get_string(key).is_ok(), default)
    }

    fn get_duration_or(&self, key: &str, default: Duration) -> Result<Duration> {
        or_default(self.get_duration(key), self.get_string(key).is_ok(), default)
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

fn or_default<T>(parsed: Result<T>, present: bool, default: T) -> Result<T> {
    match parsed {
        Ok(value) => Ok(value),
        Err(_) if !present => Ok(default),
        Err(err) => Err(err),
    }
}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,

    /// Optional namespace for variables (e.g., "DISCOVERY")
    namespace: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Format a configuration key as an environment variable name
    fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        if let Some(ref namespace) = self.namespace {
            env_key.push_str(namespace);
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));
        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                IntegrationError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => {
                IntegrationError::configuration(format!("Environment variable is not valid unicode: {}", env_key))
            }
        })
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| IntegrationError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// Composite config provider that tries multiple providers in order
#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; earlier providers take precedence
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl ConfigProvider for CompositeConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        for provider in &self.providers {
            if let Ok(value) = provider.get_string(key) {
                return Ok(value);
            }
        }

        Err(IntegrationError::configuration(format!(
            "Configuration key not found in any provider: {}",
            key
        )))
    }
}

/// Storage used behind service discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryBackend {
    Memory,
    Redis,
}

impl FromStr for DiscoveryBackend {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(DiscoveryBackend::Memory),
            "redis" => Ok(DiscoveryBackend::Redis),
            other => Err(IntegrationError::configuration(format!("Unknown discovery backend: {}", other))),
        }
    }
}

/// Service discovery settings
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    pub backend: DiscoveryBackend,
    pub redis_url: String,
    /// Records live under `<key_prefix>:<id>`, type indexes under `<key_prefix>:type:<type>`
    pub key_prefix: String,
    /// Lifetime of a record in the store without re-registration or heartbeat
    pub service_ttl: Duration,
    /// Local read cache window; heartbeats older than twice this mark a service OFFLINE
    pub cache_ttl: Duration,
    /// Interval between heartbeat monitor sweeps
    pub heartbeat_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend: DiscoveryBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "service".to_string(),
            service_ttl: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl DiscoveryConfig {
    /// Age after which a silent service is considered offline
    pub fn offline_after(&self) -> Duration {
        self.cache_ttl * 2
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Default per-request timeout
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("Phoenix-Service-Integration/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Workflow execution settings
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Interval between status polls of a long running remote execution
    pub poll_interval: Duration,
    /// Upper bound on how long a workflow keeps polling
    pub max_poll_duration: Duration,
    /// Most agents one tactical plan may ask a workflow to create
    pub max_agents_per_plan: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_duration: Duration::from_secs(600),
            max_agents_per_plan: 50,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default)]
pub struct IntegrationConfig {
    pub discovery: DiscoveryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub client: ClientConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

impl IntegrationConfig {
    /// Load configuration from a config provider, falling back to defaults
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = IntegrationConfig::default();

        let backend = match provider.get_string("discovery_backend") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.discovery.backend,
        };

        let discovery = DiscoveryConfig {
            backend,
            redis_url: provider.get_string_or("discovery_redis_url", &defaults.discovery.redis_url),
            key_prefix: provider.get_string_or("discovery_key_prefix", &defaults.discovery.key_prefix),
            service_ttl: provider.get_duration_or("discovery_service_ttl", defaults.discovery.service_ttl)?,
            cache_ttl: provider.get_duration_or("discovery_cache_ttl", defaults.discovery.cache_ttl)?,
            heartbeat_interval: provider
                .get_duration_or("discovery_heartbeat_interval", defaults.discovery.heartbeat_interval)?,
        };

        let failure_threshold = provider.get_int_or(
            "breaker_failure_threshold",
            i64::from(defaults.circuit_breaker.failure_threshold),
        )?;
        let half_open_max_calls = provider.get_int_or(
            "breaker_half_open_max_calls",
            i64::from(defaults.circuit_breaker.half_open_max_calls),
        )?;
        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: to_u32("breaker_failure_threshold", failure_threshold)?,
            reset_timeout: provider.get_duration_or("breaker_reset_timeout", defaults.circuit_breaker.reset_timeout)?,
            half_open_max_calls: to_u32("breaker_half_open_max_calls", half_open_max_calls)?,
        };

        let client = ClientConfig {
            timeout: provider.get_duration_or("client_timeout", defaults.client.timeout)?,
            user_agent: provider.get_string_or("client_user_agent", &defaults.client.user_agent),
        };

        let max_agents = provider.get_int_or(
            "workflow_max_agents",
            i64::from(defaults.workflow.max_agents_per_plan),
        )?;
        let workflow = WorkflowConfig {
            poll_interval: provider.get_duration_or("workflow_poll_interval", defaults.workflow.poll_interval)?,
            max_poll_duration: provider
                .get_duration_or("workflow_max_poll_duration", defaults.workflow.max_poll_duration)?,
            max_agents_per_plan: to_u32("workflow_max_agents", max_agents)?,
        };

        let logging = LoggingConfig {
            level: provider.get_string_or("log_level", &defaults.logging.level),
            json_format: provider.get_bool_or("log_json", defaults.logging.json_format)?,
            service_name: provider.get_string_or("service_name", &defaults.logging.service_name),
        };

        let config = Self {
            discovery,
            circuit_breaker,
            client,
            workflow,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.discovery.backend == DiscoveryBackend::Redis && self.discovery.redis_url.trim().is_empty() {
            return Err(IntegrationError::configuration("Redis URL is required for the redis discovery backend"));
        }
        if self.discovery.key_prefix.is_empty() {
            return Err(IntegrationError::configuration("Discovery key prefix must not be empty"));
        }
        if self.discovery.service_ttl.as_secs() == 0 {
            return Err(IntegrationError::configuration("Service TTL must be at least one second"));
        }
        for (name, value) in [
            ("discovery cache TTL", self.discovery.cache_ttl),
            ("heartbeat interval", self.discovery.heartbeat_interval),
            ("client timeout", self.client.timeout),
            ("workflow poll interval", self.workflow.poll_interval),
            ("workflow max poll duration", self.workflow.max_poll_duration),
        ] {
            if value.is_zero() {
                return Err(IntegrationError::configuration(format!("{} must be greater than zero", name)));
            }
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(IntegrationError::configuration("Circuit breaker failure threshold must be at least 1"));
        }
        if self.circuit_breaker.half_open_max_calls == 0 {
            return Err(IntegrationError::configuration("Circuit breaker must admit at least one half-open call"));
        }
        Ok(())
    }
}

fn to_u32(key: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| IntegrationError::configuration(format!("Value out of range for {}: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_provider() {
        let mut provider = MemoryConfigProvider::new();
        provider.set("key1", "value1");
        provider.set("key2", "123");
        provider.set("key3", "250ms");

        assert_eq!(provider.get_string("key1").unwrap(), "value1");
        assert_eq!(provider.get_int("key2").unwrap(), 123);
        assert_eq!(provider.get_duration("key3").unwrap(), Duration::from_millis(250));
        assert!(provider.get_string("missing").is_err());
        assert_eq!(provider.get_int_or("missing", 9).unwrap(), 9);
        assert!(provider.get_int_or("key1", 9).is_err());
    }

    #[test]
    fn test_env_key_format() {
        let provider = EnvConfigProvider::new().with_prefix("INTEGRATION").with_namespace("TEST");

        assert_eq!(provider.format_key("cache_ttl"), "INTEGRATION_TEST_CACHE_TTL");
        assert_eq!(provider.format_key("redis-url"), "INTEGRATION_TEST_REDIS_URL");
    }

    #[test]
    fn test_composite_provider_precedence() {
        let mut overrides = MemoryConfigProvider::new();
        overrides.set("discovery_cache_ttl", "5s");
        let mut base = MemoryConfigProvider::new();
        base.set("discovery_cache_ttl", "60s");
        base.set("discovery_key_prefix", "svc");

        let provider = CompositeConfigProvider::new().with_provider(overrides).with_provider(base);
        let config = IntegrationConfig::from_provider(&provider).unwrap();
        assert_eq!(config.discovery.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.discovery.key_prefix, "svc");
        assert!(provider.get_string("missing").is_err());
    }

    #[test]
    fn test_defaults_from_empty_provider() {
        let config = IntegrationConfig::from_provider(&MemoryConfigProvider::new()).unwrap();
        assert_eq!(config.discovery.backend, DiscoveryBackend::Memory);
        assert_eq!(config.discovery.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.discovery.offline_after(), Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.workflow.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_overrides_and_validation() {
        let mut provider = MemoryConfigProvider::new();
        provider.set("discovery_backend", "redis");
        provider.set("discovery_redis_url", "redis://cache:6379/2");
        provider.set("breaker_failure_threshold", "3");
        provider.set("breaker_reset_timeout", "10s");
        provider.set("workflow_poll_interval", "500ms");
        provider.set("log_json", "yes");

        let config = IntegrationConfig::from_provider(&provider).unwrap();
        assert_eq!(config.discovery.backend, DiscoveryBackend::Redis);
        assert_eq!(config.discovery.redis_url, "redis://cache:6379/2");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(10));
        assert_eq!(config.workflow.poll_interval, Duration::from_millis(500));
        assert!(config.logging.json_format);

        provider.set("breaker_failure_threshold", "0");
        assert!(IntegrationConfig::from_provider(&provider).is_err());

        let mut provider = MemoryConfigProvider::new();
        provider.set("discovery_backend", "etcd");
        assert!(IntegrationConfig::from_provider(&provider).is_err());
    }
}
