//! Service discovery
//!
//! `ServiceDiscovery` is a caching facade over a pluggable
//! `DiscoveryStrategy`. It tracks heartbeats and owns the background
//! monitor that marks silent services OFFLINE.
//!
//! "Not found" is an ordinary outcome here and is returned as `None`;
//! `require` and `require_by_type` turn it into `ServiceNotFound` for
//! callers that cannot proceed without a target.

pub mod cache;
mod memory;
mod monitor;
mod redis_strategy;

pub use cache::{DiscoveryCache, ListKey};
pub use memory::InMemoryStrategy;
pub use redis_strategy::RedisStrategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{DiscoveryBackend, DiscoveryConfig};
use crate::error::{IntegrationError, Result};
use crate::models::{ServiceInfo, ServiceStatus, ServiceType};
use monitor::HeartbeatMonitor;

/// Storage behind service discovery
///
/// Implementations must provide set-with-expiry semantics: a record not
/// refreshed by `register`, `update_status` or `update_heartbeat` within
/// the service TTL disappears.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Insert or replace a record and add it to its type index
    async fn register(&self, info: &ServiceInfo) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    async fn unregister(&self, service_id: &str) -> Result<bool>;

    async fn get(&self, service_id: &str) -> Result<Option<ServiceInfo>>;

    /// Every live record, optionally restricted to one type, regardless of status
    async fn list(&self, service_type: Option<ServiceType>) -> Result<Vec<ServiceInfo>>;

    async fn update_status(&self, service_id: &str, status: ServiceStatus) -> Result<Option<ServiceInfo>>;

    /// Apply a heartbeat received at `at`; see [`apply_heartbeat`]
    async fn update_heartbeat(&self, service_id: &str, at: DateTime<Utc>) -> Result<Option<ServiceInfo>>;
}

/// Heartbeat semantics shared by every strategy: `last_heartbeat` never
/// moves backwards, and an OFFLINE service comes back ONLINE. DEGRADED and
/// MAINTENANCE are operator-set and survive heartbeats.
pub fn apply_heartbeat(info: &mut ServiceInfo, at: DateTime<Utc>) {
    info.touch_heartbeat(at);
    if info.status == ServiceStatus::Offline {
        info.status = ServiceStatus::Online;
    }
}

pub struct ServiceDiscovery {
    strategy: Arc<dyn DiscoveryStrategy>,
    cache: DiscoveryCache,
    config: DiscoveryConfig,
    monitor: HeartbeatMonitor,
}

impl std::fmt::Debug for ServiceDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDiscovery")
            .field("strategy", &self.strategy.name())
            .field("config", &self.config)
            .field("monitor_running", &self.monitor.is_running())
            .finish()
    }
}

impl ServiceDiscovery {
    pub fn new(strategy: Arc<dyn DiscoveryStrategy>, config: DiscoveryConfig) -> Self {
        Self {
            cache: DiscoveryCache::new(config.cache_ttl),
            monitor: HeartbeatMonitor::new(config.heartbeat_interval),
            strategy,
            config,
        }
    }

    /// Discovery over a process-local store
    pub fn in_memory(config: DiscoveryConfig) -> Self {
        let strategy = Arc::new(InMemoryStrategy::new(config.service_ttl));
        Self::new(strategy, config)
    }

    /// Build discovery over the backend selected in `config`
    pub async fn from_config(config: DiscoveryConfig) -> Result<Self> {
        let strategy: Arc<dyn DiscoveryStrategy> = match config.backend {
            DiscoveryBackend::Memory => Arc::new(InMemoryStrategy::new(config.service_ttl)),
            DiscoveryBackend::Redis => Arc::new(
                RedisStrategy::connect(&config.redis_url, config.key_prefix.clone(), config.service_ttl).await?,
            ),
        };
        info!(backend = strategy.name(), "Service discovery initialized");
        Ok(Self::new(strategy, config))
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Register (or re-register) a service
    pub async fn register(&self, info: ServiceInfo) -> Result<ServiceInfo> {
        if info.service_id.trim().is_empty() {
            return Err(IntegrationError::discovery("Service id must not be empty"));
        }
        if info.base_url.trim().is_empty() {
            return Err(IntegrationError::discovery(format!(
                "Service {} has no base URL",
                info.service_id
            )));
        }

        self.strategy.register(&info).await?;
        // Re-registration may change the type, so typed listings are all suspect
        self.cache.invalidate(&info.service_id, None);

        info!(
            service_id = %info.service_id,
            name = %info.name,
            service_type = %info.service_type,
            base_url = %info.base_url,
            "Service registered"
        );
        Ok(info)
    }

    /// Remove a service. Returns whether it was registered.
    pub async fn unregister(&self, service_id: &str) -> Result<bool> {
        let removed = self.strategy.unregister(service_id).await?;
        self.cache.invalidate(service_id, None);

        if removed {
            info!(service_id = %service_id, "Service unregistered");
        } else {
            debug!(service_id = %service_id, "Unregister of unknown service ignored");
        }
        Ok(removed)
    }

    pub async fn get(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        if let Some(info) = self.cache.get_service(service_id) {
            return Ok(Some(info));
        }

        let found = self.strategy.get(service_id).await?;
        if let Some(ref info) = found {
            self.cache.put_service(info);
        }
        Ok(found)
    }

    /// Like `get`, but a missing service is an error
    pub async fn require(&self, service_id: &str) -> Result<ServiceInfo> {
        self.get(service_id)
            .await?
            .ok_or_else(|| IntegrationError::not_found(format!("Service not found: {}", service_id)))
    }

    /// First available service of a type. No load balancing: the earliest
    /// registered instance wins.
    pub async fn get_by_type(&self, service_type: ServiceType) -> Result<Option<ServiceInfo>> {
        Ok(self.find(Some(service_type), false).await?.into_iter().next())
    }

    pub async fn require_by_type(&self, service_type: ServiceType) -> Result<ServiceInfo> {
        self.get_by_type(service_type)
            .await?
            .ok_or_else(|| IntegrationError::not_found(format!("No available service of type {}", service_type)))
    }

    /// List services, optionally of one type, ordered by registration time
    pub async fn find(&self, service_type: Option<ServiceType>, include_offline: bool) -> Result<Vec<ServiceInfo>> {
        let key = ListKey::for_type(service_type);
        let services = match self.cache.get_list(key) {
            Some(services) => services,
            None => {
                let mut services = self.strategy.list(service_type).await?;
                services.sort_by(|a, b| {
                    a.registered_at
                        .cmp(&b.registered_at)
                        .then_with(|| a.service_id.cmp(&b.service_id))
                });
                self.cache.put_list(key, &services);
                services
            }
        };

        Ok(services
            .into_iter()
            .filter(|info| include_offline || info.is_online())
            .collect())
    }

    pub async fn update_status(&self, service_id: &str, status: ServiceStatus) -> Result<Option<ServiceInfo>> {
        let updated = self.strategy.update_status(service_id, status).await?;
        self.cache
            .invalidate(service_id, updated.as_ref().map(|info| info.service_type));

        match updated {
            Some(ref info) => info!(service_id = %service_id, status = %info.status, "Service status updated"),
            None => debug!(service_id = %service_id, "Status update for unknown service ignored"),
        }
        Ok(updated)
    }

    /// Record a heartbeat now. An OFFLINE service comes back ONLINE.
    pub async fn update_heartbeat(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        let updated = self.strategy.update_heartbeat(service_id, Utc::now()).await?;
        self.cache
            .invalidate(service_id, updated.as_ref().map(|info| info.service_type));

        if updated.is_none() {
            debug!(service_id = %service_id, "Heartbeat for unknown service ignored");
        }
        Ok(updated)
    }

    /// Mark the service OFFLINE if its last heartbeat is older than twice
    /// the cache TTL. Returns the resulting status, or `None` if unknown.
    pub async fn check_health(&self, service_id: &str) -> Result<Option<ServiceStatus>> {
        let info = match self.strategy.get(service_id).await? {
            Some(info) => info,
            None => {
                self.cache.invalidate(service_id, None);
                return Ok(None);
            }
        };

        let age = Utc::now()
            .signed_duration_since(info.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if info.status == ServiceStatus::Offline || age <= self.config.offline_after() {
            return Ok(Some(info.status));
        }

        let updated = self.strategy.update_status(service_id, ServiceStatus::Offline).await?;
        self.cache.invalidate(service_id, Some(info.service_type));
        metrics::increment_counter!("integration_services_marked_offline_total");
        warn!(
            service_id = %service_id,
            name = %info.name,
            heartbeat_age_secs = age.as_secs(),
            "Service marked OFFLINE: heartbeat expired"
        );

        Ok(Some(updated.map_or(ServiceStatus::Offline, |info| info.status)))
    }

    /// One monitor pass over every known service. Returns how many were
    /// marked OFFLINE. Per-service errors are logged and skipped.
    pub(crate) async fn sweep(&self) -> usize {
        let services = match self.strategy.list(None).await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, "Heartbeat sweep could not list services");
                return 0;
            }
        };

        let mut marked = 0;
        for info in services {
            let was_offline = info.status == ServiceStatus::Offline;
            match self.check_health(&info.service_id).await {
                Ok(Some(ServiceStatus::Offline)) if !was_offline => marked += 1,
                Ok(_) => {}
                Err(e) => warn!(service_id = %info.service_id, error = %e, "Health check failed"),
            }
        }
        marked
    }

    /// Start the background heartbeat monitor. Idempotent.
    pub fn start_health_monitor(self: &Arc<Self>) -> bool {
        self.monitor.start(Arc::downgrade(self))
    }

    /// Stop the monitor and wait for it to exit
    pub async fn stop_health_monitor(&self) {
        self.monitor.stop().await;
    }

    pub fn is_monitor_running(&self) -> bool {
        self.monitor.is_running()
    }

    /// Drop every cached read
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
