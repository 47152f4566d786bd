//! TTL-bounded read cache in front of the discovery strategy
//!
//! Entries are keyed by id, by "all services" and by type. Staleness is
//! bounded by the TTL; mutations invalidate the affected keys explicitly.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::{ServiceInfo, ServiceType};

/// Key of a cached service listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKey {
    All,
    ByType(ServiceType),
}

impl ListKey {
    pub fn for_type(service_type: Option<ServiceType>) -> Self {
        service_type.map_or(ListKey::All, ListKey::ByType)
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn live(&self, now: Instant) -> Option<T> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

#[derive(Debug)]
pub struct DiscoveryCache {
    ttl: Duration,
    services: DashMap<String, Entry<ServiceInfo>>,
    lists: DashMap<ListKey, Entry<Vec<ServiceInfo>>>,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            services: DashMap::new(),
            lists: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_service(&self, service_id: &str) -> Option<ServiceInfo> {
        let now = Instant::now();
        let hit = self.services.get(service_id).and_then(|entry| entry.live(now));
        if hit.is_none() {
            self.services.remove_if(service_id, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    pub fn put_service(&self, info: &ServiceInfo) {
        self.services.insert(
            info.service_id.clone(),
            Entry {
                value: info.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get_list(&self, key: ListKey) -> Option<Vec<ServiceInfo>> {
        let now = Instant::now();
        let hit = self.lists.get(&key).and_then(|entry| entry.live(now));
        if hit.is_none() {
            self.lists.remove_if(&key, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    pub fn put_list(&self, key: ListKey, services: &[ServiceInfo]) {
        self.lists.insert(
            key,
            Entry {
                value: services.to_vec(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop everything a change to `service_id` of `service_type` could affect
    pub fn invalidate(&self, service_id: &str, service_type: Option<ServiceType>) {
        self.services.remove(service_id);
        self.lists.remove(&ListKey::All);
        match service_type {
            Some(service_type) => {
                self.lists.remove(&ListKey::ByType(service_type));
            }
            // Unknown type: every typed listing may hold the record
            None => self.lists.retain(|key, _| *key == ListKey::All),
        }
    }

    pub fn clear(&self) {
        self.services.clear();
        self.lists.clear();
    }
}
