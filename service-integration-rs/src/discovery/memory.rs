//! In-process discovery store
//!
//! Mirrors the Redis layout: one record per id that expires after the
//! service TTL, plus a per-type index that is pruned lazily when it points
//! at expired records.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{apply_heartbeat, DiscoveryStrategy};
use crate::error::Result;
use crate::models::{ServiceInfo, ServiceStatus, ServiceType};

#[derive(Debug, Clone)]
struct StoredRecord {
    info: ServiceInfo,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryStrategy {
    service_ttl: Duration,
    records: DashMap<String, StoredRecord>,
    type_index: DashMap<ServiceType, HashSet<String>>,
}

impl InMemoryStrategy {
    pub fn new(service_ttl: Duration) -> Self {
        Self {
            service_ttl,
            records: DashMap::new(),
            type_index: DashMap::new(),
        }
    }

    fn live(&self, service_id: &str) -> Option<ServiceInfo> {
        let now = Instant::now();
        let found = self
            .records
            .get(service_id)
            .map(|record| (record.expires_at > now, record.info.clone()));

        match found {
            Some((true, info)) => Some(info),
            Some((false, _)) => {
                self.records.remove_if(service_id, |_, record| record.expires_at <= now);
                debug!(service_id = %service_id, "Discarded expired service record");
                None
            }
            None => None,
        }
    }

    fn store(&self, info: ServiceInfo) {
        self.records.insert(
            info.service_id.clone(),
            StoredRecord {
                info,
                expires_at: Instant::now() + self.service_ttl,
            },
        );
    }

    /// Read-modify-write one live record, refreshing its TTL
    fn modify<F>(&self, service_id: &str, apply: F) -> Option<ServiceInfo>
    where
        F: FnOnce(&mut ServiceInfo),
    {
        let now = Instant::now();
        let mut record = self.records.get_mut(service_id)?;
        if record.expires_at <= now {
            return None;
        }
        apply(&mut record.info);
        record.expires_at = now + self.service_ttl;
        Some(record.info.clone())
    }
}

#[async_trait]
impl DiscoveryStrategy for InMemoryStrategy {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        let previous_type = self.records.get(&info.service_id).map(|r| r.info.service_type);
        if let Some(previous_type) = previous_type.filter(|t| *t != info.service_type) {
            if let Some(mut ids) = self.type_index.get_mut(&previous_type) {
                ids.remove(&info.service_id);
            }
        }

        self.store(info.clone());
        self.type_index
            .entry(info.service_type)
            .or_default()
            .insert(info.service_id.clone());
        Ok(())
    }

    async fn unregister(&self, service_id: &str) -> Result<bool> {
        let removed = self.records.remove(service_id);
        match removed {
            Some((_, record)) => {
                if let Some(mut ids) = self.type_index.get_mut(&record.info.service_type) {
                    ids.remove(service_id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        Ok(self.live(service_id))
    }

    async fn list(&self, service_type: Option<ServiceType>) -> Result<Vec<ServiceInfo>> {
        match service_type {
            Some(service_type) => {
                let ids: Vec<String> = self
                    .type_index
                    .get(&service_type)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default();

                let mut services = Vec::with_capacity(ids.len());
                let mut stale = Vec::new();
                for id in ids {
                    match self.live(&id) {
                        Some(info) => services.push(info),
                        None => stale.push(id),
                    }
                }

                if !stale.is_empty() {
                    if let Some(mut ids) = self.type_index.get_mut(&service_type) {
                        for id in &stale {
                            ids.remove(id);
                        }
                    }
                }
                Ok(services)
            }
            None => {
                let now = Instant::now();
                self.records.retain(|_, record| record.expires_at > now);
                Ok(self.records.iter().map(|record| record.info.clone()).collect())
            }
        }
    }

    async fn update_status(&self, service_id: &str, status: ServiceStatus) -> Result<Option<ServiceInfo>> {
        Ok(self.modify(service_id, |info| info.status = status))
    }

    async fn update_heartbeat(&self, service_id: &str, at: DateTime<Utc>) -> Result<Option<ServiceInfo>> {
        Ok(self.modify(service_id, |info| apply_heartbeat(info, at)))
    }
}
