//! Redis-backed discovery store
//!
//! Layout:
//! - `<prefix>:<service_id>` holds the JSON `ServiceInfo`, with `SET EX` set
//!   to the service TTL
//! - `<prefix>:type:<SERVICE_TYPE>` is a set of ids of that type
//!
//! Index sets are not expired with the records they point to; ids whose
//! record is gone are pruned when the index is read.
//!
//! Status and heartbeat updates are read-modify-write. The write is a
//! compare-and-set script that only lands if the record is unchanged since
//! the read, and the update is re-applied to a fresh copy otherwise.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::{apply_heartbeat, DiscoveryStrategy};
use crate::error::{IntegrationError, Result};
use crate::models::{ServiceInfo, ServiceStatus, ServiceType};

/// Replace KEYS[1] with ARGV[2] (TTL ARGV[3]) only if it still holds ARGV[1]
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

const MAX_UPDATE_ATTEMPTS: usize = 8;

pub struct RedisStrategy {
    conn: ConnectionManager,
    key_prefix: String,
    service_ttl: Duration,
    compare_and_set: redis::Script,
}

impl RedisStrategy {
    /// Connect to Redis at `redis_url`
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>, service_ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| IntegrationError::discovery(format!("Invalid Redis URL {}: {}", redis_url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| IntegrationError::discovery(format!("Failed to connect to Redis at {}: {}", redis_url, e)))?;

        let key_prefix = key_prefix.into();
        info!(prefix = %key_prefix, ttl_secs = service_ttl.as_secs(), "Connected to Redis discovery store");

        Ok(Self {
            conn,
            key_prefix,
            service_ttl,
            compare_and_set: redis::Script::new(COMPARE_AND_SET),
        })
    }

    fn record_key(&self, service_id: &str) -> String {
        format!("{}:{}", self.key_prefix, service_id)
    }

    fn type_key(&self, service_type: ServiceType) -> String {
        format!("{}:type:{}", self.key_prefix, service_type.as_str())
    }

    fn ttl_secs(&self) -> usize {
        self.service_ttl.as_secs().max(1) as usize
    }

    async fn read_raw(&self, service_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(self.record_key(service_id)).await?)
    }

    async fn read(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        self.read_raw(service_id)
            .await?
            .map(|json| serde_json::from_str(&json).map_err(IntegrationError::from))
            .transpose()
    }

    /// Fetch many records in one round trip, keeping ids aligned with results
    async fn read_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    /// Apply `apply` to the stored record, retrying if a concurrent writer
    /// changed it between the read and the write
    async fn modify<F>(&self, service_id: &str, apply: F) -> Result<Option<ServiceInfo>>
    where
        F: Fn(&mut ServiceInfo) + Send + Sync,
    {
        let key = self.record_key(service_id);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let original = match self.read_raw(service_id).await? {
                Some(raw) => raw,
                None => return Ok(None),
            };
            let mut info: ServiceInfo = serde_json::from_str(&original)?;
            apply(&mut info);
            let updated = serde_json::to_string(&info)?;

            let mut conn = self.conn.clone();
            let written: i64 = self
                .compare_and_set
                .key(&key)
                .arg(&original)
                .arg(&updated)
                .arg(self.ttl_secs())
                .invoke_async(&mut conn)
                .await?;
            if written == 1 {
                return Ok(Some(info));
            }
            debug!(service_id = %service_id, attempt, "Record changed during update, retrying");
        }

        Err(IntegrationError::discovery(format!(
            "Gave up updating {} after {} conflicting writes",
            service_id, MAX_UPDATE_ATTEMPTS
        )))
    }

    fn decode(key: &str, raw: &str) -> Option<ServiceInfo> {
        match serde_json::from_str(raw) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping malformed service record");
                None
            }
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for RedisStrategy {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        let previous = self.read(&info.service_id).await?;
        let json = serde_json::to_string(info)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(self.record_key(&info.service_id), json, self.ttl_secs())
            .ignore()
            .sadd(self.type_key(info.service_type), &info.service_id)
            .ignore();
        if let Some(previous) = previous.filter(|p| p.service_type != info.service_type) {
            pipe.srem(self.type_key(previous.service_type), &info.service_id).ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn unregister(&self, service_id: &str) -> Result<bool> {
        let info = match self.read(service_id).await? {
            Some(info) => info,
            None => return Ok(false),
        };

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(self.record_key(service_id))
            .ignore()
            .srem(self.type_key(info.service_type), service_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(true)
    }

    async fn get(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        self.read(service_id).await
    }

    async fn list(&self, service_type: Option<ServiceType>) -> Result<Vec<ServiceInfo>> {
        match service_type {
            Some(service_type) => {
                let index_key = self.type_key(service_type);
                let mut conn = self.conn.clone();
                let ids: Vec<String> = conn.smembers(&index_key).await?;
                let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
                let values = self.read_many(&keys).await?;

                let mut services = Vec::with_capacity(ids.len());
                let mut stale = Vec::new();
                for ((id, key), raw) in ids.into_iter().zip(&keys).zip(values) {
                    match raw {
                        Some(raw) => services.extend(Self::decode(key, &raw)),
                        None => stale.push(id),
                    }
                }

                if !stale.is_empty() {
                    debug!(index = %index_key, count = stale.len(), "Pruning expired ids from type index");
                    conn.srem::<_, _, ()>(&index_key, stale).await?;
                }
                Ok(services)
            }
            None => {
                let type_prefix = format!("{}:type:", self.key_prefix);
                let mut conn = self.conn.clone();
                let mut keys = Vec::new();
                {
                    let mut iter: redis::AsyncIter<String> =
                        conn.scan_match(format!("{}:*", self.key_prefix)).await?;
                    while let Some(key) = iter.next_item().await {
                        if !key.starts_with(&type_prefix) {
                            keys.push(key);
                        }
                    }
                }

                let values = self.read_many(&keys).await?;
                Ok(keys
                    .iter()
                    .zip(values)
                    .filter_map(|(key, raw)| raw.and_then(|raw| Self::decode(key, &raw)))
                    .collect())
            }
        }
    }

    async fn update_status(&self, service_id: &str, status: ServiceStatus) -> Result<Option<ServiceInfo>> {
        self.modify(service_id, move |info| info.status = status).await
    }

    async fn update_heartbeat(&self, service_id: &str, at: DateTime<Utc>) -> Result<Option<ServiceInfo>> {
        self.modify(service_id, move |info| apply_heartbeat(info, at)).await
    }
}
