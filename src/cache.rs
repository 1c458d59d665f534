// =============================================================================
// ITEM CACHE MODULE
// =============================================================================
// Cache-aside for item lookups by code, backed by Redis.
//
// Keys carry an epoch: `inventory-flow:item:{epoch}:{code}`. A committed
// operation bumps the epoch with INCR, which orphans every cached lookup at
// once; the orphans expire on their TTL.
//
// Redis is optional and never authoritative. Every failure is logged and
// treated as a miss.
// =============================================================================

use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::metrics;
use crate::models::ScanItem;

const EPOCH_KEY: &str = "inventory-flow:epoch";

fn item_key(epoch: i64, code: &str) -> String {
    format!("inventory-flow:item:{epoch}:{code}")
}

#[derive(Clone)]
pub struct ItemCache {
    redis: Option<ConnectionManager>,
    ttl_secs: u64,
}

impl ItemCache {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            redis: Some(redis),
            ttl_secs,
        }
    }

    /// A cache that always misses
    pub fn disabled() -> Self {
        Self {
            redis: None,
            ttl_secs: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    async fn epoch(&self, conn: &mut ConnectionManager) -> redis::RedisResult<i64> {
        let epoch: Option<i64> = redis::cmd("GET").arg(EPOCH_KEY).query_async(conn).await?;
        Ok(epoch.unwrap_or(0))
    }

    async fn read(
        &self,
        conn: &mut ConnectionManager,
        code: &str,
    ) -> redis::RedisResult<Option<String>> {
        let epoch = self.epoch(conn).await?;
        redis::cmd("GET")
            .arg(item_key(epoch, code))
            .query_async(conn)
            .await
    }

    async fn write(
        &self,
        conn: &mut ConnectionManager,
        code: &str,
        json: String,
    ) -> redis::RedisResult<()> {
        let epoch = self.epoch(conn).await?;
        redis::cmd("SETEX")
            .arg(item_key(epoch, code))
            .arg(self.ttl_secs)
            .arg(json)
            .query_async(conn)
            .await
    }

    pub async fn get(&self, code: &str) -> Option<ScanItem> {
        let mut conn = self.redis.clone()?;

        match self.read(&mut conn, code).await {
            Ok(Some(json)) => match serde_json::from_str::<ScanItem>(&json) {
                Ok(item) => {
                    debug!(code, "Item cache hit");
                    metrics::record_cache_operation("get", "hit");
                    Some(item)
                }
                Err(err) => {
                    warn!(code, error = %err, "Discarding unreadable cached item");
                    metrics::record_cache_operation("get", "error");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_operation("get", "miss");
                None
            }
            Err(err) => {
                warn!(code, error = %err, "Item cache read failed");
                metrics::record_cache_operation("get", "error");
                None
            }
        }
    }

    pub async fn set(&self, code: &str, item: &ScanItem) {
        let Some(mut conn) = self.redis.clone() else {
            return;
        };
        let json = match serde_json::to_string(item) {
            Ok(json) => json,
            Err(err) => {
                warn!(code, error = %err, "Item not cacheable");
                return;
            }
        };

        match self.write(&mut conn, code, json).await {
            Ok(()) => metrics::record_cache_operation("set", "ok"),
            Err(err) => {
                warn!(code, error = %err, "Item cache write failed");
                metrics::record_cache_operation("set", "error");
            }
        }
    }

    /// Orphans every cached lookup. Called after a committed operation.
    pub async fn invalidate(&self) {
        let Some(mut conn) = self.redis.clone() else {
            return;
        };

        let bumped: redis::RedisResult<i64> =
            redis::cmd("INCR").arg(EPOCH_KEY).query_async(&mut conn).await;
        match bumped {
            Ok(epoch) => {
                debug!(epoch, "Item cache invalidated");
                metrics::record_cache_operation("invalidate", "ok");
            }
            Err(err) => {
                warn!(error = %err, "Item cache invalidation failed");
                metrics::record_cache_operation("invalidate", "error");
            }
        }
    }

    /// None when caching is off
    pub async fn ping(&self) -> Option<bool> {
        let mut conn = self.redis.clone()?;
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        Some(pong.is_ok())
    }
}
