//! Campaign cache: Redis-backed read-through cache with key invalidation.
//!
//! Single campaigns and per-project campaign listings are cached as JSON with a
//! TTL. Every successful campaign mutation publishes `campaign_changed`, which
//! deletes both keys. Redis failures on the read path fall back to the loader.

use std::future::Future;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use mailcast_common::error::AppError;

use crate::store::ChangeNotifier;

/// Redis-backed campaign cache.
#[derive(Clone)]
pub struct CampaignCache {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl CampaignCache {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    pub fn campaign_key(campaign_id: Uuid) -> String {
        format!("campaign:{}", campaign_id)
    }

    pub fn project_campaigns_key(project_id: Uuid) -> String {
        format!("project:{}:campaigns", project_id)
    }

    /// Return the cached value for `key`, or run `load` and cache its result.
    ///
    /// Loader errors are returned as-is and never cached.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, load: F) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, AppError>> + Send,
    {
        let mut conn = self.redis.clone();

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => tracing::warn!(key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "Cache read failed, loading from database"),
        }

        let value = load().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = conn.set_ex::<_, _, ()>(key, raw, self.ttl_seconds).await {
                    tracing::warn!(key, error = %e, "Cache write failed");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "Value not cacheable"),
        }

        Ok(value)
    }

    /// Drop the cached campaign and its project's listing.
    pub async fn invalidate(&self, project_id: Uuid, campaign_id: Uuid) -> Result<(), AppError> {
        let keys = vec![
            Self::campaign_key(campaign_id),
            Self::project_campaigns_key(project_id),
        ];
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(keys).await?;

        tracing::debug!(
            project_id = %project_id,
            campaign_id = %campaign_id,
            "Campaign cache invalidated"
        );
        Ok(())
    }
}

impl ChangeNotifier for CampaignCache {
    async fn campaign_changed(&self, project_id: Uuid, campaign_id: Uuid) -> Result<(), AppError> {
        self.invalidate(project_id, campaign_id).await
    }
}
