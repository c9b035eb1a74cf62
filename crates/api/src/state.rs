//! Shared application state for the Axum API server.

use mailcast_common::config::AppConfig;
use mailcast_engine::cache::CampaignCache;
use mailcast_engine::campaign::CampaignService;
use mailcast_engine::contacts::ContactService;
use mailcast_engine::dispatcher::CampaignDispatcher;
use mailcast_engine::pg_store::PgStore;
use mailcast_notifier::DeliveryMailer;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub redis: ConnectionManager,
    pub config: AppConfig,
    pub mailer: DeliveryMailer,
}

impl AppState {
    pub fn new(pool: PgPool, redis: ConnectionManager, config: AppConfig) -> Self {
        let mailer = DeliveryMailer::from_config(&config);
        Self {
            pool,
            redis,
            config,
            mailer,
        }
    }

    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }

    pub fn cache(&self) -> CampaignCache {
        CampaignCache::new(self.redis.clone(), self.config.cache_ttl_seconds)
    }

    pub fn campaigns(&self) -> CampaignService<PgStore, CampaignCache> {
        CampaignService::new(self.store(), self.cache())
    }

    pub fn contacts(&self) -> ContactService<PgStore> {
        ContactService::new(self.store())
    }

    pub fn dispatcher(&self) -> CampaignDispatcher<PgStore, CampaignCache, DeliveryMailer> {
        CampaignDispatcher::new(
            self.store(),
            self.cache(),
            self.mailer.clone(),
            self.config.email_from.clone(),
        )
    }
}
