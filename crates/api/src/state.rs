//! Application state

use std::sync::Arc;

use leadforge_billing::BillingService;
use leadforge_shared::{QueryCache, RateLimiter};
use sqlx::PgPool;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
    /// Read-through cache for balance/subscription queries; purchase
    /// fulfilment invalidates per-user prefixes.
    pub cache: QueryCache,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, rate_limiter: RateLimiter) -> anyhow::Result<Self> {
        let jwt_manager = JwtManager::new(
            &config.jwt_secret,
            config.jwt_expiry_hours,
            config.refresh_expiry_days,
        );

        let billing = BillingService::from_env(pool.clone())
            .map(Arc::new)
            .map_err(|e| anyhow::anyhow!("Stripe billing not configured: {e}"))?;
        tracing::info!("Stripe billing service initialized");

        let cache = QueryCache::default();
        tracing::info!("Query cache initialized");

        Ok(Self {
            pool,
            config,
            jwt_manager,
            billing,
            cache,
            rate_limiter,
        })
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            pool: self.pool.clone(),
        }
    }
}
