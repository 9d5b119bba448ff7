//! LeadForge API Server
//!
//! The main API server for LeadForge, providing authentication, lead
//! management, subscription and LeadCoin purchase endpoints, support
//! tickets, reporting, and the admin surface.

use std::net::SocketAddr;

use axum::http::{header, Method};
use leadforge_api::{routes::create_router, AppState, Config};
use leadforge_shared::{create_migration_pool, create_pool, run_migrations, RateLimiter};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leadforge_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LeadForge API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Migrations go through the direct URL: transaction-mode poolers
    // break prepared statements.
    tracing::info!("Running database migrations...");
    let migration_url = config
        .database_direct_url
        .as_ref()
        .unwrap_or(&config.database_url);
    let migration_pool = create_migration_pool(migration_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;
    tracing::info!("Database migrations complete");

    // Shared rate limiter when Redis is configured, otherwise per-process.
    let rate_limiter = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let manager = redis::aio::ConnectionManager::new(client).await?;
            tracing::info!("Rate limiter using Redis backend");
            RateLimiter::new_redis(manager)
        }
        None => {
            tracing::info!("Rate limiter using in-memory backend (REDIS_URL not set)");
            RateLimiter::new_in_memory()
        }
    };

    let state = AppState::new(pool, config.clone(), rate_limiter)?;

    // Explicit origin allowlist; credentials are allowed so the SPA can
    // use cookie auth.
    let allowed_origins: Vec<axum::http::HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    tracing::info!(
        allowed_origins = ?config.allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .expose_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
