use anyhow::Result;
use std::sync::Arc;

use auction_market_api::cache::RedisCache;
use auction_market_api::core::{self, Config, HealthChecker};
use auction_market_api::query::{AuctionQueryEngine, CachedAggregator};
use auction_market_api::server::{self, AppContext};
use auction_market_api::store::RedisStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    core::logging::init_logging(&config.monitoring.log_level);

    tracing::info!("🚀 Auction market API starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Connect to the marketplace index
    let client = redis::Client::open(config.redis.url.as_str())?;
    let conn = client.get_multiplexed_tokio_connection().await?;
    tracing::info!("✅ Connected to index at {}", config.redis.url);

    let store = Arc::new(RedisStore::new(conn.clone()));
    let cache = Arc::new(RedisCache::new(conn));

    let health = Arc::new(HealthChecker::new());
    health.update_component("store", true).await;
    health.update_component("cache", true).await;

    let ctx = Arc::new(AppContext {
        aggregator: Arc::new(CachedAggregator::new(store.clone(), cache)),
        auctions: Arc::new(AuctionQueryEngine::new(store)),
        health,
    });

    tracing::info!("✅ Query API listening on port {}", config.server.port);
    warp::serve(server::routes(ctx))
        .run(([0, 0, 0, 0], config.server.port))
        .await;

    Ok(())
}
