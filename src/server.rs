use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{reply, Filter, Rejection, Reply};

use crate::core::HealthChecker;
use crate::query::time_range::TimeBound;
use crate::query::{AuctionQueryEngine, CachedAggregator, ListingQuery, QueryError};

pub struct AppContext {
    pub aggregator: Arc<CachedAggregator>,
    pub auctions: Arc<AuctionQueryEngine>,
    pub health: Arc<HealthChecker>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub show_auctions: bool,
}

pub fn routes(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(health_handler);

    let item_stats = warp::path!("items" / String / "auctions")
        .and(warp::get())
        .and(warp::query::<StatsParams>())
        .and(with_ctx(ctx.clone()))
        .and_then(item_stats_handler);

    let single_auction = warp::path!("auctions" / String)
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(single_auction_handler);

    let listing = warp::path!("auctions")
        .and(warp::get())
        .and(warp::query::<ListingQuery>())
        .and(with_ctx(ctx))
        .and_then(listing_handler);

    health.or(item_stats).or(single_auction).or(listing)
}

fn with_ctx(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

async fn health_handler(ctx: Arc<AppContext>) -> Result<impl Reply, Infallible> {
    let status = ctx.health.get_status().await;
    Ok(reply::json(&status))
}

async fn item_stats_handler(
    item_id: String,
    params: StatsParams,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Infallible> {
    let from = params.from.as_deref().map(TimeBound::from_param);
    let to = params.to.as_deref().map(TimeBound::from_param);
    Ok(
        match ctx
            .aggregator
            .query_item_prices(&item_id, from.as_ref(), to.as_ref(), params.show_auctions)
            .await
        {
            Ok(stats) => reply::with_status(reply::json(&stats), StatusCode::OK),
            Err(err) => error_reply(&err),
        },
    )
}

async fn single_auction_handler(
    uuid: String,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Infallible> {
    Ok(match ctx.auctions.get_auction(&uuid).await {
        Ok(Some(auction)) => reply::with_status(reply::json(&auction), StatusCode::OK),
        Ok(None) => reply::with_status(
            reply::json(&serde_json::json!({ "error": "auction not found" })),
            StatusCode::NOT_FOUND,
        ),
        Err(err) => error_reply(&err),
    })
}

async fn listing_handler(
    query: ListingQuery,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Infallible> {
    Ok(match ctx.auctions.list(&query).await {
        Ok(page) => reply::with_status(reply::json(&page), StatusCode::OK),
        Err(err) => error_reply(&err),
    })
}

fn error_reply(err: &QueryError) -> reply::WithStatus<reply::Json> {
    let status = match err {
        QueryError::InvalidRange(_) | QueryError::SortField(_) => StatusCode::BAD_REQUEST,
        QueryError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    reply::with_status(
        reply::json(&serde_json::json!({ "error": err.to_string() })),
        status,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MockKvStore;

    fn test_ctx(store: MockKvStore) -> Arc<AppContext> {
        let store = Arc::new(store);
        Arc::new(AppContext {
            aggregator: Arc::new(CachedAggregator::new(
                store.clone(),
                Arc::new(MemoryCache::new()),
            )),
            auctions: Arc::new(AuctionQueryEngine::new(store)),
            health: Arc::new(HealthChecker::new()),
        })
    }

    #[tokio::test]
    async fn health_endpoint_reports_status() {
        let routes = routes(test_ctx(MockKvStore::new()));
        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_sort_field_is_a_400() {
        let mut store = MockKvStore::new();
        store.expect_intersect().returning(|_| Ok(vec![]));
        store.expect_hash_get_all_bulk().returning(|_| Ok(vec![]));
        store.expect_get().returning(|_| Ok(None));

        let routes = routes(test_ctx(store));
        let response = warp::test::request()
            .path("/auctions?sortBy=bogus")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_time_range_is_a_400() {
        let routes = routes(test_ctx(MockKvStore::new()));
        let response = warp::test::request()
            .path("/items/HYPERION/auctions?from=whenever")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_auction_is_a_404() {
        let mut store = MockKvStore::new();
        store
            .expect_hash_get_all()
            .returning(|_| Ok(std::collections::HashMap::new()));

        let routes = routes(test_ctx(store));
        let response = warp::test::request()
            .path("/auctions/deadbeef")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
