use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::cache::Cache;
use crate::stats;
use crate::store::KvStore;

use super::error::QueryError;
use super::time_range::{resolve_range, TimeBound};
use super::types::{Auction, PriceStatistics};

const STATS_CACHE_TTL: Duration = Duration::from_secs(60);

/// Windowed price statistics for a single item id, memoized against the
/// cache. Cache keys use the resolved numeric window so equivalent inputs
/// expressed differently share one entry, and a single-flight gate keeps
/// concurrent identical misses from issuing redundant store queries.
pub struct CachedAggregator {
    store: Arc<dyn KvStore>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CachedAggregator {
    pub fn new(store: Arc<dyn KvStore>, cache: Arc<dyn Cache>) -> Self {
        Self {
            store,
            cache,
            cache_ttl: STATS_CACHE_TTL,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub async fn query_item_prices(
        &self,
        item_id: &str,
        from: Option<&TimeBound>,
        to: Option<&TimeBound>,
        show_auctions: bool,
    ) -> Result<PriceStatistics, QueryError> {
        let now_ms = Utc::now().timestamp_millis();
        let (from_ms, to_ms) = resolve_range(from, to, now_ms)?;
        let key = cache_key(item_id, from_ms, to_ms, show_auctions);

        let gate = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = gate.lock().await;

        let result = self
            .cached_compute(&key, item_id, from_ms, to_ms, show_auctions)
            .await;

        drop(guard);
        let mut in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.get(&key) {
            // The map's reference plus our clone: nobody else is waiting.
            if Arc::strong_count(entry) <= 2 {
                in_flight.remove(&key);
            }
        }

        result
    }

    async fn cached_compute(
        &self,
        key: &str,
        item_id: &str,
        from_ms: i64,
        to_ms: i64,
        show_auctions: bool,
    ) -> Result<PriceStatistics, QueryError> {
        if let Some(cached) = self.cache.get(key).await {
            match serde_json::from_str(&cached) {
                Ok(stats) => return Ok(stats),
                Err(err) => warn!("Discarding corrupt cache entry {}: {}", key, err),
            }
        }

        let stats = self
            .compute_statistics(item_id, from_ms, to_ms, show_auctions)
            .await
            .map_err(|err| {
                error!("Price statistics for {} failed: {}", item_id, err);
                err
            })?;

        match serde_json::to_string(&stats) {
            Ok(serialized) => self.cache.put(key, serialized, self.cache_ttl).await,
            Err(err) => warn!("Failed serializing statistics for {}: {}", key, err),
        }

        Ok(stats)
    }

    async fn compute_statistics(
        &self,
        item_id: &str,
        from_ms: i64,
        to_ms: i64,
        show_auctions: bool,
    ) -> Result<PriceStatistics, QueryError> {
        let members = self.store.range_by_score(item_id, from_ms, to_ms).await?;

        let mut sale_prices = Vec::new();
        let mut bin_prices = Vec::new();
        let mut by_end = BTreeMap::new();

        for raw in &members {
            let auction: Auction = match serde_json::from_str(raw) {
                Ok(auction) => auction,
                Err(err) => {
                    warn!("Skipping undecodable auction record for {}: {}", item_id, err);
                    continue;
                }
            };
            if let Some(price) = auction.sale_unit_price() {
                sale_prices.push(price);
            }
            if let Some(price) = auction.bin_unit_price() {
                bin_prices.push(price);
            }
            by_end.insert(auction.end, auction);
        }

        Ok(PriceStatistics {
            average_price: stats::average(&sale_prices),
            median_price: stats::median(&sale_prices),
            standard_deviation: stats::standard_deviation(&sale_prices),
            min_price: stats::min(&sale_prices),
            max_price: stats::max(&sale_prices),
            lowest_bin: stats::min(&bin_prices),
            sold: sale_prices.len() as u64,
            auctions: show_auctions.then_some(by_end),
        })
    }
}

fn cache_key(item_id: &str, from_ms: i64, to_ms: i64, show_auctions: bool) -> String {
    let detail = if show_auctions { ":detailed" } else { "" };
    format!("auctions:{}:{}:{}{}", item_id, from_ms, to_ms, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::{MockKvStore, StoreError};
    use serde_json::json;

    fn auction_json(uuid: &str, end: i64, bids: &[f64], count: u32) -> String {
        json!({
            "uuid": uuid,
            "end": end,
            "item": { "count": count },
            "bids": bids.iter().map(|amount| json!({ "amount": amount })).collect::<Vec<_>>(),
        })
        .to_string()
    }

    fn bin_auction_json(uuid: &str, end: i64, starting_bid: f64, count: u32) -> String {
        json!({
            "uuid": uuid,
            "end": end,
            "item": { "count": count },
            "bids": [],
            "bin": true,
            "starting_bid": starting_bid,
        })
        .to_string()
    }

    fn aggregator(store: MockKvStore) -> CachedAggregator {
        CachedAggregator::new(Arc::new(store), Arc::new(MemoryCache::new()))
    }

    fn window() -> (Option<TimeBound>, Option<TimeBound>) {
        (Some(TimeBound::Millis(0)), Some(TimeBound::Millis(10_000)))
    }

    #[tokio::test]
    async fn two_sales_average_and_median() {
        let mut store = MockKvStore::new();
        store.expect_range_by_score().times(1).returning(|_, _, _| {
            Ok(vec![
                auction_json("a", 1_000, &[10.0], 1),
                auction_json("b", 2_000, &[30.0], 1),
            ])
        });

        let (from, to) = window();
        let stats = aggregator(store)
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();

        assert_eq!(stats.average_price, 20.0);
        assert_eq!(stats.median_price, 20.0);
        assert_eq!(stats.sold, 2);
        assert_eq!(stats.min_price, 10.0);
        assert_eq!(stats.max_price, 30.0);
        assert!(stats.auctions.is_none());
    }

    #[tokio::test]
    async fn empty_window_is_all_zeros() {
        let mut store = MockKvStore::new();
        store
            .expect_range_by_score()
            .times(1)
            .returning(|_, _, _| Ok(vec![]));

        let (from, to) = window();
        let stats = aggregator(store)
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();

        assert_eq!(stats.sold, 0);
        assert_eq!(stats.average_price, 0.0);
        assert_eq!(stats.median_price, 0.0);
        assert_eq!(stats.standard_deviation, 0.0);
        assert_eq!(stats.min_price, 0.0);
        assert_eq!(stats.max_price, 0.0);
        assert_eq!(stats.lowest_bin, 0.0);
    }

    #[tokio::test]
    async fn lowest_bin_is_minimum_per_unit_asking_price() {
        let mut store = MockKvStore::new();
        store.expect_range_by_score().times(1).returning(|_, _, _| {
            Ok(vec![
                bin_auction_json("a", 1_000, 640.0, 64),
                bin_auction_json("b", 2_000, 500.0, 1),
                auction_json("c", 3_000, &[12.0], 1),
            ])
        });

        let (from, to) = window();
        let stats = aggregator(store)
            .query_item_prices("ENCHANTED_COAL", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();

        // 640 / 64 = 10 per unit beats the single-count 500 listing.
        assert_eq!(stats.lowest_bin, 10.0);
        assert_eq!(stats.sold, 1);
    }

    #[tokio::test]
    async fn show_auctions_includes_detail_keyed_by_end() {
        let mut store = MockKvStore::new();
        store.expect_range_by_score().times(1).returning(|_, _, _| {
            Ok(vec![
                auction_json("a", 1_000, &[10.0], 1),
                auction_json("b", 2_000, &[30.0], 1),
            ])
        });

        let (from, to) = window();
        let stats = aggregator(store)
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), true)
            .await
            .unwrap();

        let detail = stats.auctions.expect("detail requested");
        assert_eq!(detail.len(), 2);
        assert_eq!(detail.get(&1_000).unwrap().uuid, "a");
        assert_eq!(detail.get(&2_000).unwrap().uuid, "b");
    }

    #[tokio::test]
    async fn second_query_within_ttl_hits_cache() {
        let mut store = MockKvStore::new();
        store
            .expect_range_by_score()
            .times(1)
            .returning(|_, _, _| Ok(vec![auction_json("a", 1_000, &[10.0], 1)]));

        let aggregator = aggregator(store);
        let (from, to) = window();
        let first = aggregator
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();
        let second = aggregator
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();

        assert_eq!(first.sold, second.sold);
        assert_eq!(first.average_price, second.average_price);
    }

    #[tokio::test]
    async fn expired_entry_recomputes() {
        let mut store = MockKvStore::new();
        store
            .expect_range_by_score()
            .times(2)
            .returning(|_, _, _| Ok(vec![auction_json("a", 1_000, &[10.0], 1)]));

        let aggregator = CachedAggregator::new(
            Arc::new(store),
            Arc::new(MemoryCache::new()),
        )
        .with_cache_ttl(Duration::ZERO);

        let (from, to) = window();
        for _ in 0..2 {
            aggregator
                .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn equivalent_text_and_numeric_windows_share_an_entry() {
        let mut store = MockKvStore::new();
        store
            .expect_range_by_score()
            .times(1)
            .returning(|_, _, _| Ok(vec![auction_json("a", 1_000, &[10.0], 1)]));

        let aggregator = aggregator(store);
        let from_numeric = TimeBound::Millis(0);
        let from_text = TimeBound::Text("0".to_string());
        let to = TimeBound::Millis(10_000);

        aggregator
            .query_item_prices("HYPERION", Some(&from_numeric), Some(&to), false)
            .await
            .unwrap();
        aggregator
            .query_item_prices("HYPERION", Some(&from_text), Some(&to), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn detail_flag_does_not_reuse_summary_entry() {
        let mut store = MockKvStore::new();
        store
            .expect_range_by_score()
            .times(2)
            .returning(|_, _, _| Ok(vec![auction_json("a", 1_000, &[10.0], 1)]));

        let aggregator = aggregator(store);
        let (from, to) = window();
        let summary = aggregator
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();
        let detailed = aggregator
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), true)
            .await
            .unwrap();

        assert!(summary.auctions.is_none());
        assert!(detailed.auctions.is_some());
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let mut store = MockKvStore::new();
        store.expect_range_by_score().times(1).returning(|_, _, _| {
            Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        });

        let (from, to) = window();
        let err = aggregator(store)
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Store(_)));
    }

    #[tokio::test]
    async fn undecodable_members_are_skipped() {
        let mut store = MockKvStore::new();
        store.expect_range_by_score().times(1).returning(|_, _, _| {
            Ok(vec![
                "not json".to_string(),
                auction_json("a", 1_000, &[10.0], 1),
            ])
        });

        let (from, to) = window();
        let stats = aggregator(store)
            .query_item_prices("HYPERION", from.as_ref(), to.as_ref(), false)
            .await
            .unwrap();

        assert_eq!(stats.sold, 1);
    }

    #[tokio::test]
    async fn invalid_range_never_touches_the_store() {
        let store = MockKvStore::new();

        let from = TimeBound::Text("next tuesday".to_string());
        let err = aggregator(store)
            .query_item_prices("HYPERION", Some(&from), None, false)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::InvalidRange(_)));
    }
}
