use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

use crate::store::KvStore;

use super::error::QueryError;
use super::types::{Auction, AuctionPage, ListingQuery, QueryMeta, SortOrder};

const BASE_INDEX: &str = "auction_ids";
const BIN_INDEX: &str = "auction_bins";
const ITEM_INDEX_PREFIX: &str = "auction_item_id:";
const AUCTION_KEY_PREFIX: &str = "auction:";
const META_KEY: &str = "auction_meta";
const MAX_PAGE_SIZE: usize = 1000;

/// Filterable, sortable, paginated listing queries over the open-auction
/// index, plus the direct single-auction lookup. Index-level criteria
/// intersect (AND only); there is no union support.
pub struct AuctionQueryEngine {
    store: Arc<dyn KvStore>,
}

impl AuctionQueryEngine {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Direct lookup by auction UUID. No filtering, sorting, pagination, or
    /// metadata; this is a distinct operation from `list`.
    pub async fn get_auction(&self, uuid: &str) -> Result<Option<Auction>, QueryError> {
        let fields = self
            .store
            .hash_get_all(&format!("{}{}", AUCTION_KEY_PREFIX, uuid))
            .await?;
        Ok(Auction::from_hash(&fields))
    }

    pub async fn list(&self, query: &ListingQuery) -> Result<AuctionPage, QueryError> {
        let mut indexes = vec![BASE_INDEX.to_string()];
        if query.bin.unwrap_or(false) {
            indexes.push(BIN_INDEX.to_string());
        }
        if let Some(id) = &query.id {
            indexes.push(format!("{}{}", ITEM_INDEX_PREFIX, id));
        }

        let ids = self.store.intersect(&indexes).await?;
        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}{}", AUCTION_KEY_PREFIX, id))
            .collect();
        let rows = self.store.hash_get_all_bulk(&keys).await?;

        // Absent and undecodable rows are dropped, not errors.
        let mut auctions: Vec<Auction> = rows.iter().filter_map(Auction::from_hash).collect();

        if let Some(category) = &query.category {
            auctions.retain(|a| a.category.as_deref() == Some(category.as_str()));
        }
        if let Some(rarity) = &query.rarity {
            auctions.retain(|a| a.tier.as_deref() == Some(rarity.as_str()));
        }

        sort_auctions(&mut auctions, &query.sort_by, query.sort_order)?;

        let meta = self.fetch_meta().await?;

        let page_size = query.limit.min(MAX_PAGE_SIZE);
        let offset = query.page.saturating_sub(1).saturating_mul(page_size);
        let matching_query = auctions.len();
        let page: Vec<Auction> = auctions.into_iter().skip(offset).take(page_size).collect();

        Ok(AuctionPage {
            last_updated: meta.last_updated,
            total_auctions: meta.total_auctions,
            matching_query,
            auctions: page,
        })
    }

    async fn fetch_meta(&self) -> Result<QueryMeta, QueryError> {
        let raw = self.store.get(META_KEY).await?;
        Ok(match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("Failed parsing auction meta: {}", err);
                QueryMeta::default()
            }),
            None => QueryMeta::default(),
        })
    }
}

/// Numeric key extraction for the fixed sortable-field set. Sorting is
/// validated against this set, never against the shape of the first record.
fn sort_key_fn(field: &str) -> Option<fn(&Auction) -> f64> {
    match field {
        "end" => Some(|a| a.end as f64),
        "starting_bid" => Some(|a| a.starting_bid),
        "highest_bid_amount" => Some(|a| a.highest_bid_amount),
        "bids" => Some(|a| a.bids.len() as f64),
        _ => None,
    }
}

fn sort_auctions(
    auctions: &mut [Auction],
    field: &str,
    order: SortOrder,
) -> Result<(), QueryError> {
    let key = sort_key_fn(field).ok_or_else(|| QueryError::SortField(field.to_string()))?;
    auctions.sort_by(|a, b| {
        let ordering = key(a).partial_cmp(&key(b)).unwrap_or(Ordering::Equal);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    Ok(())
}
