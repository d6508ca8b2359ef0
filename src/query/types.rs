use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One bid on an auction. `bids` sequences are chronological, so the last
/// entry is the winning bid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(default = "default_count")]
    pub count: u32,
}

impl Default for Item {
    fn default() -> Self {
        Self { count: 1 }
    }
}

fn default_count() -> u32 {
    1
}

/// A marketplace listing snapshot. Owned and mutated by the external ingest
/// process; this service only reads.
///
/// Two wire encodings exist, both fixed by the ingest contract: full JSON
/// members in the per-item sorted set, and `auction:{uuid}` hashes with
/// scalar fields as strings and `item`/`bids` as embedded JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub uuid: String,
    /// Listing close time, epoch ms. Not guaranteed unique across auctions.
    pub end: i64,
    #[serde(default)]
    pub item: Item,
    #[serde(default)]
    pub bids: Vec<Bid>,
    #[serde(default)]
    pub bin: bool,
    #[serde(default)]
    pub starting_bid: f64,
    #[serde(default)]
    pub highest_bid_amount: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
}

impl Auction {
    /// Winning bid divided by stack size, if anyone bid.
    pub fn sale_unit_price(&self) -> Option<f64> {
        self.bids
            .last()
            .map(|bid| bid.amount / self.item.count.max(1) as f64)
    }

    /// Asking price per unit for buy-it-now listings.
    pub fn bin_unit_price(&self) -> Option<f64> {
        if self.bin {
            Some(self.starting_bid / self.item.count.max(1) as f64)
        } else {
            None
        }
    }

    /// Decode an `auction:{uuid}` hash record. An empty map (missing key)
    /// or a record without the required scalar fields decodes to `None`.
    pub fn from_hash(fields: &HashMap<String, String>) -> Option<Self> {
        let uuid = fields.get("uuid")?.clone();
        let end = fields.get("end")?.parse().ok()?;
        Some(Self {
            uuid,
            end,
            item: fields
                .get("item")
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
            bids: fields
                .get("bids")
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
            bin: fields
                .get("bin")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            starting_bid: fields
                .get("starting_bid")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            highest_bid_amount: fields
                .get("highest_bid_amount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            category: fields.get("category").cloned(),
            tier: fields.get("tier").cloned(),
        })
    }
}

/// Windowed per-unit price statistics for one item id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub average_price: f64,
    pub median_price: f64,
    pub standard_deviation: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub lowest_bin: f64,
    pub sold: u64,
    /// Per-auction detail keyed by `end`, present only when requested.
    /// Records sharing an `end` overwrite each other.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auctions: Option<BTreeMap<i64, Auction>>,
}

/// Global index metadata written by the ingest under `auction_meta`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    #[serde(default)]
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub total_auctions: u64,
}

/// One page of a listing query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionPage {
    pub last_updated: Option<i64>,
    pub total_auctions: u64,
    /// Size of the full filtered set before pagination.
    pub matching_query: usize,
    pub auctions: Vec<Auction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter, sort, and pagination parameters for the listing query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQuery {
    pub id: Option<String>,
    pub bin: Option<bool>,
    pub category: Option<String>,
    pub rarity: Option<String>,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_page")]
    pub page: usize,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            id: None,
            bin: None,
            category: None,
            rarity: None,
            sort_by: default_sort_by(),
            sort_order: SortOrder::default(),
            limit: default_limit(),
            page: default_page(),
        }
    }
}

fn default_sort_by() -> String {
    "end".to_string()
}

fn default_limit() -> usize {
    1000
}

fn default_page() -> usize {
    1
}
