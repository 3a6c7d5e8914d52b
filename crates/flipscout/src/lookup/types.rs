//! Normalized records returned by the lookup clients.
//!
//! These are the shapes cached in `api_cache`, so they derive both serde
//! directions. Every field is optional: a provider payload missing a value is
//! an absent value, never an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A dated value from provider history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub value: i64,
}

/// Demand signals and catalog data from the demand provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub catalog_code: Option<String>,
    pub model_number: Option<String>,
    pub rank_current: Option<i64>,
    pub rank_avg_30: Option<i64>,
    pub rank_avg_90: Option<i64>,
    pub sales_30: Option<i64>,
    pub sales_90: Option<i64>,
    pub sales_180: Option<i64>,
    pub seller_count: Option<i64>,
    pub fulfilled_seller_count: Option<i64>,
    #[serde(default)]
    pub price_history: Vec<HistoryPoint>,
    #[serde(default)]
    pub rank_history: Vec<HistoryPoint>,
}

/// Competitive offers on the sell side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSummary {
    /// Lowest fulfilled-by-marketplace landed price.
    pub lowest_price: Option<i64>,
    pub seller_count: Option<i64>,
    pub fulfilled_seller_count: Option<i64>,
}

/// Fee estimate at one price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub referral: Option<i64>,
    pub fulfillment: Option<i64>,
    pub other: Option<i64>,
    pub total: Option<i64>,
}

/// Catalog fallback fields from the sell side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub catalog_code: Option<String>,
    pub model_number: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingRestriction {
    Restricted,
    Unrestricted,
    /// The restriction check itself failed.
    Unknown,
}

/// One raw buy-side search hit. Winner selection is the matcher's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub name: String,
    pub shop_name: Option<String>,
    pub shop_code: Option<String>,
    pub price: i64,
    /// Provider marks the price as shipping-inclusive.
    pub shipping_included: bool,
    pub url: Option<String>,
    pub code: Option<String>,
}
