//! Demand-signal client (Keepa product endpoint).
//!
//! One token-metered request per identifier: title, catalog codes, sales-rank
//! statistics, rank-drop sales estimates, offer counts and the price/rank
//! history used for archival.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::error::Result;
use super::http::{create_http_client, read_json, transport_error};
use super::rate_limit::RateLimiter;
use super::types::{DemandRecord, HistoryPoint};
use super::DemandSource;
use crate::cache::{demand_key, CacheLayer, CacheSource};
use crate::config::{DemandProviderConfig, HttpConfig};

const PROVIDER: &str = "demand";

/// Only the newest points of each history series are kept.
pub const MAX_HISTORY_POINTS: usize = 90;

// Indices into the provider's `csv` and `stats.current` arrays.
const IDX_SALES_RANK: usize = 3;
const IDX_NEW_FBA_PRICE: usize = 10;
const IDX_COUNT_NEW: usize = 11;
const IDX_COUNT_NEW_FBA: usize = 18;

/// History timestamps are minutes since this date.
fn provider_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2011, 1, 1).unwrap_or_default()
}

pub struct DemandClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    domain: u32,
    stats_days: u32,
    limiter: RateLimiter,
    cache: CacheLayer,
}

impl DemandClient {
    pub fn new(
        config: &DemandProviderConfig,
        api_key: SecretString,
        http: &HttpConfig,
        rate: f64,
        cache: CacheLayer,
    ) -> Result<Self> {
        Ok(Self {
            client: create_http_client(http)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            domain: config.domain,
            stats_days: config.stats_days,
            limiter: RateLimiter::new(PROVIDER, rate),
            cache,
        })
    }

    async fn request_product(&self, identifier: &str) -> Result<Option<Value>> {
        self.limiter.acquire().await;

        let url = format!("{}/product", self.base_url);
        let domain = self.domain.to_string();
        let stats = self.stats_days.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("domain", domain.as_str()),
                ("asin", identifier),
                ("stats", stats.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let body: Value = read_json(PROVIDER, response).await?;
        if let Some(tokens_left) = body.get("tokensLeft") {
            log::info!("Demand provider tokens left: {}", tokens_left);
        }

        Ok(body
            .get("products")
            .and_then(Value::as_array)
            .and_then(|products| products.first())
            .cloned())
    }

    async fn request_record(&self, identifier: &str) -> Result<Option<DemandRecord>> {
        let Some(product) = self.request_product(identifier).await? else {
            log::info!("Demand provider has no product for {}", identifier);
            return Ok(None);
        };
        Ok(Some(parse_product(&product)))
    }
}

#[async_trait]
impl DemandSource for DemandClient {
    async fn fetch(&self, identifier: &str) -> Result<Option<DemandRecord>> {
        let key = demand_key(identifier);
        let params = json!({ "identifier": identifier, "domain": self.domain });
        self.cache
            .get_or_fetch(&key, CacheSource::Demand, &params, move || {
                self.request_record(identifier)
            })
            .await
    }
}

/// Normalizes one provider product. Missing or malformed fields become `None`.
pub fn parse_product(product: &Value) -> DemandRecord {
    let mut record = DemandRecord {
        title: string_field(product, "title"),
        brand: string_field(product, "brand"),
        category: product
            .get("categoryTree")
            .and_then(Value::as_array)
            .and_then(|tree| tree.last())
            .and_then(|leaf| string_field(leaf, "name")),
        catalog_code: product
            .get("eanList")
            .and_then(Value::as_array)
            .and_then(|codes| codes.first())
            .and_then(Value::as_str)
            .map(str::to_string),
        model_number: string_field(product, "model").or_else(|| string_field(product, "partNumber")),
        ..Default::default()
    };

    if let Some(stats) = product.get("stats").filter(|s| s.is_object()) {
        let current = stats.get("current");
        record.rank_current = positive_at(current, IDX_SALES_RANK);
        record.seller_count = positive_at(current, IDX_COUNT_NEW);
        record.fulfilled_seller_count = positive_at(current, IDX_COUNT_NEW_FBA);

        // avg[0] is the 30-day window, avg[1] the 90-day window.
        let avg = stats.get("avg").and_then(Value::as_array);
        record.rank_avg_30 = avg.and_then(|a| positive_at(a.first(), IDX_SALES_RANK));
        record.rank_avg_90 = avg.and_then(|a| positive_at(a.get(1), IDX_SALES_RANK));

        record.sales_30 = positive(stats.get("salesRankDrops30"));
        record.sales_90 = positive(stats.get("salesRankDrops90"));
        record.sales_180 = positive(stats.get("salesRankDrops180"));
    }

    if let Some(csv) = product.get("csv").and_then(Value::as_array) {
        record.price_history = csv
            .get(IDX_NEW_FBA_PRICE)
            .and_then(Value::as_array)
            .map(|series| parse_history(series))
            .unwrap_or_default();
        record.rank_history = csv
            .get(IDX_SALES_RANK)
            .and_then(Value::as_array)
            .map(|series| parse_history(series))
            .unwrap_or_default();
    }

    record
}

/// Parses a flat `[t0, v0, t1, v1, ...]` series. Pairs with a missing element
/// or the `-1` no-value marker are dropped; the newest points are kept.
pub fn parse_history(series: &[Value]) -> Vec<HistoryPoint> {
    let epoch = provider_epoch();
    let mut points: Vec<HistoryPoint> = series
        .chunks_exact(2)
        .filter_map(|pair| {
            let minutes = pair[0].as_i64()?;
            let value = pair[1].as_i64()?;
            if value == -1 {
                return None;
            }
            let date = epoch.checked_add_signed(Duration::minutes(minutes))?;
            Some(HistoryPoint { date, value })
        })
        .collect();

    if points.len() > MAX_HISTORY_POINTS {
        points.drain(..points.len() - MAX_HISTORY_POINTS);
    }
    points
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn positive(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64).filter(|v| *v > 0)
}

fn positive_at(array: Option<&Value>, index: usize) -> Option<i64> {
    positive(array.and_then(Value::as_array).and_then(|a| a.get(index)))
}
