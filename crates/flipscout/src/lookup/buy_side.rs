//! Buy-side marketplace search (Ichiba item search).
//!
//! Returns raw listings sorted by price; picking a winner is left to the
//! matcher. Results are cached per search term, so items sharing a catalog
//! code or model text share one request.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::error::Result;
use super::http::{create_http_client, read_json, transport_error};
use super::rate_limit::RateLimiter;
use super::types::Listing;
use super::BuySideSearch;
use crate::cache::{search_key, CacheLayer, CacheSource};
use crate::config::{BuySideProviderConfig, HttpConfig};

const PROVIDER: &str = "buy-side";

/// The provider caps a page at 30 hits.
const MAX_HITS: u32 = 30;

pub struct BuySideClient {
    client: Client,
    application_id: SecretString,
    base_url: String,
    hits: u32,
    limiter: RateLimiter,
    cache: CacheLayer,
}

impl BuySideClient {
    pub fn new(
        config: &BuySideProviderConfig,
        application_id: SecretString,
        http: &HttpConfig,
        rate: f64,
        cache: CacheLayer,
    ) -> Result<Self> {
        Ok(Self {
            client: create_http_client(http)?,
            application_id,
            base_url: config.base_url.clone(),
            hits: config.hits.clamp(1, MAX_HITS),
            limiter: RateLimiter::new(PROVIDER, rate),
            cache,
        })
    }
}

impl BuySideClient {
    async fn request_search(&self, term: &str) -> Result<Vec<Listing>> {
        self.limiter.acquire().await;
        let hits = self.hits.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("applicationId", self.application_id.expose_secret()),
                ("format", "json"),
                ("keyword", term),
                ("hits", hits.as_str()),
                ("sort", "+itemPrice"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;
        let body: Value = read_json(PROVIDER, response).await?;

        let listings = parse_search(&body);
        log::debug!("Search '{}' returned {} listings", term, listings.len());
        Ok(listings)
    }
}

#[async_trait]
impl BuySideSearch for BuySideClient {
    async fn search(&self, term: &str) -> Result<Vec<Listing>> {
        let term = term.trim();
        let key = search_key(term);
        let params = json!({ "keyword": term, "hits": self.hits });
        let listings = self
            .cache
            .get_or_fetch(&key, CacheSource::BuySideSearch, &params, move || async move {
                self.request_search(term).await.map(Some)
            })
            .await?;
        Ok(listings.unwrap_or_default())
    }
}

/// Parses a search response. Both the wrapped (`{"Item": {...}}`) and flat
/// item layouts are accepted; hits without a name or price are dropped.
pub fn parse_search(body: &Value) -> Vec<Listing> {
    let Some(items) = body.get("Items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|entry| {
            let item = entry.get("Item").unwrap_or(entry);
            let name = item.get("itemName").and_then(Value::as_str)?.to_string();
            let price = item.get("itemPrice").and_then(Value::as_i64)?;
            let text = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            Some(Listing {
                name,
                shop_name: text("shopName"),
                shop_code: text("shopCode"),
                price,
                shipping_included: item.get("postageFlag").and_then(Value::as_i64) == Some(0),
                url: text("itemUrl"),
                code: text("itemCode"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_items() {
        let body = json!({
            "count": 2,
            "Items": [
                {"Item": {"itemName": "Widget WP-100", "itemPrice": 1980, "postageFlag": 0,
                          "itemUrl": "https://example.test/a", "itemCode": "shop-a:1",
                          "shopName": "Shop A", "shopCode": "shop-a"}},
                {"Item": {"itemName": "Widget WP-100 (box)", "itemPrice": 2100, "postageFlag": 1}}
            ]
        });

        let listings = parse_search(&body);
        assert_eq!(listings.len(), 2);
        assert!(listings[0].shipping_included);
        assert_eq!(listings[0].shop_code.as_deref(), Some("shop-a"));
        assert!(!listings[1].shipping_included);
        assert_eq!(listings[1].url, None);
    }

    #[test]
    fn test_parse_flat_items_and_missing_price() {
        let body = json!({
            "Items": [
                {"itemName": "Flat layout", "itemPrice": 500},
                {"itemName": "No price"}
            ]
        });
        let listings = parse_search(&body);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Flat layout");
        assert!(!listings[0].shipping_included);
    }

    #[test]
    fn test_parse_without_items() {
        assert!(parse_search(&json!({"error": "wrong_parameter"})).is_empty());
    }
}
